//! The issue-tracker capability the validators and the sampler run against.
//!
//! [`IssueTrackerClient`] is the only way the core talks to a tracker. The
//! HTTP implementation lives in [`jira`], and [`memory`] holds a deterministic
//! in-process fake used by tests, benchmarks and the demo binary.

pub mod jira;
pub mod memory;

pub use jira::JiraClient;
pub use memory::MemoryTracker;

use crate::model::{Credentials, FieldDescriptor};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Tracker returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid tracker response: {0}")]
    InvalidResponse(String),
}

/// Handle returned by a successful [`IssueTrackerClient::authenticate`].
///
/// Clones share validity: once any call on the session is rejected as
/// unauthorized, every clone reports `is_valid() == false`.
#[derive(Clone)]
pub struct AuthenticatedSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: uuid::Uuid,
    user: String,
    api_token: String,
    account: String,
    base_url: String,
    time_zone: Tz,
    valid: AtomicBool,
}

impl AuthenticatedSession {
    pub fn new(credentials: &Credentials, base_url: impl Into<String>) -> Self {
        Self::in_time_zone(credentials, base_url, Tz::UTC)
    }

    /// A session whose user reads and writes dates in `time_zone`.
    pub fn in_time_zone(credentials: &Credentials, base_url: impl Into<String>, time_zone: Tz) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: uuid::Uuid::new_v4(),
                user: credentials.user.clone(),
                api_token: credentials.api_token.clone(),
                account: credentials.account_name.clone(),
                base_url: base_url.into(),
                time_zone,
                valid: AtomicBool::new(true),
            }),
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.inner.id
    }

    pub fn user(&self) -> &str {
        &self.inner.user
    }

    pub fn api_token(&self) -> &str {
        &self.inner.api_token
    }

    pub fn account(&self) -> &str {
        &self.inner.account
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn time_zone(&self) -> Tz {
        self.inner.time_zone
    }

    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) {
        self.inner.valid.store(false, Ordering::Release);
    }

    /// Marks the session invalid when `result` is an authentication rejection.
    pub fn observe<T>(&self, result: Result<T, TrackerError>) -> Result<T, TrackerError> {
        if let Err(TrackerError::Unauthorized(_)) = &result {
            self.invalidate();
        }
        result
    }
}

impl fmt::Debug for AuthenticatedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedSession")
            .field("id", &self.inner.id)
            .field("user", &self.inner.user)
            .field("account", &self.inner.account)
            .field("base_url", &self.inner.base_url)
            .field("time_zone", &self.inner.time_zone)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// A filter query bounded to the issues that existed at `as_of`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsOfQuery {
    pub filter: String,
    pub as_of: DateTime<Utc>,
}

impl AsOfQuery {
    pub fn new(filter: impl Into<String>, as_of: DateTime<Utc>) -> Self {
        Self {
            filter: filter.into(),
            as_of,
        }
    }

    pub fn to_jql(&self) -> String {
        self.to_jql_in(Tz::UTC)
    }

    /// Renders `(<filter>) AND created <= "<as_of>"`, keeping any `ORDER BY`
    /// tail of the filter at the end where JQL requires it.
    ///
    /// JQL dates are wall-clock minutes in the searching user's time zone, so
    /// the bound is shifted into `zone` and rounded up to the next whole minute.
    pub fn to_jql_in(&self, zone: Tz) -> String {
        let bound = format!(
            "created <= \"{}\"",
            ceil_to_minute(self.as_of)
                .with_timezone(&zone)
                .format("%Y-%m-%d %H:%M")
        );
        let (clauses, ordering) = split_order_by(&self.filter);
        let clauses = clauses.trim();

        let mut jql = if clauses.is_empty() {
            bound
        } else {
            format!("({}) AND {}", clauses, bound)
        };
        if let Some(ordering) = ordering {
            jql.push(' ');
            jql.push_str(ordering.trim());
        }
        jql
    }
}

fn ceil_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    let past_minute =
        Duration::seconds(i64::from(at.second())) + Duration::nanoseconds(i64::from(at.nanosecond()));
    if past_minute.is_zero() {
        at
    } else {
        at - past_minute + Duration::minutes(1)
    }
}

fn split_order_by(filter: &str) -> (&str, Option<&str>) {
    match find_order_by(filter) {
        Some(idx) => (&filter[..idx], Some(&filter[idx..])),
        None => (filter, None),
    }
}

/// Byte offset of the last `ORDER BY` keyword outside quoted literals.
fn find_order_by(filter: &str) -> Option<usize> {
    let bytes = filter.as_bytes();
    let mut found = None;
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(_) if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None => {
                if i == 0 || !is_word_byte(bytes[i - 1]) {
                    if let Some(len) = order_by_len(&bytes[i..]) {
                        found = Some(i);
                        i += len;
                        continue;
                    }
                }
            }
        }
        i += 1;
    }
    found
}

// Length of `order <whitespace> by` at the start of `rest`, matched case-insensitively.
fn order_by_len(rest: &[u8]) -> Option<usize> {
    if !keyword_at(rest, 0, b"order") {
        return None;
    }
    let gap = rest[5..].iter().take_while(|b| b.is_ascii_whitespace()).count();
    if gap == 0 || !keyword_at(rest, 5 + gap, b"by") {
        return None;
    }
    let end = 5 + gap + 2;
    match rest.get(end) {
        Some(&b) if is_word_byte(b) => None,
        _ => Some(end),
    }
}

fn keyword_at(rest: &[u8], at: usize, word: &[u8]) -> bool {
    rest.get(at..at + word.len())
        .map_or(false, |found| found.eq_ignore_ascii_case(word))
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub id: String,
    pub field_value: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub issues: Vec<IssueRecord>,
}

impl SearchResult {
    /// Sum of the field across all issues; unset values count as zero.
    pub fn total(&self) -> f64 {
        self.issues.iter().filter_map(|i| i.field_value).sum()
    }

    pub fn issue_count(&self) -> usize {
        self.issues.len()
    }
}

#[async_trait]
pub trait IssueTrackerClient: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthenticatedSession, TrackerError>;

    /// Returns the tracker's error messages for `query`, in the order it reported them.
    async fn validate_query_syntax(
        &self,
        session: &AuthenticatedSession,
        query: &str,
    ) -> Result<Vec<String>, TrackerError>;

    async fn resolve_field(
        &self,
        session: &AuthenticatedSession,
        field_id: &str,
    ) -> Result<Option<FieldDescriptor>, TrackerError>;

    async fn search_issues_as_of(
        &self,
        session: &AuthenticatedSession,
        query: &AsOfQuery,
        field_id: &str,
    ) -> Result<SearchResult, TrackerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_jql_wraps_filter() {
        let query = AsOfQuery::new("project = X OR labels = y", as_of());
        assert_eq!(
            query.to_jql(),
            "(project = X OR labels = y) AND created <= \"2024-03-04 00:00\""
        );
    }

    #[test]
    fn test_jql_keeps_order_by_last() {
        let query = AsOfQuery::new("project = X ORDER BY created DESC", as_of());
        assert_eq!(
            query.to_jql(),
            "(project = X) AND created <= \"2024-03-04 00:00\" ORDER BY created DESC"
        );
    }

    #[test]
    fn test_jql_empty_filter() {
        let query = AsOfQuery::new("  ", as_of());
        assert_eq!(query.to_jql(), "created <= \"2024-03-04 00:00\"");

        let query = AsOfQuery::new("order by rank", as_of());
        assert_eq!(query.to_jql(), "created <= \"2024-03-04 00:00\" order by rank");
    }

    #[test]
    fn test_jql_order_by_inside_word_is_not_split() {
        let query = AsOfQuery::new("summary ~ \"reorder by\"", as_of());
        assert!(query.to_jql().starts_with("(summary ~ \"reorder by\")"));
    }

    #[test]
    fn test_jql_order_by_inside_quotes_is_not_split() {
        let query = AsOfQuery::new("project = X AND summary ~ \"sort order by\"", as_of());
        assert_eq!(
            query.to_jql(),
            "(project = X AND summary ~ \"sort order by\") AND created <= \"2024-03-04 00:00\""
        );

        let query = AsOfQuery::new("summary ~ 'it\\'s order by' ORDER BY rank", as_of());
        assert_eq!(
            query.to_jql(),
            "(summary ~ 'it\\'s order by') AND created <= \"2024-03-04 00:00\" ORDER BY rank"
        );
    }

    #[test]
    fn test_jql_order_by_with_extra_whitespace() {
        let query = AsOfQuery::new("project = X ORDER  BY rank", as_of());
        assert_eq!(
            query.to_jql(),
            "(project = X) AND created <= \"2024-03-04 00:00\" ORDER  BY rank"
        );

        let query = AsOfQuery::new("project = X order\n\tby rank", as_of());
        assert!(query.to_jql().ends_with("created <= \"2024-03-04 00:00\" order\n\tby rank"));

        let query = AsOfQuery::new("project = X order bytes", as_of());
        assert_eq!(
            query.to_jql(),
            "(project = X order bytes) AND created <= \"2024-03-04 00:00\""
        );
    }

    #[test]
    fn test_jql_bound_rounds_up_to_whole_minute() {
        let at = Utc.with_ymd_and_hms(2024, 5, 15, 10, 30, 20).unwrap();
        assert_eq!(
            AsOfQuery::new("project = X", at).to_jql(),
            "(project = X) AND created <= \"2024-05-15 10:31\""
        );

        let on_minute = Utc.with_ymd_and_hms(2024, 5, 15, 10, 30, 0).unwrap();
        assert_eq!(
            AsOfQuery::new("project = X", on_minute).to_jql(),
            "(project = X) AND created <= \"2024-05-15 10:30\""
        );
    }

    #[test]
    fn test_jql_bound_in_user_time_zone() {
        let at = Utc.with_ymd_and_hms(2024, 5, 13, 0, 0, 0).unwrap();
        let query = AsOfQuery::new("project = X", at);

        assert_eq!(
            query.to_jql_in(chrono_tz::America::Los_Angeles),
            "(project = X) AND created <= \"2024-05-12 17:00\""
        );
        assert_eq!(
            query.to_jql_in(chrono_tz::Asia::Kolkata),
            "(project = X) AND created <= \"2024-05-13 05:30\""
        );
    }

    #[test]
    fn test_session_invalidation_is_shared() {
        let creds = Credentials::new("ada", "hunter2", "acme");
        let session = AuthenticatedSession::new(&creds, "https://acme.example");
        let clone = session.clone();
        assert!(clone.is_valid());

        let result: Result<(), TrackerError> =
            session.observe(Err(TrackerError::Unauthorized("revoked".to_string())));
        assert!(result.is_err());
        assert!(!clone.is_valid());
        assert!(!format!("{:?}", clone).contains("hunter2"));
    }

    #[test]
    fn test_search_result_totals() {
        let result = SearchResult {
            issues: vec![
                IssueRecord { id: "X-1".to_string(), field_value: Some(3.0) },
                IssueRecord { id: "X-2".to_string(), field_value: None },
                IssueRecord { id: "X-3".to_string(), field_value: Some(5.0) },
            ],
        };
        assert_eq!(result.total(), 8.0);
        assert_eq!(result.issue_count(), 3);
    }
}

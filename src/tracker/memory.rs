use crate::model::{Credentials, FieldDescriptor};
use crate::tracker::{
    AsOfQuery, AuthenticatedSession, IssueRecord, IssueTrackerClient, SearchResult, TrackerError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

#[derive(Debug, Clone)]
struct MemoryIssue {
    id: String,
    created: DateTime<Utc>,
    value: Option<f64>,
}

#[derive(Debug, Default)]
struct MemoryState {
    accounts: Vec<Credentials>,
    revoked_users: HashSet<String>,
    fields: Vec<FieldDescriptor>,
    invalid_queries: HashMap<String, Vec<String>>,
    issues: HashMap<String, Vec<MemoryIssue>>,
    failing_instants: HashSet<DateTime<Utc>>,
    search_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct CallCounters {
    authenticate: AtomicUsize,
    validate_query: AtomicUsize,
    resolve_field: AtomicUsize,
    search: AtomicUsize,
    searches_in_flight: AtomicUsize,
    peak_searches_in_flight: AtomicUsize,
}

// Releases an in-flight search slot even when the search future is dropped mid-sleep.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> (Self, usize) {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        (Self(counter), now)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Snapshot of how many times each remote operation was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallStats {
    pub authenticate: usize,
    pub validate_query: usize,
    pub resolve_field: usize,
    pub search: usize,
    pub searches_in_flight: usize,
    pub peak_searches_in_flight: usize,
}

// In-memory tracker that answers from registered accounts, fields and issues
#[derive(Debug, Clone, Default)]
pub struct MemoryTracker {
    state: Arc<Mutex<MemoryState>>,
    counters: Arc<CallCounters>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(self, credentials: Credentials) -> Self {
        self.state().accounts.push(credentials);
        self
    }

    pub fn with_field(self, field: FieldDescriptor) -> Self {
        self.state().fields.push(field);
        self
    }

    pub fn with_invalid_query(self, query: impl Into<String>, errors: Vec<String>) -> Self {
        self.state().invalid_queries.insert(query.into(), errors);
        self
    }

    /// Registers an issue matched by `filter`. Issues are visible to searches
    /// bounded at or after `created`.
    pub fn with_issue(
        self,
        filter: impl Into<String>,
        id: impl Into<String>,
        created: DateTime<Utc>,
        value: Option<f64>,
    ) -> Self {
        self.add_issue(filter, id, created, value);
        self
    }

    pub fn with_search_delay(self, delay: Duration) -> Self {
        self.state().search_delay = Some(delay);
        self
    }

    pub fn add_issue(
        &self,
        filter: impl Into<String>,
        id: impl Into<String>,
        created: DateTime<Utc>,
        value: Option<f64>,
    ) {
        self.state()
            .issues
            .entry(filter.into())
            .or_default()
            .push(MemoryIssue {
                id: id.into(),
                created,
                value,
            });
    }

    /// Makes any search bounded exactly at `as_of` fail with a server error.
    pub fn fail_search_at(&self, as_of: DateTime<Utc>) {
        self.state().failing_instants.insert(as_of);
    }

    /// Rejects every further call made with this user's sessions.
    pub fn revoke(&self, user: &str) {
        self.state().revoked_users.insert(user.to_string());
    }

    pub fn stats(&self) -> CallStats {
        CallStats {
            authenticate: self.counters.authenticate.load(Ordering::SeqCst),
            validate_query: self.counters.validate_query.load(Ordering::SeqCst),
            resolve_field: self.counters.resolve_field.load(Ordering::SeqCst),
            search: self.counters.search.load(Ordering::SeqCst),
            searches_in_flight: self.counters.searches_in_flight.load(Ordering::SeqCst),
            peak_searches_in_flight: self.counters.peak_searches_in_flight.load(Ordering::SeqCst),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_session(&self, session: &AuthenticatedSession) -> Result<(), TrackerError> {
        if self.state().revoked_users.contains(session.user()) {
            return Err(TrackerError::Unauthorized(format!(
                "access revoked for {}",
                session.user()
            )));
        }
        Ok(())
    }

    fn run_search(&self, query: &AsOfQuery) -> Result<SearchResult, TrackerError> {
        let state = self.state();
        if state.failing_instants.contains(&query.as_of) {
            return Err(TrackerError::Status {
                status: 500,
                message: format!("search failed for {}", query.to_jql()),
            });
        }

        let issues: Vec<IssueRecord> = state
            .issues
            .get(&query.filter)
            .map(|issues| {
                issues
                    .iter()
                    .filter(|issue| issue.created <= query.as_of)
                    .map(|issue| IssueRecord {
                        id: issue.id.clone(),
                        field_value: issue.value,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(SearchResult { issues })
    }
}

#[async_trait]
impl IssueTrackerClient for MemoryTracker {
    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthenticatedSession, TrackerError> {
        self.counters.authenticate.fetch_add(1, Ordering::SeqCst);

        let state = self.state();
        let known = state.accounts.iter().any(|account| account == credentials);
        if !known || state.revoked_users.contains(&credentials.user) {
            return Err(TrackerError::Unauthorized(format!(
                "credentials rejected for account {}",
                credentials.account_name
            )));
        }

        Ok(AuthenticatedSession::new(
            credentials,
            format!("memory://{}", credentials.account_name),
        ))
    }

    async fn validate_query_syntax(
        &self,
        session: &AuthenticatedSession,
        query: &str,
    ) -> Result<Vec<String>, TrackerError> {
        self.counters.validate_query.fetch_add(1, Ordering::SeqCst);
        session.observe(self.check_session(session))?;

        Ok(self
            .state()
            .invalid_queries
            .get(query)
            .cloned()
            .unwrap_or_default())
    }

    async fn resolve_field(
        &self,
        session: &AuthenticatedSession,
        field_id: &str,
    ) -> Result<Option<FieldDescriptor>, TrackerError> {
        self.counters.resolve_field.fetch_add(1, Ordering::SeqCst);
        session.observe(self.check_session(session))?;

        let state = self.state();
        let found = state
            .fields
            .iter()
            .find(|f| f.id == field_id)
            .or_else(|| state.fields.iter().find(|f| f.name == field_id))
            .cloned();
        Ok(found)
    }

    async fn search_issues_as_of(
        &self,
        session: &AuthenticatedSession,
        query: &AsOfQuery,
        _field_id: &str,
    ) -> Result<SearchResult, TrackerError> {
        self.counters.search.fetch_add(1, Ordering::SeqCst);
        session.observe(self.check_session(session))?;

        let (_slot, in_flight) = InFlight::enter(&self.counters.searches_in_flight);
        self.counters
            .peak_searches_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);

        let delay = self.state().search_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.run_search(query)
    }
}

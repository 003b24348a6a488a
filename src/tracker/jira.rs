use crate::model::{Credentials, FieldDescriptor, FieldType};
use crate::tracker::{
    AsOfQuery, AuthenticatedSession, IssueRecord, IssueTrackerClient, SearchResult, TrackerError,
};
use crate::PointCountConfig;
use async_trait::async_trait;
use chrono_tz::Tz;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::time::Duration;
use tracing::{debug, error, trace, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JiraProfile {
    time_zone: Option<String>,
}

#[derive(Debug, Serialize)]
struct JqlParseRequest<'a> {
    queries: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct JqlParseResponse {
    queries: Vec<ParsedJql>,
}

#[derive(Debug, Deserialize)]
struct ParsedJql {
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct JiraField {
    id: String,
    name: String,
    schema: Option<JiraFieldSchema>,
}

#[derive(Debug, Deserialize)]
struct JiraFieldSchema {
    #[serde(rename = "type")]
    field_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    jql: &'a str,
    start_at: usize,
    max_results: usize,
    fields: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPage {
    total: usize,
    #[serde(default)]
    issues: Vec<JiraIssue>,
}

#[derive(Debug, Deserialize)]
struct JiraIssue {
    key: String,
    #[serde(default)]
    fields: HashMap<String, serde_json::Value>,
}

/// HTTP client for Jira-compatible trackers, authenticating with user + API token.
#[derive(Debug, Clone)]
pub struct JiraClient {
    http_client: Client,
    base_url_template: String,
    page_size: usize,
}

impl JiraClient {
    pub fn new(config: &PointCountConfig) -> Result<Self, TrackerError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .build()
            .map_err(|e| TrackerError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url_template: config.tracker_base_url.clone(),
            page_size: config.search_page_size.max(1),
        })
    }

    /// Base URL for an account; `{account}` in the template is replaced by the account name.
    pub fn base_url(&self, account: &str) -> String {
        self.base_url_template
            .replace("{account}", account)
            .trim_end_matches('/')
            .to_string()
    }

    fn request(&self, builder: RequestBuilder, session: &AuthenticatedSession) -> RequestBuilder {
        builder
            .basic_auth(session.user(), Some(session.api_token()))
            .header("Accept", "application/json")
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, TrackerError> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                error!("Tracker request timed out");
                return TrackerError::Network("request timed out".to_string());
            }
            error!(error = %e, "Network error during tracker request");
            TrackerError::Network(e.to_string())
        })?;

        let status = response.status();
        debug!(status = %status, url = %response.url(), "Received tracker response");

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TrackerError::Unauthorized(format!(
                "tracker rejected credentials (HTTP {})",
                status.as_u16()
            )));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %body, "Tracker API error");
            return Err(TrackerError::Status {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(response)
    }

    async fn decode<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, TrackerError> {
        let body = response
            .text()
            .await
            .map_err(|e| TrackerError::Network(e.to_string()))?;
        trace!(body = %body, "Tracker response body");

        serde_json::from_str(&body)
            .map_err(|e| TrackerError::InvalidResponse(format!("JSON parse error: {}", e)))
    }

    async fn fetch_page(
        &self,
        session: &AuthenticatedSession,
        jql: &str,
        field_id: &str,
        start_at: usize,
    ) -> Result<SearchPage, TrackerError> {
        let url = format!("{}/rest/api/2/search", session.base_url());
        let body = SearchRequest {
            jql,
            start_at,
            max_results: self.page_size,
            fields: [field_id],
        };
        let response = self
            .send(self.request(self.http_client.post(&url), session).json(&body))
            .await?;
        Self::decode(response).await
    }
}

// Jira reads JQL dates in the profile's zone; unknown or missing zones fall back to UTC.
fn profile_time_zone(profile: &JiraProfile) -> Tz {
    match profile.time_zone.as_deref() {
        None => Tz::UTC,
        Some(name) => name.parse().unwrap_or_else(|_| {
            warn!(time_zone = %name, "Unrecognised profile time zone, using UTC");
            Tz::UTC
        }),
    }
}

fn field_value(issue: &JiraIssue, field_id: &str) -> Result<Option<f64>, TrackerError> {
    match issue.fields.get(field_id) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(TrackerError::InvalidResponse(format!(
            "issue {} has non-numeric value {} for {}",
            issue.key, other, field_id
        ))),
    }
}

#[async_trait]
impl IssueTrackerClient for JiraClient {
    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthenticatedSession, TrackerError> {
        let base_url = self.base_url(&credentials.account_name);
        let unverified = AuthenticatedSession::new(credentials, base_url.clone());
        let url = format!("{}/rest/api/2/myself", base_url);
        debug!(account = %credentials.account_name, user = %credentials.user, "Authenticating with tracker");

        let response = self.send(self.request(self.http_client.get(&url), &unverified)).await?;
        let profile: JiraProfile = Self::decode(response).await?;
        let time_zone = profile_time_zone(&profile);
        debug!(time_zone = %time_zone, "Tracker profile loaded");

        Ok(AuthenticatedSession::in_time_zone(credentials, base_url, time_zone))
    }

    async fn validate_query_syntax(
        &self,
        session: &AuthenticatedSession,
        query: &str,
    ) -> Result<Vec<String>, TrackerError> {
        let url = format!("{}/rest/api/2/jql/parse?validation=strict", session.base_url());
        let body = JqlParseRequest { queries: [query] };

        let response = session.observe(
            self.send(self.request(self.http_client.post(&url), session).json(&body))
                .await,
        )?;
        let parsed: JqlParseResponse = Self::decode(response).await?;

        parsed
            .queries
            .into_iter()
            .next()
            .map(|q| q.errors)
            .ok_or_else(|| TrackerError::InvalidResponse("JQL parse returned no results".to_string()))
    }

    async fn resolve_field(
        &self,
        session: &AuthenticatedSession,
        field_id: &str,
    ) -> Result<Option<FieldDescriptor>, TrackerError> {
        let url = format!("{}/rest/api/2/field", session.base_url());
        let response = session.observe(
            self.send(self.request(self.http_client.get(&url), session)).await,
        )?;
        let fields: Vec<JiraField> = Self::decode(response).await?;
        debug!(field_count = fields.len(), "Fetched tracker field schema");

        let matched = fields
            .iter()
            .position(|f| f.id == field_id)
            .or_else(|| fields.iter().position(|f| f.name == field_id));

        Ok(matched.map(|idx| {
            let field = &fields[idx];
            let declared_type = field
                .schema
                .as_ref()
                .map(|s| FieldType::from_schema(&s.field_type))
                .unwrap_or_else(|| FieldType::Other("unknown".to_string()));
            FieldDescriptor::new(field.id.clone(), field.name.clone(), declared_type)
        }))
    }

    async fn search_issues_as_of(
        &self,
        session: &AuthenticatedSession,
        query: &AsOfQuery,
        field_id: &str,
    ) -> Result<SearchResult, TrackerError> {
        let jql = query.to_jql_in(session.time_zone());
        let mut issues = Vec::new();
        let mut start_at = 0;

        loop {
            let page = session.observe(self.fetch_page(session, &jql, field_id, start_at).await)?;
            let fetched = page.issues.len();

            for issue in &page.issues {
                issues.push(IssueRecord {
                    id: issue.key.clone(),
                    field_value: field_value(issue, field_id)?,
                });
            }

            start_at += fetched;
            if fetched == 0 || start_at >= page.total {
                break;
            }
        }

        debug!(jql = %jql, issue_count = issues.len(), "Search completed");
        Ok(SearchResult { issues })
    }
}

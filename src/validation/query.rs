use crate::error::{PointCountError, PointCountResult};
use crate::tracker::{AuthenticatedSession, IssueTrackerClient};
use crate::validation::ensure_active;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Tracker-reported problems with a filter query, in the tracker's order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryValidation {
    pub errors: Vec<String>,
}

impl QueryValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// The message callers show as the summary.
    pub fn primary(&self) -> Option<&str> {
        self.errors.first().map(String::as_str)
    }

    pub fn into_result(self) -> PointCountResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(PointCountError::QueryInvalid(self.errors))
        }
    }
}

pub struct QueryValidator {
    client: Arc<dyn IssueTrackerClient>,
}

impl QueryValidator {
    pub fn new(client: Arc<dyn IssueTrackerClient>) -> Self {
        Self { client }
    }

    /// Dry-runs the whole query string on the tracker.
    pub async fn validate(
        &self,
        session: &AuthenticatedSession,
        query: &str,
    ) -> PointCountResult<QueryValidation> {
        ensure_active(session)?;

        let errors = self.client.validate_query_syntax(session, query).await?;
        debug!(query = %query, error_count = errors.len(), "Query validated");

        Ok(QueryValidation { errors })
    }
}

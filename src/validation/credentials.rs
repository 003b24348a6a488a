use crate::error::{PointCountError, PointCountResult};
use crate::model::Credentials;
use crate::tracker::{AuthenticatedSession, IssueTrackerClient, TrackerError};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct CredentialValidator {
    client: Arc<dyn IssueTrackerClient>,
}

impl CredentialValidator {
    pub fn new(client: Arc<dyn IssueTrackerClient>) -> Self {
        Self { client }
    }

    /// Authenticates once against the tracker. Rejected credentials are terminal.
    pub async fn initialize(&self, credentials: &Credentials) -> PointCountResult<AuthenticatedSession> {
        debug!(
            user = %credentials.user,
            account = %credentials.account_name,
            "Initializing tracker session"
        );

        match self.client.authenticate(credentials).await {
            Ok(session) => Ok(session),
            Err(TrackerError::Unauthorized(message)) => {
                warn!(
                    user = %credentials.user,
                    account = %credentials.account_name,
                    "Tracker rejected credentials"
                );
                Err(PointCountError::Auth(message))
            }
            Err(other) => Err(PointCountError::Remote(other.to_string())),
        }
    }
}

use crate::error::{PointCountError, PointCountResult};
use crate::model::FieldDescriptor;
use crate::tracker::{AuthenticatedSession, IssueTrackerClient};
use crate::validation::ensure_active;
use std::sync::Arc;
use tracing::debug;

pub struct FieldValidator {
    client: Arc<dyn IssueTrackerClient>,
}

impl FieldValidator {
    pub fn new(client: Arc<dyn IssueTrackerClient>) -> Self {
        Self { client }
    }

    /// Resolves `field_id` in the account's schema and checks it holds numbers.
    pub async fn validate(
        &self,
        session: &AuthenticatedSession,
        field_id: &str,
    ) -> PointCountResult<FieldDescriptor> {
        ensure_active(session)?;

        let field = self
            .client
            .resolve_field(session, field_id)
            .await?
            .ok_or_else(|| PointCountError::FieldNotFound(field_id.to_string()))?;

        if !field.is_usable() {
            return Err(PointCountError::InvalidFieldType {
                field: field_id.to_string(),
                declared_type: field.declared_type.to_string(),
            });
        }

        debug!(field = %field_id, resolved_id = %field.id, "Field validated");
        Ok(field)
    }
}

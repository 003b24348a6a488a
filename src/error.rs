use thiserror::Error;

use crate::tracker::TrackerError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PointCountError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Field {field} has type {declared_type}, expected a number")]
    InvalidFieldType { field: String, declared_type: String },

    #[error("Invalid query: {}", .0.first().map(String::as_str).unwrap_or("unknown error"))]
    QueryInvalid(Vec<String>),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0}s")]
    TimedOut(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PointCountError {
    /// Stable tag used by the HTTP layer and in fault records.
    pub fn kind(&self) -> &'static str {
        match self {
            PointCountError::Auth(_) => "auth_error",
            PointCountError::FieldNotFound(_) => "field_not_found",
            PointCountError::InvalidFieldType { .. } => "invalid_field_type",
            PointCountError::QueryInvalid(_) => "query_invalid",
            PointCountError::Remote(_) => "remote_error",
            PointCountError::Input(_) => "input_error",
            PointCountError::Cancelled => "cancelled",
            PointCountError::TimedOut(_) => "timed_out",
            PointCountError::Internal(_) => "internal_error",
        }
    }

    /// Errors caused by what the caller sent, as opposed to the tracker or us.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PointCountError::Auth(_)
                | PointCountError::FieldNotFound(_)
                | PointCountError::InvalidFieldType { .. }
                | PointCountError::QueryInvalid(_)
                | PointCountError::Input(_)
        )
    }
}

impl From<TrackerError> for PointCountError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::Unauthorized(message) => PointCountError::Auth(message),
            other => PointCountError::Remote(other.to_string()),
        }
    }
}

pub type PointCountResult<T> = Result<T, PointCountError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_maps_to_auth() {
        let err: PointCountError = TrackerError::Unauthorized("bad token".to_string()).into();
        assert_eq!(err, PointCountError::Auth("bad token".to_string()));
        assert_eq!(err.kind(), "auth_error");
    }

    #[test]
    fn test_transport_failures_map_to_remote() {
        let err: PointCountError = TrackerError::Network("connection refused".to_string()).into();
        assert!(matches!(err, PointCountError::Remote(_)));

        let err: PointCountError = TrackerError::Status {
            status: 503,
            message: "unavailable".to_string(),
        }
        .into();
        assert!(matches!(err, PointCountError::Remote(ref m) if m.contains("503")));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_query_invalid_displays_primary_message() {
        let err = PointCountError::QueryInvalid(vec![
            "Field 'projekt' does not exist.".to_string(),
            "Expecting operator.".to_string(),
        ]);
        assert_eq!(err.to_string(), "Invalid query: Field 'projekt' does not exist.");
        assert!(err.is_client_error());
    }
}

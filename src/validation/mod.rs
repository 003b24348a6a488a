pub mod credentials;
pub mod field;
pub mod query;

pub use credentials::CredentialValidator;
pub use field::FieldValidator;
pub use query::{QueryValidation, QueryValidator};

use crate::error::{PointCountError, PointCountResult};
use crate::tracker::AuthenticatedSession;

/// Refuses sessions that an earlier call saw rejected, without going remote.
pub fn ensure_active(session: &AuthenticatedSession) -> PointCountResult<()> {
    if session.is_valid() {
        Ok(())
    } else {
        Err(PointCountError::Auth(format!(
            "session for {} on {} is no longer valid",
            session.user(),
            session.account()
        )))
    }
}

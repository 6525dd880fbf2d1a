//! Error types shared by the policy modules and the HTTP surface.

use std::time::Duration;

/// Result alias for guard operations.
pub type Result<T> = std::result::Result<T, GuardError>;

/// Errors produced by policy checks.
///
/// Each variant maps to an HTTP status via [`GuardError::status_code`]. Nothing
/// here is retried automatically; callers surface the error to the user.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// No authenticated principal was supplied.
    #[error("authentication required")]
    Unauthenticated,

    /// The principal lacks the permission or role required.
    #[error("access denied: {0}")]
    Unauthorized(String),

    /// The caller is rate limited for the given action.
    #[error("too many attempts, retry in {} seconds", retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },

    /// Input failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Configuration could not be loaded or applied.
    #[error("configuration error: {0}")]
    Config(String),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GuardError {
    /// HTTP status code associated with this error.
    pub fn status_code(&self) -> u16 {
        match self {
            GuardError::Unauthenticated => 401,
            GuardError::Unauthorized(_) => 403,
            GuardError::RateLimited { .. } => 429,
            GuardError::InvalidInput(_) => 400,
            GuardError::NotFound(_) => 404,
            GuardError::Config(_) | GuardError::Internal(_) => 500,
        }
    }

    /// Whether the error was caused by the caller rather than the service.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(GuardError::Unauthenticated.status_code(), 401);
        assert_eq!(GuardError::Unauthorized("x".into()).status_code(), 403);
        assert_eq!(
            GuardError::RateLimited { retry_after: Duration::from_secs(3) }.status_code(),
            429
        );
        assert_eq!(GuardError::Internal("boom".into()).status_code(), 500);
    }

    #[test]
    fn test_rate_limited_display_rounds_up() {
        let e = GuardError::RateLimited { retry_after: Duration::from_millis(200) };
        assert_eq!(e.to_string(), "too many attempts, retry in 1 seconds");
    }

    #[test]
    fn test_is_client_error() {
        assert!(GuardError::InvalidInput("bad".into()).is_client_error());
        assert!(!GuardError::Config("bad".into()).is_client_error());
    }
}

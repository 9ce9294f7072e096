use std::error::Error;
use std::fmt;

use warp::http::StatusCode;

#[derive(Debug)]
pub enum QuillgateError {
    // Credential errors
    InvalidCredentials,

    // Token errors
    InvalidToken(String),
    InvalidSignature,
    ExpiredToken,
    RevokedToken,

    // Identity provider errors
    ProviderUnavailable(String),

    // Account errors
    ConflictingAccount,
    IdentityAlreadyLinked,
    EmailTaken,

    // Validation errors
    ValidationError(String),

    // Storage errors
    StorageError(String),

    // System errors
    SystemError(String),

    // Configuration errors
    ConfigError(String),
}

impl fmt::Display for QuillgateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCredentials => write!(f, "Invalid credentials"),
            Self::InvalidToken(msg) => write!(f, "Invalid token: {}", msg),
            Self::InvalidSignature => write!(f, "Invalid token signature"),
            Self::ExpiredToken => write!(f, "Token expired"),
            Self::RevokedToken => write!(f, "Token revoked"),
            Self::ProviderUnavailable(msg) => write!(f, "Identity provider unavailable: {}", msg),
            Self::ConflictingAccount => write!(
                f,
                "An account with this email already exists and must be linked explicitly"
            ),
            Self::IdentityAlreadyLinked => write!(f, "External identity is already linked"),
            Self::EmailTaken => write!(f, "Email already registered"),
            Self::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Self::StorageError(msg) => write!(f, "Storage error: {}", msg),
            Self::SystemError(msg) => write!(f, "System error: {}", msg),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for QuillgateError {}

impl QuillgateError {
    /// Failures that end the current authentication attempt and must be
    /// reported to callers without detail
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials
                | Self::InvalidToken(_)
                | Self::InvalidSignature
                | Self::ExpiredToken
                | Self::RevokedToken
        )
    }

    /// Only an unreachable identity provider is worth retrying as-is
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_))
    }

    /// HTTP status used by the handlers
    pub fn status_code(&self) -> StatusCode {
        match self {
            e if e.is_auth_failure() => StatusCode::UNAUTHORIZED,
            Self::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ConflictingAccount | Self::IdentityAlreadyLinked | Self::EmailTaken => {
                StatusCode::CONFLICT
            }
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error code safe to hand to clients. Every authentication
    /// failure collapses into the same code to avoid account enumeration.
    pub fn public_code(&self) -> &'static str {
        match self {
            e if e.is_auth_failure() => "authentication_failed",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::ConflictingAccount | Self::IdentityAlreadyLinked => "account_link_required",
            Self::EmailTaken => "email_taken",
            Self::ValidationError(_) => "invalid_request",
            _ => "internal_error",
        }
    }
}

impl From<sqlx::Error> for QuillgateError {
    fn from(err: sqlx::Error) -> Self {
        QuillgateError::StorageError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for QuillgateError {
    fn from(err: tokio::task::JoinError) -> Self {
        QuillgateError::SystemError(format!("Blocking task failed: {}", err))
    }
}

// Generic result type for Quillgate
pub type Result<T> = std::result::Result<T, QuillgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failures_share_public_code() {
        let failures = [
            QuillgateError::InvalidCredentials,
            QuillgateError::InvalidToken("bad".to_string()),
            QuillgateError::InvalidSignature,
            QuillgateError::ExpiredToken,
            QuillgateError::RevokedToken,
        ];

        for err in &failures {
            assert_eq!(err.public_code(), "authentication_failed");
            assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_provider_unavailable_is_only_retryable_error() {
        let err = QuillgateError::ProviderUnavailable("timeout".to_string());
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        assert!(!QuillgateError::ConflictingAccount.is_retryable());
        assert!(!QuillgateError::StorageError("x".to_string()).is_retryable());
    }

    #[test]
    fn test_conflicting_account_maps_to_conflict() {
        assert_eq!(QuillgateError::ConflictingAccount.status_code(), StatusCode::CONFLICT);
        assert_eq!(QuillgateError::ConflictingAccount.public_code(), "account_link_required");
    }
}

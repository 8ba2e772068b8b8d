use thiserror::Error;

use crate::role::Role;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Identity provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Abuse control: {0}")]
    Abuse(#[from] AbuseError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Failures produced by the authentication pipeline itself, as opposed to
/// failures reported by the identity provider.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Malformed bearer token")]
    InvalidTokenFormat,

    #[error("Invalid token claims: {0}")]
    InvalidClaims(String),

    #[error("No user record resolvable for the verified identity")]
    UnknownIdentity,

    #[error("Email {email} is already linked to a different identity")]
    IdentityConflict { email: String },

    #[error("Account suspended")]
    AccountSuspended,

    #[error("Account inactive")]
    AccountInactive,

    #[error("Insufficient role: requires one of {required:?}, has {actual}")]
    InsufficientRole { required: Vec<Role>, actual: Role },
}

/// Closed translation of identity-provider failures.
///
/// Provider SDKs report errors as loosely-shaped code strings; adapters must
/// map them onto this enum at the boundary so nothing provider-specific leaks
/// into the pipeline.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Token expired")]
    Expired,

    #[error("Token revoked")]
    Revoked,

    #[error("Token malformed: {0}")]
    Malformed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("User not found at provider")]
    UserNotFound,

    #[error("User disabled at provider")]
    UserDisabled,

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Provider call timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Uniqueness violation: {0}")]
    UniqueViolation(String),

    #[error("Record not found")]
    NotFound,

    #[error("Store call timed out")]
    Timeout,
}

/// Expected abuse-mitigation outcomes. These are routine traffic, not server
/// faults, and must never be logged at error severity.
#[derive(Debug, Error)]
pub enum AbuseError {
    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Client is blacklisted")]
    Blacklisted,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid email format: {0}")]
    InvalidEmail(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

impl Error {
    /// Stable wire code for the structured error body.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Auth(AuthError::MissingToken) => "TOKEN_MISSING",
            Error::Auth(AuthError::InvalidTokenFormat) => "TOKEN_INVALID_FORMAT",
            Error::Auth(AuthError::InvalidClaims(_)) => "TOKEN_CLAIMS_INVALID",
            Error::Auth(AuthError::UnknownIdentity) => "USER_NOT_FOUND",
            Error::Auth(AuthError::IdentityConflict { .. }) => "IDENTITY_CONFLICT",
            Error::Auth(AuthError::AccountSuspended) => "ACCOUNT_SUSPENDED",
            Error::Auth(AuthError::AccountInactive) => "ACCOUNT_INACTIVE",
            Error::Auth(AuthError::InsufficientRole { .. }) => "FORBIDDEN",
            Error::Provider(ProviderError::Expired) => "TOKEN_EXPIRED",
            Error::Provider(ProviderError::Revoked) => "TOKEN_REVOKED",
            Error::Provider(ProviderError::Malformed(_)) => "TOKEN_INVALID",
            Error::Provider(ProviderError::InvalidArgument(_)) => "TOKEN_INVALID",
            Error::Provider(ProviderError::UserNotFound) => "USER_NOT_FOUND",
            Error::Provider(ProviderError::UserDisabled) => "ACCOUNT_DISABLED",
            Error::Provider(ProviderError::Unavailable(_)) => "INTERNAL",
            Error::Provider(ProviderError::Timeout) => "INTERNAL",
            Error::Storage(_) => "INTERNAL",
            Error::Abuse(AbuseError::RateLimited { .. }) => "RATE_LIMIT_EXCEEDED",
            Error::Abuse(AbuseError::Blacklisted) => "IP_BLACKLISTED",
            Error::Validation(_) => "VALIDATION_FAILED",
        }
    }

    /// Seconds the client should wait before retrying, for rate-limit errors.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Error::Abuse(AbuseError::RateLimited { retry_after_secs }) => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Whether this failure should feed the abuse tracker as a failed
    /// authentication attempt.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Error::Auth(
                AuthError::MissingToken
                    | AuthError::InvalidTokenFormat
                    | AuthError::InvalidClaims(_)
                    | AuthError::UnknownIdentity
            ) | Error::Provider(
                ProviderError::Expired
                    | ProviderError::Revoked
                    | ProviderError::Malformed(_)
                    | ProviderError::InvalidArgument(_)
                    | ProviderError::UserNotFound
            )
        )
    }

    /// Whether this is an expected abuse-mitigation outcome rather than a
    /// fault.
    pub fn is_abuse_outcome(&self) -> bool {
        matches!(self, Error::Abuse(_))
    }

    /// Whether the failure is caused by an upstream dependency rather than
    /// the request. These surface as 500s with detail suppressed in
    /// production.
    pub fn is_upstream_failure(&self) -> bool {
        matches!(
            self,
            Error::Provider(ProviderError::Unavailable(_) | ProviderError::Timeout)
                | Error::Storage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_are_stable() {
        assert_eq!(
            Error::Auth(AuthError::InvalidTokenFormat).code(),
            "TOKEN_INVALID_FORMAT"
        );
        assert_eq!(Error::Provider(ProviderError::Expired).code(), "TOKEN_EXPIRED");
        assert_eq!(
            Error::Abuse(AbuseError::RateLimited { retry_after_secs: 3 }).code(),
            "RATE_LIMIT_EXCEEDED"
        );
        assert_eq!(Error::Abuse(AbuseError::Blacklisted).code(), "IP_BLACKLISTED");
    }

    #[test]
    fn retry_after_only_on_rate_limit() {
        assert_eq!(
            Error::Abuse(AbuseError::RateLimited { retry_after_secs: 42 }).retry_after(),
            Some(42)
        );
        assert_eq!(Error::Abuse(AbuseError::Blacklisted).retry_after(), None);
    }

    #[test]
    fn provider_rejections_feed_the_abuse_tracker() {
        assert!(Error::Provider(ProviderError::Revoked).is_authentication_failure());
        assert!(Error::Auth(AuthError::InvalidTokenFormat).is_authentication_failure());
        assert!(!Error::Provider(ProviderError::UserDisabled).is_authentication_failure());
        assert!(!Error::Abuse(AbuseError::Blacklisted).is_authentication_failure());
    }
}

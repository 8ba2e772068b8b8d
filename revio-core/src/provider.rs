//! Identity-provider adapter boundary
//!
//! The external identity provider owns the canonical credential and issues
//! the bearer tokens this pipeline verifies. Adapters implement
//! [`IdentityProvider`] and translate the provider SDK's error shapes into
//! the closed [`ProviderError`](crate::error::ProviderError) enum at this
//! boundary; nothing provider-specific crosses it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Claims extracted from a verified bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// The provider-side uid (`sub`).
    pub subject: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub audience: String,
    pub issuer: String,
}

/// The provider's view of a user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderUser {
    pub external_id: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub disabled: bool,
}

/// The consumed surface of the external identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Cryptographically verify a bearer token, optionally checking the
    /// provider's revocation state, and return its claims.
    async fn verify_token(
        &self,
        token: &str,
        check_revoked: bool,
    ) -> Result<TokenClaims, ProviderError>;

    /// Fetch the provider account for an external id
    async fn get_user(&self, external_id: &str) -> Result<ProviderUser, ProviderError>;

    /// Create a provider account
    async fn create_user(
        &self,
        email: &str,
        password: Option<&str>,
    ) -> Result<ProviderUser, ProviderError>;

    /// Delete a provider account
    async fn delete_user(&self, external_id: &str) -> Result<(), ProviderError>;

    /// Mint a custom token for an external id with extra claims
    async fn create_custom_token(
        &self,
        external_id: &str,
        claims: &serde_json::Value,
    ) -> Result<String, ProviderError>;

    /// Invalidate all refresh tokens for an account; used on logout and
    /// forced sign-out
    async fn revoke_refresh_tokens(&self, external_id: &str) -> Result<(), ProviderError>;

    /// Generate a password-reset link for an email
    async fn password_reset_link(&self, email: &str) -> Result<String, ProviderError>;

    /// Generate an email-verification link for an email
    async fn email_verification_link(&self, email: &str) -> Result<String, ProviderError>;

    /// Confirm a password-reset code and set the new password
    async fn confirm_password_reset(
        &self,
        code: &str,
        new_password: &str,
    ) -> Result<(), ProviderError>;
}

//! User records and the user-store boundary
//!
//! The relational store owning user records is an external collaborator; this
//! module defines the record shape the pipeline consumes and the repository
//! trait it consumes it through. The store enforces uniqueness on both the
//! external identity id and the email; `create` must surface a violation as
//! [`StorageError::UniqueViolation`](crate::error::StorageError) so the
//! reconciler can treat "someone else just created it" as a re-fetch, not a
//! failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, error::ValidationError, role::Role};

/// A unique, stable identifier for a user. Internal primary key, distinct
/// from the external identity-provider uid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    pub fn new(id: Uuid) -> Self {
        UserId(id)
    }

    pub fn new_random() -> Self {
        UserId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new_random()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user record as persisted by the external store.
///
/// | Field               | Description                                          |
/// | ------------------- | ---------------------------------------------------- |
/// | `id`                | Internal primary key.                                |
/// | `external_id`       | Identity-provider uid; `None` until linked.          |
/// | `email`             | Unique email.                                        |
/// | `role`              | Closed [`Role`].                                     |
/// | `suspended`         | Administrative suspension flag.                      |
/// | `email_verified_at` | When the email was verified, if ever.                |
/// | `last_login_at`     | Most recent successful authentication.               |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub external_id: Option<String>,
    pub email: String,
    pub role: Role,
    pub suspended: bool,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn builder() -> UserRecordBuilder {
        UserRecordBuilder::default()
    }

    pub fn is_email_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }
}

#[derive(Default)]
pub struct UserRecordBuilder {
    id: Option<UserId>,
    external_id: Option<String>,
    email: Option<String>,
    role: Option<Role>,
    suspended: bool,
    email_verified_at: Option<DateTime<Utc>>,
    last_login_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl UserRecordBuilder {
    pub fn id(mut self, id: UserId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn external_id(mut self, external_id: Option<String>) -> Self {
        self.external_id = external_id;
        self
    }

    pub fn email(mut self, email: String) -> Self {
        self.email = Some(email);
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn suspended(mut self, suspended: bool) -> Self {
        self.suspended = suspended;
        self
    }

    pub fn email_verified_at(mut self, email_verified_at: Option<DateTime<Utc>>) -> Self {
        self.email_verified_at = email_verified_at;
        self
    }

    pub fn last_login_at(mut self, last_login_at: Option<DateTime<Utc>>) -> Self {
        self.last_login_at = last_login_at;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    pub fn build(self) -> Result<UserRecord, Error> {
        let now = Utc::now();
        Ok(UserRecord {
            id: self.id.unwrap_or_default(),
            external_id: self.external_id,
            email: self.email.ok_or(ValidationError::MissingField(
                "Email is required".to_string(),
            ))?,
            role: self.role.unwrap_or(Role::Client),
            suspended: self.suspended,
            email_verified_at: self.email_verified_at,
            last_login_at: self.last_login_at,
            created_at: self.created_at.unwrap_or(now),
            updated_at: self.updated_at.unwrap_or(now),
        })
    }
}

/// Payload for provisioning a user record on first authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUserRecord {
    pub id: UserId,
    pub external_id: Option<String>,
    pub email: String,
    pub role: Role,
    pub email_verified_at: Option<DateTime<Utc>>,
}

impl NewUserRecord {
    /// A first-login record: least-privileged non-admin role, active,
    /// unverified.
    pub fn provisioned(external_id: String, email: String) -> Self {
        Self {
            id: UserId::new_random(),
            external_id: Some(external_id),
            email,
            role: Role::Client,
            email_verified_at: None,
        }
    }
}

/// Repository for user record access, implemented against the external
/// store.
#[async_trait]
pub trait UserRepository: Send + Sync + 'static {
    /// Create a new user record. Must return
    /// [`StorageError::UniqueViolation`](crate::error::StorageError) when the
    /// store's uniqueness constraint on external id or email fires.
    async fn create(&self, user: NewUserRecord) -> Result<UserRecord, Error>;

    /// Find a user record by internal id
    async fn find_by_id(&self, id: &UserId) -> Result<Option<UserRecord>, Error>;

    /// Find a user record by external identity id
    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<UserRecord>, Error>;

    /// Find a user record by email
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, Error>;

    /// Attach an external identity id to an existing record. Idempotent when
    /// the record already carries the same external id.
    async fn link_external_id(
        &self,
        id: &UserId,
        external_id: &str,
    ) -> Result<UserRecord, Error>;

    /// Record the most recent successful authentication
    async fn set_last_login(&self, id: &UserId, at: DateTime<Utc>) -> Result<(), Error>;

    /// Update an existing user record
    async fn update(&self, user: &UserRecord) -> Result<UserRecord, Error>;

    /// Delete a user record by internal id
    async fn delete(&self, id: &UserId) -> Result<(), Error>;
}

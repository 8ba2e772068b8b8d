//! Identity reconciliation
//!
//! Maps a verified external identity onto an internal user record: lookup by
//! external id, fall back to email linking for pre-existing accounts,
//! provision on first login. The look-up-or-create sequence is a
//! check-then-act race under concurrent first logins; the store's uniqueness
//! constraints are the arbiter: a uniqueness violation on insert means
//! another request won the race, so re-fetch instead of failing.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;

use crate::{
    Error,
    error::{AuthError, StorageError},
    events::{AuditDispatcher, SecurityEvent, SecurityEventKind},
    principal::{ConnectionInfo, Principal},
    token::VerifiedIdentity,
    user::{NewUserRecord, UserRecord, UserRepository},
    validation::validate_email,
};

/// Service resolving verified external identities to [`Principal`]s.
pub struct IdentityReconciler<R: UserRepository> {
    users: Arc<R>,
    audit: AuditDispatcher,
    /// Bound on each store round-trip, so a slow store cannot exhaust the
    /// server's concurrency budget.
    store_timeout: StdDuration,
}

impl<R: UserRepository> IdentityReconciler<R> {
    pub fn new(users: Arc<R>, audit: AuditDispatcher, store_timeout: StdDuration) -> Self {
        Self {
            users,
            audit,
            store_timeout,
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        tokio::time::timeout(self.store_timeout, call)
            .await
            .map_err(|_| Error::from(StorageError::Timeout))?
    }

    /// Resolve a verified identity to a Principal, provisioning or linking a
    /// user record as needed.
    pub async fn reconcile(
        &self,
        identity: &VerifiedIdentity,
        conn: &ConnectionInfo,
    ) -> Result<Principal, Error> {
        let record = self.resolve_record(identity, conn).await?;

        if record.suspended {
            return Err(AuthError::AccountSuspended.into());
        }
        if !record.role.is_active() {
            return Err(AuthError::AccountInactive.into());
        }

        // Best-effort: a failed last-login write must not fail the request.
        if let Err(e) = self
            .bounded(self.users.set_last_login(&record.id, Utc::now()))
            .await
        {
            tracing::warn!(error = %e, user_id = %record.id, "failed to update last login");
        }

        Ok(Principal::from_record(
            &record,
            identity.external_id.clone(),
            conn,
        ))
    }

    async fn resolve_record(
        &self,
        identity: &VerifiedIdentity,
        conn: &ConnectionInfo,
    ) -> Result<UserRecord, Error> {
        if let Some(record) = self
            .bounded(self.users.find_by_external_id(&identity.external_id))
            .await?
        {
            return Ok(record);
        }

        let Some(email) = identity.email.as_deref() else {
            return Err(AuthError::UnknownIdentity.into());
        };

        match self.bounded(self.users.find_by_email(email)).await? {
            Some(record) if record.external_id.is_none() => {
                // Pre-existing account migrating onto the identity provider.
                let linked = self
                    .bounded(
                        self.users
                            .link_external_id(&record.id, &identity.external_id),
                    )
                    .await?;
                self.audit
                    .emit(
                        SecurityEvent::new(
                            SecurityEventKind::IdentityLinked,
                            serde_json::json!({
                                "user_id": linked.id.to_string(),
                                "email": linked.email,
                            }),
                        )
                        .with_client_key(conn.ip.clone().unwrap_or_default()),
                    )
                    .await;
                Ok(linked)
            }
            Some(record) if record.external_id.as_deref() == Some(&identity.external_id) => {
                // The external-id lookup raced a concurrent link; the record
                // is already ours.
                Ok(record)
            }
            Some(_) => {
                self.audit
                    .emit(
                        SecurityEvent::new(
                            SecurityEventKind::IdentityConflict,
                            serde_json::json!({ "email": email }),
                        )
                        .with_client_key(conn.ip.clone().unwrap_or_default()),
                    )
                    .await;
                Err(AuthError::IdentityConflict {
                    email: email.to_string(),
                }
                .into())
            }
            None => self.provision(identity, email, conn).await,
        }
    }

    async fn provision(
        &self,
        identity: &VerifiedIdentity,
        email: &str,
        conn: &ConnectionInfo,
    ) -> Result<UserRecord, Error> {
        validate_email(email)?;

        let new_record = NewUserRecord::provisioned(identity.external_id.clone(), email.to_string());

        match self.bounded(self.users.create(new_record)).await {
            Ok(record) => {
                self.audit
                    .emit(
                        SecurityEvent::new(
                            SecurityEventKind::AccountProvisioned,
                            serde_json::json!({
                                "user_id": record.id.to_string(),
                                "email": record.email,
                                "role": record.role,
                            }),
                        )
                        .with_client_key(conn.ip.clone().unwrap_or_default()),
                    )
                    .await;
                Ok(record)
            }
            Err(Error::Storage(StorageError::UniqueViolation(detail))) => {
                // A concurrent first login inserted the record between our
                // lookups. Re-fetch rather than fail.
                tracing::debug!(email, detail, "concurrent provision detected, re-fetching");

                if let Some(record) = self
                    .bounded(self.users.find_by_external_id(&identity.external_id))
                    .await?
                {
                    return Ok(record);
                }
                match self.bounded(self.users.find_by_email(email)).await? {
                    Some(record) if record.external_id.is_none() => {
                        self.bounded(
                            self.users
                                .link_external_id(&record.id, &identity.external_id),
                        )
                        .await
                    }
                    Some(record)
                        if record.external_id.as_deref() == Some(&identity.external_id) =>
                    {
                        Ok(record)
                    }
                    Some(_) => Err(AuthError::IdentityConflict {
                        email: email.to_string(),
                    }
                    .into()),
                    None => Err(StorageError::UniqueViolation(detail).into()),
                }
            }
            Err(e) => Err(e),
        }
    }
}

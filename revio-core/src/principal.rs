//! The authenticated actor attached to a request
//!
//! A [`Principal`] is built fresh per request by the identity reconciler and
//! is read-only to downstream handlers. It never persists; only the backing
//! user record does.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{role::Role, user::{UserId, UserRecord}};

/// Transport-level facts about the connection a request arrived on.
#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    /// Internal primary key, used for all data-ownership checks.
    pub user_id: UserId,
    /// Identity-provider uid, used for calls back to the provider
    /// (logout, revocation).
    pub external_id: String,
    pub email: String,
    pub role: Role,
    pub email_verified: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl Principal {
    pub fn from_record(record: &UserRecord, external_id: String, conn: &ConnectionInfo) -> Self {
        Self {
            user_id: record.id,
            external_id,
            email: record.email.clone(),
            role: record.role,
            email_verified: record.is_email_verified(),
            last_login_at: record.last_login_at,
            ip_address: conn.ip.clone(),
            user_agent: conn.user_agent.clone(),
        }
    }
}

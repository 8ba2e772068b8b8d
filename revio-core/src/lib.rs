//! Core security pipeline for the Revio review-management backend
//!
//! This crate implements the authentication/authorization/abuse-mitigation
//! core the HTTP layer composes into a middleware chain:
//!
//! - [`TokenValidator`]: structural then cryptographic verification of
//!   bearer tokens against the external identity provider.
//! - [`IdentityReconciler`]: maps a verified external identity onto an
//!   internal user record, provisioning or linking on first login.
//! - [`AbuseTracker`]: failed-attempt logs, suspicion scores, and the IP
//!   blacklist.
//! - [`RateLimiter`] / [`SlowDown`]: fixed-window counters with tiered
//!   policies and graduated delay.
//! - [`access`]: the role-hierarchy-aware authorization gate.
//!
//! The identity provider and the user store are external collaborators
//! consumed through [`IdentityProvider`] and [`UserRepository`]; nothing in
//! this crate persists anything itself, and all abuse state is process-local
//! and cleared by a restart.

pub mod abuse;
pub mod access;
pub mod config;
pub mod error;
pub mod events;
pub mod id;
pub mod limiter;
pub mod maintenance;
pub mod principal;
pub mod provider;
pub mod reconciler;
pub mod role;
pub mod token;
pub mod user;
pub mod validation;

pub use abuse::{AbuseConfig, AbuseTracker};
pub use access::{AccessGate, authorize};
pub use config::{CookieSameSite, SecurityConfig};
pub use error::Error;
pub use events::{AuditDispatcher, AuditSink, SecurityEvent, SecurityEventKind, TracingAuditSink};
pub use limiter::{RateLimitPolicy, RateLimiter, SlowDown, SlowDownPolicy, normalize_client_key};
pub use maintenance::{Sweep, start_sweep_task};
pub use principal::{ConnectionInfo, Principal};
pub use provider::{IdentityProvider, ProviderUser, TokenClaims};
pub use reconciler::IdentityReconciler;
pub use role::Role;
pub use token::{TokenValidator, VerifiedIdentity};
pub use user::{NewUserRecord, UserId, UserRecord, UserRepository};

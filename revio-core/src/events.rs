//! Structured security events and the audit sink boundary
//!
//! Every short-circuit in the middleware chain, every denial from the access
//! gate, and every provisioning/linking decision made by the reconciler is
//! recorded as a [`SecurityEvent`] and dispatched to the registered
//! [`AuditSink`]s. Sink failures are logged and swallowed; audit emission
//! must never fail a request.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{Error, id::generate_prefixed_id};

/// The pipeline stage a security event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    IpBlacklistCheck,
    GlobalRateLimit,
    RouteRateLimit,
    TokenValidate,
    IdentityReconcile,
    AccessControl,
    Handler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    AuthenticationFailed,
    AuthorizationDenied,
    RateLimitExceeded,
    IpBlacklisted,
    BruteForceSuspected,
    AccountProvisioned,
    IdentityLinked,
    IdentityConflict,
    Logout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Opaque `evt_`-prefixed id.
    pub id: String,
    pub kind: SecurityEventKind,
    /// Normalized client key the event is attributed to, when one exists.
    pub client_key: Option<String>,
    pub stage: Option<PipelineStage>,
    pub timestamp: DateTime<Utc>,
    pub detail: serde_json::Value,
}

impl SecurityEvent {
    pub fn new(kind: SecurityEventKind, detail: serde_json::Value) -> Self {
        Self {
            id: generate_prefixed_id("evt"),
            kind,
            client_key: None,
            stage: None,
            timestamp: Utc::now(),
            detail,
        }
    }

    pub fn with_client_key(mut self, client_key: impl Into<String>) -> Self {
        self.client_key = Some(client_key.into());
        self
    }

    pub fn with_stage(mut self, stage: PipelineStage) -> Self {
        self.stage = Some(stage);
        self
    }
}

/// A destination for security events.
#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    async fn record(&self, event: &SecurityEvent) -> Result<(), Error>;
}

/// Dispatches security events to all registered sinks.
///
/// A failing sink is logged and skipped; the remaining sinks still receive
/// the event.
#[derive(Clone)]
pub struct AuditDispatcher {
    sinks: Arc<RwLock<Vec<Arc<dyn AuditSink>>>>,
}

impl Default for AuditDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditDispatcher {
    pub fn new() -> Self {
        Self {
            sinks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register an audit sink with the dispatcher
    pub async fn register(&self, sink: Arc<dyn AuditSink>) {
        self.sinks.write().await.push(sink);
    }

    /// Emit an event to all registered sinks
    pub async fn emit(&self, event: SecurityEvent) {
        for sink in self.sinks.read().await.iter() {
            if let Err(e) = sink.record(&event).await {
                tracing::warn!(error = %e, event_id = %event.id, "Audit sink rejected event");
            }
        }
    }
}

/// Default sink writing events to the tracing subscriber.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: &SecurityEvent) -> Result<(), Error> {
        tracing::info!(
            event_id = %event.id,
            kind = ?event.kind,
            client_key = event.client_key.as_deref().unwrap_or("-"),
            stage = ?event.stage,
            detail = %event.detail,
            "security event"
        );
        Ok(())
    }
}

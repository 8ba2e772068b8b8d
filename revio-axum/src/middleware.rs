//! The ordered security middleware chain
//!
//! Per request: IP blacklist check → global rate limit → route rate
//! limit/slow-down → token validation → identity reconciliation →
//! (access control) → handler → response headers. Any stage short-circuits
//! into a structured error response that carries the hardening headers,
//! emits a security event, and (for authentication failures) feeds the
//! abuse tracker.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use revio_core::{
    AbuseTracker, AccessGate, AuditDispatcher, ConnectionInfo, IdentityProvider,
    IdentityReconciler, Principal, RateLimiter, Role, SecurityConfig, SecurityEvent,
    SecurityEventKind, SlowDown, Sweep, TokenValidator, UserRepository,
    error::AuthError,
    events::PipelineStage,
    normalize_client_key, start_sweep_task,
};

use crate::error::{SecurityError, harden_headers};

/// Normalized client key for the request, attached as a request extension by
/// [`ip_guard`] and reused by every later stage.
#[derive(Debug, Clone)]
pub struct ClientKey(pub String);

/// Shared state composing the pipeline components.
pub struct SecurityState<P: IdentityProvider, R: UserRepository> {
    pub provider: Arc<P>,
    pub validator: Arc<TokenValidator<P>>,
    pub reconciler: Arc<IdentityReconciler<R>>,
    pub abuse: Arc<AbuseTracker>,
    pub global_limiter: Arc<RateLimiter>,
    pub auth_limiter: Arc<RateLimiter>,
    pub sensitive_limiter: Arc<RateLimiter>,
    pub slow_down: Arc<SlowDown>,
    pub audit: AuditDispatcher,
    pub config: Arc<SecurityConfig>,
}

impl<P: IdentityProvider, R: UserRepository> Clone for SecurityState<P, R> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            validator: self.validator.clone(),
            reconciler: self.reconciler.clone(),
            abuse: self.abuse.clone(),
            global_limiter: self.global_limiter.clone(),
            auth_limiter: self.auth_limiter.clone(),
            sensitive_limiter: self.sensitive_limiter.clone(),
            slow_down: self.slow_down.clone(),
            audit: self.audit.clone(),
            config: self.config.clone(),
        }
    }
}

impl<P: IdentityProvider, R: UserRepository> SecurityState<P, R> {
    pub fn new(provider: Arc<P>, users: Arc<R>, config: SecurityConfig) -> Self {
        let audit = AuditDispatcher::new();
        let mut abuse_config = config.abuse.clone();
        abuse_config.enabled = config.brute_force_protection;

        Self {
            validator: Arc::new(TokenValidator::new(
                provider.clone(),
                config.provider_timeout,
            )),
            reconciler: Arc::new(IdentityReconciler::new(
                users,
                audit.clone(),
                config.store_timeout,
            )),
            abuse: Arc::new(AbuseTracker::new(abuse_config)),
            global_limiter: Arc::new(RateLimiter::new(config.global_limit.clone())),
            auth_limiter: Arc::new(RateLimiter::new(config.auth_limit.clone())),
            sensitive_limiter: Arc::new(RateLimiter::new(config.sensitive_limit.clone())),
            slow_down: Arc::new(SlowDown::new(config.slow_down.clone())),
            audit,
            config: Arc::new(config),
            provider,
        }
    }

    /// Spawn the periodic sweep over every time-windowed component.
    pub fn start_cleanup_task(
        &self,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let components: Vec<Arc<dyn Sweep>> = vec![
            self.abuse.clone(),
            self.global_limiter.clone(),
            self.auth_limiter.clone(),
            self.sensitive_limiter.clone(),
            self.slow_down.clone(),
        ];
        start_sweep_task(components, self.config.sweep_interval, shutdown)
    }

    /// Short-circuit a request: log at a severity matching the failure
    /// class, feed the abuse tracker for authentication failures, emit the
    /// security event, and build the response error.
    async fn deny(
        &self,
        stage: PipelineStage,
        client_key: &str,
        error: revio_core::Error,
    ) -> SecurityError {
        if error.is_abuse_outcome() {
            // Expected traffic; never server-error noise.
            tracing::debug!(client_key, stage = ?stage, code = error.code(), "request denied");
        } else if error.is_upstream_failure() {
            tracing::error!(client_key, stage = ?stage, error = %error, "upstream failure");
        } else {
            tracing::info!(client_key, stage = ?stage, code = error.code(), "request denied");
        }

        if self.config.brute_force_protection && error.is_authentication_failure() {
            let recent = self.abuse.record_failure(client_key, error.code());
            if recent >= self.abuse.config().max_recent_failures {
                self.audit
                    .emit(
                        SecurityEvent::new(
                            SecurityEventKind::BruteForceSuspected,
                            serde_json::json!({ "recent_failures": recent }),
                        )
                        .with_client_key(client_key)
                        .with_stage(stage),
                    )
                    .await;
            }
        }

        let kind = match &error {
            revio_core::Error::Abuse(revio_core::error::AbuseError::Blacklisted) => {
                SecurityEventKind::IpBlacklisted
            }
            revio_core::Error::Abuse(_) => SecurityEventKind::RateLimitExceeded,
            revio_core::Error::Auth(AuthError::InsufficientRole { .. }) => {
                SecurityEventKind::AuthorizationDenied
            }
            _ => SecurityEventKind::AuthenticationFailed,
        };
        self.audit
            .emit(
                SecurityEvent::new(kind, serde_json::json!({ "code": error.code() }))
                    .with_client_key(client_key)
                    .with_stage(stage),
            )
            .await;

        SecurityError::new(error, stage, self.config.expose_error_detail)
    }

    /// Run token validation and identity reconciliation for a request.
    async fn authenticate(
        &self,
        token: Option<String>,
        conn: &ConnectionInfo,
    ) -> Result<Principal, (PipelineStage, revio_core::Error)> {
        let token =
            token.ok_or((PipelineStage::TokenValidate, AuthError::MissingToken.into()))?;

        let identity = self
            .validator
            .validate(&token)
            .await
            .map_err(|e| (PipelineStage::TokenValidate, e))?;

        self.reconciler
            .reconcile(&identity, conn)
            .await
            .map_err(|e| (PipelineStage::IdentityReconcile, e))
    }
}

fn extract_bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get("Authorization")
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(|token| token.to_string())
}

/// The raw client IP: first `X-Forwarded-For` hop when present (the chain
/// sits behind the platform's proxy), otherwise the socket peer address.
fn raw_client_ip(request: &Request) -> Option<String> {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
    {
        let first = forwarded.trim();
        if !first.is_empty() {
            return Some(first.to_string());
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn connection_info(request: &Request) -> ConnectionInfo {
    ConnectionInfo {
        ip: raw_client_ip(request),
        user_agent: request
            .headers()
            .get("user-agent")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string()),
    }
}

/// Fetch the client key attached by [`ip_guard`], or derive one for routes
/// mounted without it.
pub(crate) fn client_key(request: &Request) -> String {
    if let Some(ClientKey(key)) = request.extensions().get::<ClientKey>() {
        return key.clone();
    }
    raw_client_ip(request)
        .map(|ip| normalize_client_key(&ip))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Entry stage: normalize the client key and reject blacklisted clients
/// before anything else runs.
pub async fn ip_guard<P, R>(
    State(state): State<SecurityState<P, R>>,
    mut request: Request,
    next: Next,
) -> Result<Response, SecurityError>
where
    P: IdentityProvider,
    R: UserRepository,
{
    let key = client_key(&request);
    request.extensions_mut().insert(ClientKey(key.clone()));

    if state.config.ip_blacklist && state.abuse.is_blacklisted(&key) {
        return Err(state
            .deny(
                PipelineStage::IpBlacklistCheck,
                &key,
                revio_core::error::AbuseError::Blacklisted.into(),
            )
            .await);
    }

    Ok(next.run(request).await)
}

/// Generous limit applied to all routes.
pub async fn global_rate_limit<P, R>(
    State(state): State<SecurityState<P, R>>,
    request: Request,
    next: Next,
) -> Result<Response, SecurityError>
where
    P: IdentityProvider,
    R: UserRepository,
{
    let key = client_key(&request);
    if let Err(e) = state.global_limiter.check(&key) {
        return Err(state.deny(PipelineStage::GlobalRateLimit, &key, e).await);
    }

    Ok(next.run(request).await)
}

/// Stricter limit plus graduated slow-down for authentication-sensitive
/// routes.
pub async fn auth_rate_limit<P, R>(
    State(state): State<SecurityState<P, R>>,
    request: Request,
    next: Next,
) -> Result<Response, SecurityError>
where
    P: IdentityProvider,
    R: UserRepository,
{
    let key = client_key(&request);

    if state.config.strict_rate_limit {
        if let Err(e) = state.auth_limiter.check(&key) {
            return Err(state.deny(PipelineStage::RouteRateLimit, &key, e).await);
        }
    }

    if let Some(delay) = state.slow_down.delay_for(&key) {
        tracing::debug!(client_key = %key, delay_ms = delay.as_millis() as u64, "slow-down applied");
        tokio::time::sleep(delay).await;
    }

    Ok(next.run(request).await)
}

/// Very strict limit for high-risk endpoints (password reset, signup).
pub async fn sensitive_rate_limit<P, R>(
    State(state): State<SecurityState<P, R>>,
    request: Request,
    next: Next,
) -> Result<Response, SecurityError>
where
    P: IdentityProvider,
    R: UserRepository,
{
    let key = client_key(&request);
    if let Err(e) = state.sensitive_limiter.check(&key) {
        return Err(state.deny(PipelineStage::RouteRateLimit, &key, e).await);
    }

    Ok(next.run(request).await)
}

/// Token validation + identity reconciliation; rejects without a Principal.
pub async fn require_auth<P, R>(
    State(state): State<SecurityState<P, R>>,
    mut request: Request,
    next: Next,
) -> Result<Response, SecurityError>
where
    P: IdentityProvider,
    R: UserRepository,
{
    let key = client_key(&request);
    let conn = connection_info(&request);
    let token = extract_bearer_token(&request);

    match state.authenticate(token, &conn).await {
        Ok(principal) => {
            state.abuse.clear_on_success(&key);
            request.extensions_mut().insert(principal);
            Ok(next.run(request).await)
        }
        Err((stage, error)) => Err(state.deny(stage, &key, error).await),
    }
}

/// Best-effort variant: authentication failures are swallowed and the
/// request proceeds without a Principal.
pub async fn optional_auth<P, R>(
    State(state): State<SecurityState<P, R>>,
    mut request: Request,
    next: Next,
) -> Response
where
    P: IdentityProvider,
    R: UserRepository,
{
    request.extensions_mut().insert(None::<Principal>);

    let key = client_key(&request);
    let conn = connection_info(&request);
    let token = extract_bearer_token(&request);

    match state.authenticate(token, &conn).await {
        Ok(principal) => {
            state.abuse.clear_on_success(&key);
            request.extensions_mut().insert(principal.clone());
            request.extensions_mut().insert(Some(principal));
        }
        Err((stage, error)) => {
            tracing::debug!(client_key = %key, stage = ?stage, code = error.code(), "optional auth skipped");
        }
    }

    next.run(request).await
}

/// Role requirement for a route subtree, applied after [`require_auth`].
#[derive(Clone)]
pub struct RoleGate {
    allowed: Arc<Vec<Role>>,
    strict: bool,
    gate: Arc<AccessGate>,
    expose_detail: bool,
}

impl RoleGate {
    pub fn new(allowed: Vec<Role>, strict: bool, audit: AuditDispatcher) -> Self {
        Self {
            allowed: Arc::new(allowed),
            strict,
            gate: Arc::new(AccessGate::new(audit)),
            expose_detail: false,
        }
    }
}

pub async fn require_role(
    State(gate): State<RoleGate>,
    request: Request,
    next: Next,
) -> Result<Response, SecurityError> {
    let principal = request.extensions().get::<Principal>().cloned().ok_or_else(|| {
        SecurityError::new(
            AuthError::MissingToken.into(),
            PipelineStage::AccessControl,
            gate.expose_detail,
        )
    })?;

    gate.gate
        .check(&principal, &gate.allowed, gate.strict)
        .await
        .map_err(|e| SecurityError::new(e, PipelineStage::AccessControl, gate.expose_detail))?;

    Ok(next.run(request).await)
}

/// Terminal stage: hardening headers on every response, whichever path
/// produced it.
pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    harden_headers(response.headers_mut());
    response
}

/// CORS layer derived from the configured allowed origins.
///
/// A single `"*"` entry opens the surface to any origin without
/// credentials; an explicit list allows credentialed requests from exactly
/// those origins. An empty list denies all cross-origin access.
pub fn cors_layer(origins: &[String]) -> tower_http::cors::CorsLayer {
    use axum::http::{HeaderValue, Method, header};
    use tower_http::cors::{AllowOrigin, Any, CorsLayer};

    let wildcard = origins.len() == 1 && origins[0] == "*";
    if wildcard {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
    }
}


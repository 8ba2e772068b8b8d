use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
};
use axum_extra::extract::{CookieJar, cookie::Cookie};
use revio_core::{
    IdentityProvider, SecurityEvent, SecurityEventKind, UserRepository,
    error::ProviderError, events::PipelineStage,
};

use crate::{
    error::{Result, SecurityError},
    extractors::AuthPrincipal,
    middleware::{
        SecurityState, auth_rate_limit, cors_layer, global_rate_limit, ip_guard, require_auth,
        security_headers, sensitive_rate_limit,
    },
    types::*,
};

/// Build the secured router: public health, authenticated session routes,
/// and the sensitive password-reset entry point, each behind its rate-limit
/// tier, all behind the blacklist check, the global limit, and the response
/// hardening layer.
pub fn create_router<P, R>(state: SecurityState<P, R>, cookie_config: CookieConfig) -> Router
where
    P: IdentityProvider,
    R: UserRepository,
{
    let public_routes = Router::new().route("/health", get(health_handler));

    let session_routes = Router::new()
        .route("/me", get(me_handler))
        .route(
            "/logout",
            post(logout_handler::<P, R>).delete(logout_handler::<P, R>),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_auth::<P, R>,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_rate_limit::<P, R>,
        ));

    let sensitive_routes = Router::new()
        .route("/password-reset", post(password_reset_handler::<P, R>))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            sensitive_rate_limit::<P, R>,
        ));

    Router::new()
        .merge(public_routes)
        .merge(session_routes)
        .merge(sensitive_routes)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            global_rate_limit::<P, R>,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            ip_guard::<P, R>,
        ))
        .layer(axum::middleware::from_fn(security_headers))
        .layer(cors_layer(&state.config.allowed_origins))
        .with_state(state)
        .layer(axum::Extension(cookie_config))
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn me_handler(AuthPrincipal(principal): AuthPrincipal) -> impl IntoResponse {
    Json(PrincipalResponse { principal })
}

async fn logout_handler<P, R>(
    State(state): State<SecurityState<P, R>>,
    axum::Extension(cookie_config): axum::Extension<CookieConfig>,
    jar: CookieJar,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<impl IntoResponse>
where
    P: IdentityProvider,
    R: UserRepository,
{
    tokio::time::timeout(
        state.config.provider_timeout,
        state.provider.revoke_refresh_tokens(&principal.external_id),
    )
    .await
    .unwrap_or(Err(ProviderError::Timeout))
    .map_err(|e| {
        SecurityError::new(
            e.into(),
            PipelineStage::Handler,
            state.config.expose_error_detail,
        )
    })?;

    state
        .audit
        .emit(
            SecurityEvent::new(
                SecurityEventKind::Logout,
                serde_json::json!({ "user_id": principal.user_id.to_string() }),
            )
            .with_client_key(principal.ip_address.clone().unwrap_or_default())
            .with_stage(PipelineStage::Handler),
        )
        .await;

    let jar = jar.remove(Cookie::from(cookie_config.name.clone()));

    Ok((
        jar,
        Json(MessageResponse {
            message: "Successfully logged out".to_string(),
        }),
    ))
}

/// Sends a password-reset link through the identity provider. Responds
/// identically whether or not the email exists, to prevent user
/// enumeration.
async fn password_reset_handler<P, R>(
    State(state): State<SecurityState<P, R>>,
    Json(payload): Json<PasswordResetRequest>,
) -> Result<impl IntoResponse>
where
    P: IdentityProvider,
    R: UserRepository,
{
    revio_core::validation::validate_email(&payload.email).map_err(|e| {
        SecurityError::new(
            e.into(),
            PipelineStage::Handler,
            state.config.expose_error_detail,
        )
    })?;

    let link = tokio::time::timeout(
        state.config.provider_timeout,
        state.provider.password_reset_link(&payload.email),
    )
    .await
    .unwrap_or(Err(ProviderError::Timeout));
    if let Err(e) = link {
        tracing::debug!(error = %e, "password reset link not generated");
    }

    Ok(Json(PasswordResetResponse {
        message: "If the address exists, a reset link has been sent".to_string(),
    }))
}

/// Convenience wrapper mirroring the builder entry point.
pub fn routes<P, R>(
    provider: Arc<P>,
    users: Arc<R>,
    config: revio_core::SecurityConfig,
) -> Router
where
    P: IdentityProvider,
    R: UserRepository,
{
    let cookie_config = CookieConfig::from_security(&config);
    let state = SecurityState::new(provider, users, config);
    create_router(state, cookie_config)
}

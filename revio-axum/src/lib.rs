//! # Revio Axum Integration
//!
//! Axum middleware and routes for the Revio security core. The crate
//! composes the pipeline components from `revio-core` into the ordered
//! request chain:
//!
//! blacklist check → global rate limit → route rate limit/slow-down →
//! token validation → identity reconciliation → (access control) →
//! handler → response hardening.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use revio_axum::{SecurityState, create_router, CookieConfig};
//! use revio_core::SecurityConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Adapters for the external identity provider and user store
//!     let provider = Arc::new(MyIdpAdapter::from_env());
//!     let users = Arc::new(MyUserStore::connect().await);
//!
//!     let config = SecurityConfig::from_env();
//!     let cookie_config = CookieConfig::from_security(&config);
//!     let state = SecurityState::new(provider, users, config);
//!
//!     // Periodic sweep of abuse-tracking state
//!     let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!     state.start_cleanup_task(shutdown_rx);
//!
//!     let app = create_router(state, cookie_config);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(
//!         listener,
//!         app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
//!     )
//!     .await
//!     .unwrap();
//! }
//! ```

mod error;
mod extractors;
mod middleware;
mod routes;
mod types;

pub use error::{Result, SecurityError, harden_headers};
pub use extractors::{AuthPrincipal, BearerToken, OptionalAuthPrincipal};
pub use middleware::{
    ClientKey, RoleGate, SecurityState, auth_rate_limit, cors_layer, global_rate_limit, ip_guard,
    optional_auth, require_auth, require_role, security_headers, sensitive_rate_limit,
};
pub use routes::{create_router, routes};
pub use types::{
    CookieConfig, CookieSameSite, HealthResponse, MessageResponse, PasswordResetRequest,
    PasswordResetResponse, PrincipalResponse,
};

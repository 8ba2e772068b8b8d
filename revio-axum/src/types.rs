use revio_core::{Principal, SecurityConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct PrincipalResponse {
    pub principal: Principal,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PasswordResetResponse {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct CookieConfig {
    pub name: String,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: CookieSameSite,
    pub path: String,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: "session_id".to_string(),
            http_only: true,
            secure: true,
            same_site: CookieSameSite::Strict,
            path: "/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum CookieSameSite {
    #[default]
    Strict,
    Lax,
}

impl CookieConfig {
    /// Derive cookie flags from the environment-level security config.
    pub fn from_security(config: &SecurityConfig) -> Self {
        Self {
            secure: config.cookie_secure,
            same_site: match config.cookie_same_site {
                revio_core::CookieSameSite::Strict => CookieSameSite::Strict,
                revio_core::CookieSameSite::Lax => CookieSameSite::Lax,
            },
            ..Self::default()
        }
    }

    pub fn development() -> Self {
        Self {
            secure: false,
            same_site: CookieSameSite::Lax,
            ..Self::default()
        }
    }
}

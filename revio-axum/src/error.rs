//! HTTP mapping for pipeline failures
//!
//! Every failure crossing the HTTP boundary becomes the structured body
//! `{error, code, timestamp, retryAfter?}` with the hardening headers
//! applied, so security posture does not regress on the error path.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use revio_core::events::PipelineStage;
use serde_json::json;
use thiserror::Error;

/// Apply the response-hardening headers. Used on every response, success and
/// error alike.
pub fn harden_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert("x-xss-protection", HeaderValue::from_static("0"));
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
}

/// A pipeline failure annotated with the stage it short-circuited at.
#[derive(Debug, Error)]
#[error("{stage:?}: {error}")]
pub struct SecurityError {
    pub error: revio_core::Error,
    pub stage: PipelineStage,
    /// Include upstream failure detail in the body. Never set in
    /// production.
    pub expose_detail: bool,
}

impl SecurityError {
    pub fn new(error: revio_core::Error, stage: PipelineStage, expose_detail: bool) -> Self {
        Self {
            error,
            stage,
            expose_detail,
        }
    }

    fn status(&self) -> StatusCode {
        match self.error.code() {
            "TOKEN_MISSING" | "TOKEN_INVALID_FORMAT" | "TOKEN_CLAIMS_INVALID" | "TOKEN_EXPIRED"
            | "TOKEN_REVOKED" | "TOKEN_INVALID" | "USER_NOT_FOUND" => StatusCode::UNAUTHORIZED,
            "ACCOUNT_DISABLED" | "ACCOUNT_SUSPENDED" | "ACCOUNT_INACTIVE" | "IDENTITY_CONFLICT"
            | "FORBIDDEN" | "IP_BLACKLISTED" => StatusCode::FORBIDDEN,
            "RATE_LIMIT_EXCEEDED" => StatusCode::TOO_MANY_REQUESTS,
            "VALIDATION_FAILED" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        if self.error.is_upstream_failure() && !self.expose_detail {
            "Internal server error".to_string()
        } else {
            self.error.to_string()
        }
    }
}

impl IntoResponse for SecurityError {
    fn into_response(self) -> Response {
        let status = self.status();

        let mut body = json!({
            "error": self.message(),
            "code": self.error.code(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Some(retry_after) = self.error.retry_after() {
            body["retryAfter"] = json!(retry_after);
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(retry_after) = self.error.retry_after() {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        harden_headers(response.headers_mut());
        response
    }
}

pub type Result<T> = std::result::Result<T, SecurityError>;

#[cfg(test)]
mod tests {
    use super::*;
    use revio_core::error::{AbuseError, AuthError};

    #[test]
    fn statuses_follow_the_taxonomy() {
        let unauthorized =
            SecurityError::new(AuthError::InvalidTokenFormat.into(), PipelineStage::TokenValidate, false);
        assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);

        let forbidden =
            SecurityError::new(AbuseError::Blacklisted.into(), PipelineStage::IpBlacklistCheck, false);
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let limited = SecurityError::new(
            AbuseError::RateLimited { retry_after_secs: 9 }.into(),
            PipelineStage::GlobalRateLimit,
            false,
        );
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn upstream_detail_is_suppressed_unless_exposed() {
        let error = revio_core::error::StorageError::Database("password in DSN".into());

        let hidden = SecurityError::new(error.into(), PipelineStage::IdentityReconcile, false);
        assert_eq!(hidden.message(), "Internal server error");

        let error = revio_core::error::StorageError::Database("password in DSN".into());
        let shown = SecurityError::new(error.into(), PipelineStage::IdentityReconcile, true);
        assert!(shown.message().contains("password in DSN"));
    }

    #[test]
    fn error_responses_are_hardened() {
        let response = SecurityError::new(
            AuthError::MissingToken.into(),
            PipelineStage::TokenValidate,
            false,
        )
        .into_response();

        let headers = response.headers();
        assert_eq!(headers.get(header::X_CONTENT_TYPE_OPTIONS).unwrap(), "nosniff");
        assert_eq!(headers.get(header::X_FRAME_OPTIONS).unwrap(), "DENY");
        assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-store");
    }

    #[test]
    fn rate_limit_responses_carry_retry_after() {
        let response = SecurityError::new(
            AbuseError::RateLimited { retry_after_secs: 17 }.into(),
            PipelineStage::GlobalRateLimit,
            false,
        )
        .into_response();

        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "17");
    }
}

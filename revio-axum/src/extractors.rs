use axum::{
    Extension, RequestPartsExt,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
};
use revio_core::{Principal, error::AuthError, events::PipelineStage};

use crate::error::SecurityError;

/// The authenticated principal attached by `require_auth`. Rejects with 401
/// when the route was mounted without the middleware or the request slipped
/// through unauthenticated.
pub struct AuthPrincipal(pub Principal);

impl<S> FromRequestParts<S> for AuthPrincipal
where
    S: Send + Sync,
{
    type Rejection = SecurityError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Extension(principal): Extension<Principal> = parts.extract().await.map_err(|_| {
            SecurityError::new(
                AuthError::MissingToken.into(),
                PipelineStage::TokenValidate,
                false,
            )
        })?;

        Ok(AuthPrincipal(principal))
    }
}

/// The principal attached by `optional_auth`, if authentication succeeded.
pub struct OptionalAuthPrincipal(pub Option<Principal>);

impl<S> FromRequestParts<S> for OptionalAuthPrincipal
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts.extensions.get::<Principal>().cloned();

        Ok(OptionalAuthPrincipal(principal))
    }
}

/// The raw bearer token, when the request carries one.
pub struct BearerToken(pub Option<String>);

impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("Authorization")
            .and_then(|header| header.to_str().ok())
            .and_then(|header| header.strip_prefix("Bearer "))
            .map(|token| token.to_string());

        Ok(BearerToken(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with_headers(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn bearer_token_is_extracted_from_the_authorization_header() {
        let mut parts = parts_with_headers(&[("Authorization", "Bearer abc.def.ghi")]);
        let BearerToken(token) = BearerToken::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(token.as_deref(), Some("abc.def.ghi"));
    }

    #[tokio::test]
    async fn non_bearer_authorization_is_ignored() {
        let mut parts = parts_with_headers(&[("Authorization", "Basic dXNlcjpwYXNz")]);
        let BearerToken(token) = BearerToken::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert!(token.is_none());

        let mut parts = parts_with_headers(&[]);
        let BearerToken(token) = BearerToken::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert!(token.is_none());
    }

    #[tokio::test]
    async fn auth_principal_rejects_when_no_middleware_ran() {
        let mut parts = parts_with_headers(&[]);
        let rejection = AuthPrincipal::from_request_parts(&mut parts, &())
            .await
            .err()
            .expect("extractor must reject");
        assert_eq!(rejection.error.code(), "TOKEN_MISSING");
    }

    #[tokio::test]
    async fn optional_principal_defaults_to_none() {
        let mut parts = parts_with_headers(&[]);
        let OptionalAuthPrincipal(principal) =
            OptionalAuthPrincipal::from_request_parts(&mut parts, &())
                .await
                .unwrap();
        assert!(principal.is_none());
    }
}

//! End-to-end tests for the security middleware chain.

use std::collections::HashMap;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    routing::get,
};
use chrono::{DateTime, Duration, Utc};
use tower::util::ServiceExt;

use revio_axum::{
    CookieConfig, OptionalAuthPrincipal, RoleGate, SecurityState, create_router, optional_auth,
    require_auth, require_role,
};
use revio_core::{
    Error, NewUserRecord, Role, SecurityConfig, TokenClaims, UserId, UserRecord,
    error::{ProviderError, StorageError},
    provider::{IdentityProvider, ProviderUser},
    user::UserRepository,
};

const JWT_HEADER: &str = "eyJhbGciOiJSUzI1NiIsInR5cCI6IkpXVCJ9";

fn jwt(tag: &str) -> String {
    format!("{JWT_HEADER}.{tag}.c2ln")
}

fn claims(subject: &str, email: Option<&str>) -> TokenClaims {
    let now = Utc::now();
    TokenClaims {
        subject: subject.to_string(),
        email: email.map(|e| e.to_string()),
        email_verified: true,
        issued_at: now - Duration::minutes(1),
        expires_at: now + Duration::hours(1),
        audience: "revio".to_string(),
        issuer: "https://idp.example.com".to_string(),
    }
}

#[derive(Default)]
struct MockProvider {
    tokens: Mutex<HashMap<String, TokenClaims>>,
    verify_calls: AtomicUsize,
    revoke_calls: AtomicUsize,
}

impl MockProvider {
    fn with_token(&self, token: &str, claims: TokenClaims) {
        self.tokens.lock().unwrap().insert(token.to_string(), claims);
    }
}

#[async_trait]
impl IdentityProvider for MockProvider {
    async fn verify_token(
        &self,
        token: &str,
        _check_revoked: bool,
    ) -> Result<TokenClaims, ProviderError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.tokens
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .ok_or_else(|| ProviderError::Malformed("signature mismatch".to_string()))
    }

    async fn get_user(&self, external_id: &str) -> Result<ProviderUser, ProviderError> {
        Ok(ProviderUser {
            external_id: external_id.to_string(),
            email: None,
            email_verified: false,
            disabled: false,
        })
    }

    async fn create_user(
        &self,
        email: &str,
        _password: Option<&str>,
    ) -> Result<ProviderUser, ProviderError> {
        Ok(ProviderUser {
            external_id: format!("ext-{email}"),
            email: Some(email.to_string()),
            email_verified: false,
            disabled: false,
        })
    }

    async fn delete_user(&self, _external_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn create_custom_token(
        &self,
        external_id: &str,
        _claims: &serde_json::Value,
    ) -> Result<String, ProviderError> {
        Ok(format!("custom-{external_id}"))
    }

    async fn revoke_refresh_tokens(&self, _external_id: &str) -> Result<(), ProviderError> {
        self.revoke_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn password_reset_link(&self, email: &str) -> Result<String, ProviderError> {
        Ok(format!("https://idp.example.com/reset?email={email}"))
    }

    async fn email_verification_link(&self, email: &str) -> Result<String, ProviderError> {
        Ok(format!("https://idp.example.com/verify?email={email}"))
    }

    async fn confirm_password_reset(
        &self,
        _code: &str,
        _new_password: &str,
    ) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[derive(Default)]
struct MockUserStore {
    records: Mutex<HashMap<UserId, UserRecord>>,
}

impl MockUserStore {
    fn insert(&self, record: UserRecord) {
        self.records.lock().unwrap().insert(record.id, record);
    }

    fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl UserRepository for MockUserStore {
    async fn create(&self, user: NewUserRecord) -> Result<UserRecord, Error> {
        let mut records = self.records.lock().unwrap();
        let duplicate = records.values().any(|r| {
            r.email == user.email || (user.external_id.is_some() && r.external_id == user.external_id)
        });
        if duplicate {
            return Err(StorageError::UniqueViolation("users_email_key".into()).into());
        }

        let now = Utc::now();
        let record = UserRecord {
            id: user.id,
            external_id: user.external_id,
            email: user.email,
            role: user.role,
            suspended: false,
            email_verified_at: user.email_verified_at,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<UserRecord>, Error> {
        Ok(self.records.lock().unwrap().get(id).cloned())
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<UserRecord>, Error> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, Error> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.email == email)
            .cloned())
    }

    async fn link_external_id(&self, id: &UserId, external_id: &str) -> Result<UserRecord, Error> {
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(id).ok_or(StorageError::NotFound)?;
        record.external_id = Some(external_id.to_string());
        Ok(record.clone())
    }

    async fn set_last_login(&self, id: &UserId, at: DateTime<Utc>) -> Result<(), Error> {
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(id).ok_or(StorageError::NotFound)?;
        record.last_login_at = Some(at);
        Ok(())
    }

    async fn update(&self, user: &UserRecord) -> Result<UserRecord, Error> {
        self.records.lock().unwrap().insert(user.id, user.clone());
        Ok(user.clone())
    }

    async fn delete(&self, id: &UserId) -> Result<(), Error> {
        self.records.lock().unwrap().remove(id);
        Ok(())
    }
}

struct Harness {
    provider: Arc<MockProvider>,
    users: Arc<MockUserStore>,
    state: SecurityState<MockProvider, MockUserStore>,
    app: Router,
}

fn harness(config: SecurityConfig) -> Harness {
    let provider = Arc::new(MockProvider::default());
    let users = Arc::new(MockUserStore::default());
    let state = SecurityState::new(provider.clone(), users.clone(), config);
    let app = create_router(state.clone(), CookieConfig::development());

    Harness {
        provider,
        users,
        state,
        app,
    }
}

fn request(path: &str, ip: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .uri(path)
        .header("x-forwarded-for", ip)
        .header("user-agent", "pipeline-tests");
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_public_and_hardened() {
    let h = harness(SecurityConfig::default());

    let response = h.app.clone().oneshot(request("/health", "192.0.2.1", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers.get(header::X_CONTENT_TYPE_OPTIONS).unwrap(), "nosniff");
    assert_eq!(headers.get(header::X_FRAME_OPTIONS).unwrap(), "DENY");
}

#[tokio::test]
async fn structurally_invalid_token_is_401_without_provider_call() {
    let h = harness(SecurityConfig::default());

    let response = h
        .app
        .clone()
        .oneshot(request("/me", "192.0.2.1", Some("not.a.jwt")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.provider.verify_calls.load(Ordering::SeqCst), 0);

    let body = body_json(response).await;
    assert_eq!(body["code"], "TOKEN_INVALID_FORMAT");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn error_responses_are_hardened() {
    let h = harness(SecurityConfig::default());

    let response = h
        .app
        .clone()
        .oneshot(request("/me", "192.0.2.1", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let headers = response.headers();
    assert_eq!(headers.get(header::X_CONTENT_TYPE_OPTIONS).unwrap(), "nosniff");
    assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-store");
}

#[tokio::test]
async fn valid_token_provisions_and_returns_the_principal() {
    let h = harness(SecurityConfig::default());
    let token = jwt("first-login");
    h.provider
        .with_token(&token, claims("ext-new", Some("new@example.com")));

    let response = h
        .app
        .clone()
        .oneshot(request("/me", "192.0.2.1", Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["principal"]["email"], "new@example.com");
    assert_eq!(body["principal"]["role"], "client");
    assert_eq!(body["principal"]["external_id"], "ext-new");
    assert_eq!(h.users.len(), 1);

    // A second login resolves the same record.
    let response = h
        .app
        .clone()
        .oneshot(request("/me", "192.0.2.1", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.users.len(), 1);
}

#[tokio::test]
async fn blacklisted_ip_is_rejected_despite_valid_token() {
    let h = harness(SecurityConfig::default());
    let token = jwt("valid");
    h.provider
        .with_token(&token, claims("ext-1", Some("owner@example.com")));

    h.state.abuse.blacklist("203.0.113.5");

    let response = h
        .app
        .clone()
        .oneshot(request("/me", "203.0.113.5", Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["code"], "IP_BLACKLISTED");
    assert_eq!(h.provider.verify_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn global_rate_limit_rejects_with_retry_after() {
    let mut config = SecurityConfig::default();
    config.global_limit = revio_core::RateLimitPolicy::new("global", 3, Duration::seconds(30));
    let h = harness(config);

    for _ in 0..3 {
        let response = h
            .app
            .clone()
            .oneshot(request("/health", "192.0.2.7", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = h
        .app
        .clone()
        .oneshot(request("/health", "192.0.2.7", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));

    let body = body_json(response).await;
    assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
    assert!(body["retryAfter"].as_u64().unwrap() >= 1);

    // Another key is unaffected.
    let response = h
        .app
        .clone()
        .oneshot(request("/health", "192.0.2.8", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn equivalent_ipv6_forms_share_a_rate_limit_bucket() {
    let mut config = SecurityConfig::default();
    config.global_limit = revio_core::RateLimitPolicy::new("global", 2, Duration::seconds(30));
    let h = harness(config);

    for ip in ["2001:db8::1", "2001:DB8:0:0:0:0:0:1"] {
        let response = h
            .app
            .clone()
            .oneshot(request("/health", ip, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = h
        .app
        .clone()
        .oneshot(request("/health", "2001:db8:0::0:1", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn failed_authentications_feed_the_abuse_tracker() {
    let h = harness(SecurityConfig::default());

    for _ in 0..5 {
        let response = h
            .app
            .clone()
            .oneshot(request("/me", "198.51.100.77", Some("not.a.jwt")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    assert!(h
        .state
        .abuse
        .is_brute_force("198.51.100.77", 5, Duration::minutes(15)));
}

#[tokio::test]
async fn successful_authentication_clears_the_attempt_log() {
    let h = harness(SecurityConfig::default());
    let token = jwt("valid");
    h.provider
        .with_token(&token, claims("ext-1", Some("owner@example.com")));

    for _ in 0..5 {
        let _ = h
            .app
            .clone()
            .oneshot(request("/me", "198.51.100.88", Some("not.a.jwt")))
            .await
            .unwrap();
    }
    assert!(h
        .state
        .abuse
        .is_brute_force("198.51.100.88", 5, Duration::minutes(15)));

    let response = h
        .app
        .clone()
        .oneshot(request("/me", "198.51.100.88", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert!(!h
        .state
        .abuse
        .is_brute_force("198.51.100.88", 1, Duration::minutes(15)));
}

#[tokio::test]
async fn provider_rejection_maps_to_its_taxonomy_code() {
    let h = harness(SecurityConfig::default());

    // Structurally fine, but the provider does not recognize it.
    let response = h
        .app
        .clone()
        .oneshot(request("/me", "192.0.2.1", Some(&jwt("forged"))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "TOKEN_INVALID");
    assert_eq!(h.provider.verify_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn suspended_account_is_403_with_distinct_code() {
    let h = harness(SecurityConfig::default());
    let token = jwt("suspended");
    h.provider
        .with_token(&token, claims("ext-s", Some("suspended@example.com")));
    h.users.insert(
        UserRecord::builder()
            .email("suspended@example.com".to_string())
            .external_id(Some("ext-s".to_string()))
            .suspended(true)
            .build()
            .unwrap(),
    );

    let response = h
        .app
        .clone()
        .oneshot(request("/me", "192.0.2.1", Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["code"], "ACCOUNT_SUSPENDED");
}

#[tokio::test]
async fn logout_revokes_refresh_tokens() {
    let h = harness(SecurityConfig::default());
    let token = jwt("valid");
    h.provider
        .with_token(&token, claims("ext-1", Some("owner@example.com")));

    let mut req = request("/logout", "192.0.2.1", Some(&token));
    *req.method_mut() = axum::http::Method::POST;

    let response = h.app.clone().oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.provider.revoke_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn password_reset_does_not_leak_account_existence() {
    let h = harness(SecurityConfig::default());

    let req = Request::builder()
        .uri("/password-reset")
        .method(axum::http::Method::POST)
        .header("x-forwarded-for", "192.0.2.1")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"email":"whoever@example.com"}"#))
        .unwrap();

    let response = h.app.clone().oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("If the address exists"));
}

#[tokio::test]
async fn sensitive_tier_is_stricter_than_global() {
    let mut config = SecurityConfig::default();
    config.sensitive_limit = revio_core::RateLimitPolicy::new("sensitive", 1, Duration::hours(1));
    let h = harness(config);

    let make_request = || {
        Request::builder()
            .uri("/password-reset")
            .method(axum::http::Method::POST)
            .header("x-forwarded-for", "192.0.2.9")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"email":"whoever@example.com"}"#))
            .unwrap()
    };

    let response = h.app.clone().oneshot(make_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = h.app.clone().oneshot(make_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn optional_auth_proceeds_without_a_principal() {
    let h = harness(SecurityConfig::default());

    async fn whoami(OptionalAuthPrincipal(principal): OptionalAuthPrincipal) -> String {
        principal
            .map(|p| p.email)
            .unwrap_or_else(|| "anonymous".to_string())
    }

    let app = Router::new()
        .route("/whoami", get(whoami))
        .layer(axum::middleware::from_fn_with_state(
            h.state.clone(),
            optional_auth::<MockProvider, MockUserStore>,
        ));

    // Invalid token: swallowed, request proceeds anonymously.
    let response = app
        .clone()
        .oneshot(request("/whoami", "192.0.2.1", Some("not.a.jwt")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"anonymous");

    // Valid token: principal attached.
    let token = jwt("valid");
    h.provider
        .with_token(&token, claims("ext-1", Some("owner@example.com")));
    let response = app
        .clone()
        .oneshot(request("/whoami", "192.0.2.1", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"owner@example.com");
}

#[tokio::test]
async fn cors_reflects_only_configured_origins() {
    let mut config = SecurityConfig::default();
    config.allowed_origins = vec!["http://app.example.com".to_string()];
    let h = harness(config);

    let req = Request::builder()
        .uri("/health")
        .header("x-forwarded-for", "192.0.2.1")
        .header(header::ORIGIN, "http://app.example.com")
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(req).await.unwrap();
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "http://app.example.com"
    );

    let req = Request::builder()
        .uri("/health")
        .header("x-forwarded-for", "192.0.2.1")
        .header(header::ORIGIN, "http://evil.example.com")
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(req).await.unwrap();
    assert!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none()
    );
}

#[tokio::test]
async fn role_hierarchy_gates_routes() {
    let h = harness(SecurityConfig::default());
    let token = jwt("admin");
    h.provider
        .with_token(&token, claims("ext-admin", Some("admin@example.com")));
    h.users.insert(
        UserRecord::builder()
            .email("admin@example.com".to_string())
            .external_id(Some("ext-admin".to_string()))
            .role(Role::Admin)
            .build()
            .unwrap(),
    );

    let gated = |allowed: Vec<Role>, strict: bool| {
        Router::new()
            .route("/gated", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(
                RoleGate::new(allowed, strict, h.state.audit.clone()),
                require_role,
            ))
            .layer(axum::middleware::from_fn_with_state(
                h.state.clone(),
                require_auth::<MockProvider, MockUserStore>,
            ))
    };

    // Admin reaches a client-declared route through the hierarchy.
    let response = gated(vec![Role::Client], false)
        .oneshot(request("/gated", "192.0.2.1", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Strict mode requires exact membership.
    let response = gated(vec![Role::Client], true)
        .oneshot(request("/gated", "192.0.2.1", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["code"], "FORBIDDEN");
}

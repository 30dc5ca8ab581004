//! Authenticated admin gateway.
//!
//! Dashboard sessions are HS256 tokens signed with the extension secret, issued
//! for the extension's base URL and audience. Issuing them happens elsewhere;
//! this module only checks them and offers the login/logout redirects.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;

use crate::config::ExtensionConfig;

type HmacSha256 = Hmac<Sha256>;

pub const AUDIENCE: &str = "urn:logs-to-cloudwatch";
pub const CLIENT_NAME: &str = "Logs to CloudWatch";
pub const SESSION_STORAGE_KEY: &str = "logs-to-cloudwatch:apiToken";

/// Why a request was turned away. Only logged; clients see a bare 401.
#[derive(Debug, Error, PartialEq)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("malformed token")]
    Malformed,
    #[error("unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("token signature mismatch")]
    BadSignature,
    #[error("token issuer mismatch")]
    WrongIssuer,
    #[error("token audience mismatch")]
    WrongAudience,
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        debug!(reason = %self, "rejected admin request");
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "unauthorized"})),
        )
            .into_response()
    }
}

/// Verified session, attached to the request for business handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminSession {
    pub subject: Option<String>,
    pub email: Option<String>,
    pub expires_at: i64,
}

#[derive(Deserialize)]
struct TokenHeader {
    alg: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn contains(&self, wanted: &str) -> bool {
        match self {
            Self::One(a) => a == wanted,
            Self::Many(all) => all.iter().any(|a| a == wanted),
        }
    }
}

#[derive(Deserialize)]
struct Claims {
    iss: Option<String>,
    aud: Option<Audience>,
    exp: Option<i64>,
    nbf: Option<i64>,
    sub: Option<String>,
    email: Option<String>,
}

/// Settings the gateway checks tokens against and builds redirects from.
#[derive(Debug, Clone)]
pub struct AdminGateway {
    secret: String,
    audience: String,
    base_url: String,
    rta: String,
    domain: String,
    session_storage_key: String,
}

impl AdminGateway {
    pub fn new(config: &ExtensionConfig) -> Self {
        Self {
            secret: config.secret.clone(),
            audience: AUDIENCE.to_owned(),
            base_url: config.base_url.clone(),
            rta: config.rta.clone(),
            domain: config.domain.clone(),
            session_storage_key: SESSION_STORAGE_KEY.to_owned(),
        }
    }

    /// Check signature, issuer, audience and validity window of `token`.
    pub fn verify(&self, token: &str, now: i64) -> Result<AdminSession, AuthError> {
        let mut segments = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(AuthError::Malformed);
        };

        let head: TokenHeader = decode_segment(header)?;
        if head.alg != "HS256" {
            return Err(AuthError::UnsupportedAlgorithm(head.alg));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| AuthError::Malformed)?;
        let signed = &token[..header.len() + 1 + payload.len()];
        if !constant_time_eq(&signature, &sign(&self.secret, signed)) {
            return Err(AuthError::BadSignature);
        }

        let claims: Claims = decode_segment(payload)?;
        let issuer = claims.iss.as_deref().map(|i| i.trim_end_matches('/'));
        if issuer != Some(self.base_url.as_str()) {
            return Err(AuthError::WrongIssuer);
        }
        if !claims.aud.is_some_and(|a| a.contains(&self.audience)) {
            return Err(AuthError::WrongAudience);
        }
        let expires_at = claims.exp.ok_or(AuthError::Malformed)?;
        if now >= expires_at {
            return Err(AuthError::Expired);
        }
        if claims.nbf.is_some_and(|nbf| now < nbf) {
            return Err(AuthError::NotYetValid);
        }

        Ok(AdminSession {
            subject: claims.sub,
            email: claims.email,
            expires_at,
        })
    }

    /// Authorization endpoint the dashboard login redirects to.
    pub fn login_url(&self) -> String {
        let nonce: [u8; 16] = rand::thread_rng().gen();
        let redirect_uri = format!("{}/login/callback", self.base_url);
        let query = serde_urlencoded::to_string([
            ("client_id", self.base_url.as_str()),
            ("response_type", "token id_token"),
            ("response_mode", "form_post"),
            ("scope", "openid name email"),
            ("expiration", "36000"),
            ("redirect_uri", redirect_uri.as_str()),
            ("nonce", hex::encode(nonce).as_str()),
        ])
        .unwrap_or_default();
        format!("https://{}/authorize?{query}", self.rta)
    }

    pub fn logout_url(&self) -> String {
        let query = serde_urlencoded::to_string([("returnTo", self.base_url.as_str())])
            .unwrap_or_default();
        format!("https://{}/v2/logout?{query}", self.domain)
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| AuthError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| AuthError::Malformed)
}

fn sign(secret: &str, input: &str) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(input.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Axum middleware that validates `Authorization: Bearer <token>`.
pub async fn require_admin(
    State(gateway): State<Arc<AdminGateway>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(AuthError::MissingToken)?;

    let session = gateway.verify(token, now())?;
    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}

/// Unauthenticated `/login` and `/logout` redirects.
pub fn routes(gateway: Arc<AdminGateway>) -> Router {
    Router::new()
        .route("/login", get(login))
        .route("/logout", get(logout))
        .with_state(gateway)
}

async fn login(State(gateway): State<Arc<AdminGateway>>) -> Redirect {
    Redirect::to(&gateway.login_url())
}

async fn logout(State(gateway): State<Arc<AdminGateway>>) -> Html<String> {
    Html(format!(
        "<html><head><title>{CLIENT_NAME}</title></head><body><script>\
         sessionStorage.removeItem({});window.location.href = {};\
         </script></body></html>",
        js_string(&gateway.session_storage_key),
        js_string(&gateway.logout_url()),
    ))
}

/// JSON string literal that is also safe inside a `<script>` element.
fn js_string(value: &str) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "\"\"".into())
        .replace("</", "<\\/")
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{body::Body, middleware, Extension};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    pub(crate) const SECRET: &str = "s3cr3t";
    pub(crate) const BASE_URL: &str = "https://wt.example.com";

    pub(crate) fn config() -> ExtensionConfig {
        ExtensionConfig {
            secret: SECRET.into(),
            domain: "example.auth0.com".into(),
            rta: "rta.example.com".into(),
            base_url: BASE_URL.into(),
        }
    }

    pub(crate) fn token_with(secret: &str, alg: &str, claims: Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(json!({"alg": alg, "typ": "JWT"}).to_string());
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        let signed = format!("{header}.{payload}");
        let signature = URL_SAFE_NO_PAD.encode(sign(secret, &signed));
        format!("{signed}.{signature}")
    }

    pub(crate) fn valid_token() -> String {
        token_with(
            SECRET,
            "HS256",
            json!({
                "iss": BASE_URL,
                "aud": AUDIENCE,
                "sub": "google-oauth2|123",
                "email": "admin@example.com",
                "exp": now() + 3600,
            }),
        )
    }

    fn gateway() -> AdminGateway {
        AdminGateway::new(&config())
    }

    #[test]
    fn accepts_valid_token() {
        let session = gateway().verify(&valid_token(), now()).unwrap();
        assert_eq!(session.subject.as_deref(), Some("google-oauth2|123"));
        assert_eq!(session.email.as_deref(), Some("admin@example.com"));
    }

    #[test]
    fn accepts_audience_list_and_trailing_slash_issuer() {
        let token = token_with(
            SECRET,
            "HS256",
            json!({"iss": "https://wt.example.com/", "aud": ["other", AUDIENCE], "exp": now() + 60}),
        );
        assert!(gateway().verify(&token, now()).is_ok());
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = token_with(
            "not-the-secret",
            "HS256",
            json!({"iss": BASE_URL, "aud": AUDIENCE, "exp": now() + 60}),
        );
        assert_eq!(gateway().verify(&token, now()), Err(AuthError::BadSignature));
    }

    #[test]
    fn rejects_other_algorithms() {
        let token = token_with(
            SECRET,
            "none",
            json!({"iss": BASE_URL, "aud": AUDIENCE, "exp": now() + 60}),
        );
        assert_eq!(
            gateway().verify(&token, now()),
            Err(AuthError::UnsupportedAlgorithm("none".into()))
        );
    }

    #[test]
    fn rejects_wrong_issuer_and_audience() {
        let wrong_iss = token_with(
            SECRET,
            "HS256",
            json!({"iss": "https://evil.example.com", "aud": AUDIENCE, "exp": now() + 60}),
        );
        assert_eq!(gateway().verify(&wrong_iss, now()), Err(AuthError::WrongIssuer));

        let wrong_aud = token_with(
            SECRET,
            "HS256",
            json!({"iss": BASE_URL, "aud": "urn:other", "exp": now() + 60}),
        );
        assert_eq!(gateway().verify(&wrong_aud, now()), Err(AuthError::WrongAudience));
    }

    #[test]
    fn enforces_validity_window() {
        let t = now();
        let expired = token_with(
            SECRET,
            "HS256",
            json!({"iss": BASE_URL, "aud": AUDIENCE, "exp": t - 1}),
        );
        assert_eq!(gateway().verify(&expired, t), Err(AuthError::Expired));

        let early = token_with(
            SECRET,
            "HS256",
            json!({"iss": BASE_URL, "aud": AUDIENCE, "exp": t + 60, "nbf": t + 30}),
        );
        assert_eq!(gateway().verify(&early, t), Err(AuthError::NotYetValid));

        let no_exp = token_with(SECRET, "HS256", json!({"iss": BASE_URL, "aud": AUDIENCE}));
        assert_eq!(gateway().verify(&no_exp, t), Err(AuthError::Malformed));
    }

    #[test]
    fn rejects_garbage() {
        for token in ["", "abc", "a.b", "a.b.c.d", "!!.??.##"] {
            assert_eq!(gateway().verify(token, now()), Err(AuthError::Malformed));
        }
    }

    #[test]
    fn login_url_targets_rta() {
        let url = gateway().login_url();
        assert!(url.starts_with("https://rta.example.com/authorize?"));
        assert!(url.contains("client_id=https%3A%2F%2Fwt.example.com"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fwt.example.com%2Flogin%2Fcallback"));
    }

    #[test]
    fn js_string_escapes_script_close() {
        assert_eq!(js_string("a</script>"), r#""a<\/script>""#);
    }

    fn protected_app(hits: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route(
                "/",
                get(move |Extension(session): Extension<AdminSession>| {
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        session.email.unwrap_or_default()
                    }
                }),
            )
            .layer(middleware::from_fn_with_state(
                Arc::new(gateway()),
                require_admin,
            ))
    }

    fn request(auth: Option<String>) -> Request {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn middleware_rejects_without_reaching_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        for auth in [
            None,
            Some("Basic abc".to_string()),
            Some("Bearer nope".to_string()),
        ] {
            let resp = protected_app(hits.clone())
                .oneshot(request(auth))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn middleware_attaches_session() {
        let hits = Arc::new(AtomicUsize::new(0));
        let resp = protected_app(hits.clone())
            .oneshot(request(Some(format!("Bearer {}", valid_token()))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"admin@example.com");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn login_and_logout_are_public() {
        let app = routes(Arc::new(gateway()));

        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/login").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        let location = resp.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("https://rta.example.com/authorize?"));

        let resp = app
            .oneshot(Request::builder().uri("/logout").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains(SESSION_STORAGE_KEY));
        assert!(html.contains("https://example.auth0.com/v2/logout"));
    }
}

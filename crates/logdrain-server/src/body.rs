//! Request body normalization.
//!
//! A request body arrives either pre-parsed by a sandboxed host (carried in a
//! [`SandboxContext`] extension) or as raw bytes. [`normalize_body`] turns both
//! into one [`ParsedBody`] extension so handlers never care which path was taken.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use http_body_util::LengthLimitError;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

/// Largest raw body accepted for parsing (100 KiB).
pub const BODY_LIMIT: usize = 100 * 1024;

/// Invocation context supplied by a sandboxed host that parsed the body itself.
#[derive(Debug, Clone, Default)]
pub struct SandboxContext {
    pub body: Option<Value>,
}

/// Canonical request body. An empty JSON object when nothing was sent.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBody(pub Value);

impl ParsedBody {
    pub fn empty() -> Self {
        Self(Value::Object(Map::new()))
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ParsedBody {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<ParsedBody>()
            .cloned()
            .unwrap_or_else(ParsedBody::empty))
    }
}

#[derive(Debug, Error)]
pub enum BodyError {
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid form body: {0}")]
    Form(#[from] serde_urlencoded::de::Error),
}

/// Parses raw request bytes into JSON.
pub trait BodyParser: Send + Sync {
    fn parse(&self, content_type: Option<&str>, bytes: &[u8]) -> Result<Value, BodyError>;
}

/// Accepts `application/json` (and `+json` types) and
/// `application/x-www-form-urlencoded`. Anything else yields an empty object.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonOrFormParser;

impl BodyParser for JsonOrFormParser {
    fn parse(&self, content_type: Option<&str>, bytes: &[u8]) -> Result<Value, BodyError> {
        let essence = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .unwrap_or_default();

        if essence == "application/json" || essence.ends_with("+json") {
            return Ok(serde_json::from_slice(bytes)?);
        }
        if essence == "application/x-www-form-urlencoded" {
            return parse_form(bytes);
        }
        Ok(ParsedBody::empty().0)
    }
}

/// Flat form decoding. Repeated keys collect into an array.
fn parse_form(bytes: &[u8]) -> Result<Value, BodyError> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(bytes)?;
    let mut map = Map::new();
    for (key, value) in pairs {
        match map.get_mut(&key) {
            Some(Value::Array(values)) => values.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                map.insert(key, Value::String(value));
            }
        }
    }
    Ok(Value::Object(map))
}

/// Middleware: adopt a sandbox-provided body, or buffer and parse the raw one.
///
/// The raw bytes are put back on the request so later extractors can still read
/// them.
pub async fn normalize_body(
    State(parser): State<Arc<dyn BodyParser>>,
    mut request: Request,
    next: Next,
) -> Response {
    let sandboxed = request
        .extensions()
        .get::<SandboxContext>()
        .and_then(|ctx| ctx.body.clone());
    if let Some(body) = sandboxed {
        request.extensions_mut().insert(ParsedBody(body));
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();

    let declared_len = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_len.is_some_and(|len| len > BODY_LIMIT) {
        return reject(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
    }

    let bytes = match axum::body::to_bytes(body, BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(e) if exceeds_limit(&e) => {
            return reject(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        }
        Err(e) => {
            debug!(error = %e, "failed to buffer request body");
            return reject(StatusCode::BAD_REQUEST, "unable to read request body");
        }
    };

    let parsed = if bytes.is_empty() {
        ParsedBody::empty()
    } else {
        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        match parser.parse(content_type, &bytes) {
            Ok(value) => ParsedBody(value),
            Err(e) => {
                debug!(error = %e, "rejected request body");
                return reject(StatusCode::BAD_REQUEST, "invalid request body");
            }
        }
    };

    parts.extensions.insert(parsed);
    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

/// Whether buffering stopped at [`BODY_LIMIT`] rather than on a transport error.
fn exceeds_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

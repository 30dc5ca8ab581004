//! Static extension metadata, served without authentication.

use axum::{
    extract::State,
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

/// Descriptor served verbatim at `/meta`.
pub const METADATA_JSON: &str = include_str!("../extension.json");

#[derive(Debug, Clone)]
pub struct Metadata {
    raw: &'static str,
    pub name: Option<String>,
    pub version: Option<String>,
}

#[derive(Deserialize)]
struct Summary {
    name: Option<String>,
    version: Option<String>,
}

impl Metadata {
    pub fn new(raw: &'static str) -> Self {
        let summary: Option<Summary> = serde_json::from_str(raw).ok();
        Self {
            raw,
            name: summary.as_ref().and_then(|s| s.name.clone()),
            version: summary.and_then(|s| s.version),
        }
    }

    pub fn embedded() -> Self {
        Self::new(METADATA_JSON)
    }

    pub fn as_str(&self) -> &'static str {
        self.raw
    }
}

impl IntoResponse for Metadata {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            self.raw,
        )
            .into_response()
    }
}

pub fn router(metadata: Metadata) -> Router {
    Router::new()
        .route("/meta", get(serve))
        .with_state(metadata)
}

async fn serve(State(metadata): State<Metadata>) -> Metadata {
    metadata
}

/// Router holding only the terminal fallback, merged in last.
///
/// Installers probe `/meta` with slight path variations (`/meta/`, `/meta//`)
/// that miss the exact route; those get the metadata, everything else a 404.
pub fn fallback_router(metadata: Metadata) -> Router {
    Router::new()
        .fallback(legacy_fallback)
        .with_state(metadata)
}

async fn legacy_fallback(
    State(metadata): State<Metadata>,
    method: Method,
    uri: Uri,
) -> Response {
    let is_meta = uri.path().trim_matches('/') == "meta";
    if is_meta && (method == Method::GET || method == Method::HEAD) {
        return metadata.into_response();
    }
    (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response()
}

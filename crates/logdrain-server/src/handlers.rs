use axum::{
    extract::{Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::{
    auth::AdminSession,
    body::ParsedBody,
    error::AppError,
    process_logs::run_shipper,
    store::{model::CHECKPOINT_FIELD, RunReport},
    AppState,
};

/// Business routes. Callers are expected to wrap these in the admin gateway.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(overview))
        .route("/api/report", get(report))
        .route("/api/checkpoint", get(get_checkpoint).put(put_checkpoint))
        .route("/api/run", post(run_now))
        .with_state(state)
}

// ── Overview ─────────────────────────────────────────────────────────────────

pub async fn overview(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let doc = state.store.read().await?;
    let last_run = doc.reports().pop();
    Ok(Json(json!({
        "name": state.metadata.name,
        "version": state.metadata.version,
        "backend": state.store.backend_name(),
        "checkpointId": doc.checkpoint_id(),
        "lastRun": last_run,
    })))
}

// ── Reports ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ReportParams {
    /// `errors` keeps only failed runs.
    pub filter: Option<String>,
}

/// Recorded runs, newest first.
pub async fn report(
    State(state): State<AppState>,
    Query(params): Query<ReportParams>,
) -> Result<Json<Value>, AppError> {
    let only_errors = match params.filter.as_deref() {
        None | Some("") | Some("all") => false,
        Some("errors") => true,
        Some(other) => return Err(AppError::BadRequest(format!("unknown filter: {other}"))),
    };

    let mut logs: Vec<RunReport> = state
        .store
        .read()
        .await?
        .reports()
        .into_iter()
        .filter(|r| !only_errors || r.is_error())
        .collect();
    logs.reverse();
    Ok(Json(json!({ "logs": logs })))
}

// ── Checkpoint ───────────────────────────────────────────────────────────────

pub async fn get_checkpoint(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let doc = state.store.read().await?;
    Ok(Json(json!({ CHECKPOINT_FIELD: doc.checkpoint_id() })))
}

/// Move the shipper's checkpoint. `null` makes the next run start from the
/// beginning.
pub async fn put_checkpoint(
    State(state): State<AppState>,
    Extension(session): Extension<AdminSession>,
    body: ParsedBody,
) -> Result<Json<Value>, AppError> {
    let checkpoint = match body.field(CHECKPOINT_FIELD) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Some(Value::Null) => None,
        Some(_) => {
            return Err(AppError::BadRequest(format!(
                "{CHECKPOINT_FIELD} must be a non-empty string or null"
            )))
        }
        None => return Err(AppError::BadRequest(format!("{CHECKPOINT_FIELD} is required"))),
    };

    let updated = checkpoint.clone();
    let doc = state
        .store
        .read_modify_write(move |mut doc| {
            doc.set_checkpoint_id(updated);
            doc
        })
        .await?;
    info!(
        checkpoint = ?checkpoint,
        by = session.email.as_deref().unwrap_or("-"),
        "checkpoint updated"
    );
    Ok(Json(json!({ CHECKPOINT_FIELD: doc.checkpoint_id() })))
}

// ── Manual run ───────────────────────────────────────────────────────────────

pub async fn run_now(State(state): State<AppState>) -> Result<Json<RunReport>, AppError> {
    let shipper = state
        .shipper
        .as_ref()
        .ok_or_else(|| AppError::Unavailable("log shipper not configured".into()))?;
    run_shipper(&state.store, shipper.as_ref()).await.map(Json)
}

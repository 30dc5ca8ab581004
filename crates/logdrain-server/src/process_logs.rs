//! Log-processing stage: exposes the state store to downstream handlers and
//! answers scheduler triggers by running the log shipper.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    body::ParsedBody,
    error::AppError,
    store::{RunReport, StateStore},
};

/// Result of one shipping pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShipOutcome {
    /// Checkpoint to resume from next time. `None` keeps the previous one.
    pub checkpoint: Option<String>,
    pub logs_processed: u64,
}

/// The external job that fetches logs after a checkpoint and forwards them.
#[async_trait]
pub trait LogShipper: Send + Sync {
    async fn ship(&self, checkpoint: Option<String>) -> anyhow::Result<ShipOutcome>;
}

/// Run the shipper from the stored checkpoint and record the outcome.
///
/// A failed run is still recorded, with `error` set, before the error is
/// returned.
pub async fn run_shipper(
    store: &StateStore,
    shipper: &dyn LogShipper,
) -> Result<RunReport, AppError> {
    let start = now_ms();
    let previous = store.read().await?.checkpoint_id().map(str::to_owned);

    match shipper.ship(previous.clone()).await {
        Ok(outcome) => {
            let report = RunReport {
                start,
                end: now_ms(),
                logs_processed: outcome.logs_processed,
                checkpoint: outcome.checkpoint.clone().or_else(|| previous.clone()),
                error: None,
            };
            let recorded = report.clone();
            store
                .try_read_modify_write(move |mut doc| {
                    doc.set_checkpoint_id(recorded.checkpoint.clone());
                    doc.push_report(&recorded)?;
                    Ok(doc)
                })
                .await?;
            info!(
                logs_processed = report.logs_processed,
                checkpoint = ?report.checkpoint,
                "log shipping run finished"
            );
            Ok(report)
        }
        Err(e) => {
            let report = RunReport {
                start,
                end: now_ms(),
                logs_processed: 0,
                checkpoint: previous,
                error: Some(format!("{e:#}")),
            };
            if let Err(store_err) = store
                .try_read_modify_write(move |mut doc| {
                    doc.push_report(&report)?;
                    Ok(doc)
                })
                .await
            {
                warn!(error = %store_err, "failed to record failed run");
            }
            Err(AppError::Internal(e.context("log shipping run failed")))
        }
    }
}

/// Per-request state for [`process_logs`].
#[derive(Clone)]
pub struct LogProcessing {
    pub store: StateStore,
    pub shipper: Option<Arc<dyn LogShipper>>,
}

/// Middleware: attach the store, and intercept scheduler triggers.
pub async fn process_logs(
    State(ctx): State<LogProcessing>,
    mut request: Request,
    next: Next,
) -> Response {
    request.extensions_mut().insert(ctx.store.clone());

    let triggered = request
        .extensions()
        .get::<ParsedBody>()
        .is_some_and(is_scheduled_trigger);
    if !triggered {
        return next.run(request).await;
    }

    let Some(shipper) = ctx.shipper else {
        return AppError::Unavailable("log shipper not configured".into()).into_response();
    };
    run_shipper(&ctx.store, shipper.as_ref())
        .await
        .map(Json)
        .into_response()
}

/// A scheduler invocation carries a truthy `schedule` and `state: "active"`.
fn is_scheduled_trigger(body: &ParsedBody) -> bool {
    let scheduled = match body.field("schedule") {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    };
    scheduled && body.field("state").and_then(Value::as_str) == Some("active")
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

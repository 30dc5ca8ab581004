//! Per-request access recording.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::HttpBody as _,
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::{info, warn};

/// One completed request.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessRecord {
    pub method: String,
    pub path: String,
    pub status: u16,
    pub latency_ms: f64,
    /// Response size in bytes, when known before streaming.
    pub size: Option<u64>,
}

impl fmt::Display for AccessRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {:.3} ms - ",
            self.method, self.path, self.status, self.latency_ms
        )?;
        match self.size {
            Some(size) => write!(f, "{size}"),
            None => f.write_str("-"),
        }
    }
}

/// Destination for access records. Failures are logged and otherwise ignored.
pub trait AccessSink: Send + Sync {
    fn record(&self, record: &AccessRecord) -> anyhow::Result<()>;
}

/// Emits each record as an `info` event on the `logdrain::access` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl AccessSink for TracingSink {
    fn record(&self, record: &AccessRecord) -> anyhow::Result<()> {
        info!(
            target: "logdrain::access",
            method = %record.method,
            path = %record.path,
            status = record.status,
            latency_ms = record.latency_ms,
            size = ?record.size,
            "{record}"
        );
        Ok(())
    }
}

/// Middleware: time the request and hand the result to the sink. Never alters
/// the request or response.
pub async fn record_access(
    State(sink): State<Arc<dyn AccessSink>>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());

    let response = next.run(request).await;

    let size = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .or_else(|| response.body().size_hint().exact());

    let record = AccessRecord {
        method,
        path,
        status: response.status().as_u16(),
        latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        size,
    };
    if let Err(e) = sink.record(&record) {
        warn!(error = %e, "access sink failed");
    }

    response
}

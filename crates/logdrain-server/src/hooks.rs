//! Lifecycle webhooks called by the host under `/.extensions`.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{delete, post, put},
    Router,
};
use tracing::info;

use crate::{error::AppError, store::StateStore};

pub fn router(store: StateStore) -> Router {
    Router::new()
        .route("/on-install", post(on_install))
        .route("/on-update", put(on_update))
        .route("/on-uninstall", delete(on_uninstall))
        .with_state(store)
}

async fn on_install() -> StatusCode {
    info!("extension installed");
    StatusCode::NO_CONTENT
}

async fn on_update() -> StatusCode {
    info!("extension updated");
    StatusCode::NO_CONTENT
}

/// Clears the state document so a reinstall starts from scratch.
async fn on_uninstall(State(store): State<StateStore>) -> Result<StatusCode, AppError> {
    store.reset().await?;
    info!(backend = store.backend_name(), "extension uninstalled, state cleared");
    Ok(StatusCode::NO_CONTENT)
}

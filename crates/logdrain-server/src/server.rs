use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use tracing::{info, warn};

use crate::{
    config::EnvProvider,
    pipeline::{build_with, BuildOptions},
};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory for `data.json`; see [`resolve_data_dir`].
    pub data_dir: Option<PathBuf>,
    /// Pre-built dashboard assets served under `/app`.
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("LOGDRAIN_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("LOGDRAIN_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            data_dir: std::env::var("LOGDRAIN_DATA_DIR").ok().map(PathBuf::from),
            static_dir: std::env::var("LOGDRAIN_STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("dist")),
        }
    }
}

/// Resolve and create the data directory.
///
/// Priority:
/// 1. the explicit path
/// 2. `LOGDRAIN_DATA_DIR`
/// 3. the platform app data dir (`~/.local/share/logdrain/`, etc.)
pub fn resolve_data_dir(data_dir: Option<&Path>) -> Result<PathBuf> {
    let path = match data_dir {
        Some(d) => d.to_path_buf(),
        None => match std::env::var("LOGDRAIN_DATA_DIR") {
            Ok(d) => PathBuf::from(d),
            Err(_) => ProjectDirs::from("", "", "logdrain")
                .context("could not determine platform data directory")?
                .data_dir()
                .to_owned(),
        },
    };
    std::fs::create_dir_all(&path)
        .with_context(|| format!("create data dir: {}", path.display()))?;
    Ok(path)
}

/// Serve the extension over TCP, configured from the process environment.
///
/// No log shipper is wired in here: scheduler triggers and manual runs answer
/// 503 until an embedding host supplies one through [`build_with`].
pub async fn run(cfg: ServerConfig) -> Result<()> {
    let data_dir = resolve_data_dir(cfg.data_dir.as_deref())?;
    info!(data_dir = %data_dir.display(), "using data directory");

    if !cfg.static_dir.is_dir() {
        warn!(static_dir = %cfg.static_dir.display(), "static directory not found, /app will 404");
    }

    let app = build_with(
        Arc::new(EnvProvider),
        None,
        BuildOptions {
            data_dir,
            static_dir: cfg.static_dir,
            ..Default::default()
        },
    )
    .context("resolve extension configuration")?;

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "logdrain server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}

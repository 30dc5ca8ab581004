pub mod access;
pub mod auth;
pub mod body;
pub mod config;
pub mod error;
pub mod handlers;
pub mod hooks;
pub mod meta;
pub mod pipeline;
pub mod process_logs;
pub mod server;
pub mod store;

use std::sync::Arc;

/// Shared application state threaded through the business handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: store::StateStore,
    /// Log shipping job; `None` when the host did not wire one in.
    pub shipper: Option<Arc<dyn process_logs::LogShipper>>,
    pub metadata: meta::Metadata,
}

pub use config::{ConfigError, ConfigProvider, EnvProvider, ExtensionConfig};
pub use pipeline::{build, build_with, BuildOptions};
pub use process_logs::{LogShipper, ShipOutcome};
pub use server::{resolve_data_dir, run, ServerConfig};
pub use store::{Document, StateStore, StorageProvider};

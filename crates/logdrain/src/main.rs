use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use logdrain_server::{
    store::{StateStore, STATE_FILE},
    ServerConfig,
};
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "logdrain", about = "Logs to CloudWatch extension server", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on (default: $LOGDRAIN_PORT or 3000)
        #[arg(long, env = "LOGDRAIN_PORT", default_value = "3000")]
        port: u16,
        /// Host to bind (default: $LOGDRAIN_HOST or 0.0.0.0)
        #[arg(long, env = "LOGDRAIN_HOST", default_value = "0.0.0.0")]
        host: String,
        /// Directory holding data.json (default: $LOGDRAIN_DATA_DIR or platform data dir)
        #[arg(long, env = "LOGDRAIN_DATA_DIR")]
        data_dir: Option<PathBuf>,
        /// Pre-built dashboard assets served under /app
        #[arg(long, env = "LOGDRAIN_STATIC_DIR", default_value = "dist")]
        static_dir: PathBuf,
    },
    /// Inspect or edit the local state document
    State {
        /// Directory holding data.json (default: $LOGDRAIN_DATA_DIR or platform data dir)
        #[arg(long, env = "LOGDRAIN_DATA_DIR")]
        data_dir: Option<PathBuf>,
        #[command(subcommand)]
        action: StateAction,
    },
}

#[derive(Subcommand)]
enum StateAction {
    /// Print the state document
    Show,
    /// Replace the state document with an empty one
    Reset,
    /// Set the shipper checkpoint, or clear it with --clear
    SetCheckpoint {
        #[arg(required_unless_present = "clear")]
        checkpoint: Option<String>,
        #[arg(long, conflicts_with = "checkpoint")]
        clear: bool,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LOGDRAIN_LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            host,
            data_dir,
            static_dir,
        } => {
            let cfg = ServerConfig {
                host,
                port,
                data_dir,
                static_dir,
            };
            logdrain_server::run(cfg).await
        }

        Commands::State { data_dir, action } => {
            let dir = logdrain_server::resolve_data_dir(data_dir.as_deref())?;
            let store = StateStore::local_file(dir.join(STATE_FILE));
            match action {
                StateAction::Show => cmd_show(&store).await,
                StateAction::Reset => cmd_reset(&store).await,
                StateAction::SetCheckpoint { checkpoint, clear } => {
                    cmd_set_checkpoint(&store, if clear { None } else { checkpoint }).await
                }
            }
        }
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_show(store: &StateStore) -> Result<()> {
    let doc = store.read().await.context("read state")?;
    let pretty = serde_json::to_string_pretty(&doc).context("render state")?;
    println!("{pretty}");
    Ok(())
}

async fn cmd_reset(store: &StateStore) -> Result<()> {
    store.reset().await.context("reset state")?;
    println!("✓ state cleared");
    Ok(())
}

async fn cmd_set_checkpoint(store: &StateStore, checkpoint: Option<String>) -> Result<()> {
    let updated = checkpoint.clone();
    store
        .read_modify_write(move |mut doc| {
            doc.set_checkpoint_id(updated);
            doc
        })
        .await
        .context("write state")?;
    match checkpoint {
        Some(c) => println!("✓ checkpoint set to {c}"),
        None => println!("✓ checkpoint cleared"),
    }
    Ok(())
}

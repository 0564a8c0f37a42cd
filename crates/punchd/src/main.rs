//! punchd - The punchclock attendance service
//!
//! Wires together:
//! - Configuration loading
//! - Store initialization
//! - Punch engine and its collaborators
//! - HTTP server
//! - Periodic missed punch-out sweep

mod http;

use anyhow::{Context, Result};
use clap::Parser;
use punch_config::load_config;
use punch_core::{Collaborators, PunchEngine};
use punch_store::{AuditEvent, AuditEventType, SessionStore, SqliteStore};
use punch_util::{default_config_path, DATABASE_FILENAME};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::http::AppState;

/// Rate-limit buckets idle this long are dropped
const RATE_LIMIT_IDLE: Duration = Duration::from_secs(600);

/// punchd - Attendance service
#[derive(Parser, Debug)]
#[command(name = "punchd")]
#[command(about = "Geofenced attendance service", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/punchclock/config.toml)
    #[arg(short, long, env = "PUNCH_CONFIG", default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set PUNCH_DATA_DIR env var)
    #[arg(short, long, env = "PUNCH_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Listen address override
    #[arg(long, env = "PUNCH_LISTEN")]
    listen: Option<SocketAddr>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

/// Main service state
struct Service {
    engine: Arc<PunchEngine>,
    state: Arc<AppState>,
    store: Arc<dyn SessionStore>,
    listener: TcpListener,
    sweep_interval: Duration,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        let policy = load_config(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        info!(
            config_path = %args.config.display(),
            site_count = policy.sites.len(),
            "Configuration loaded"
        );

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| policy.service.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join(DATABASE_FILENAME);
        let store: Arc<dyn SessionStore> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        store.append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;

        let collaborators = Collaborators::from_policy(&policy)
            .context("Failed to set up collaborator clients")?;

        let listen_addr = args.listen.unwrap_or(policy.service.listen_addr);
        let sweep_interval = policy.service.sweep_interval;

        let engine = Arc::new(PunchEngine::new(policy, store.clone(), collaborators));
        let state = Arc::new(AppState::new(engine.clone()));

        let listener = TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", listen_addr))?;

        info!(listen_addr = %listen_addr, "HTTP server listening");

        Ok(Self {
            engine,
            state,
            store,
            listener,
            sweep_interval,
        })
    }

    async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let server = tokio::spawn(http::serve(self.listener, self.state.clone(), shutdown_rx));

        let mut sigterm = signal(SignalKind::terminate())
            .context("Failed to create SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt())
            .context("Failed to create SIGINT handler")?;

        let mut sweep_timer = tokio::time::interval(self.sweep_interval);
        let mut sweep: Option<JoinHandle<()>> = None;

        info!("Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }

                // Missed punch-out sweep
                _ = sweep_timer.tick() => {
                    self.state.cleanup_rate_limits(RATE_LIMIT_IDLE);

                    if sweep.as_ref().is_some_and(|h| !h.is_finished()) {
                        debug!("Previous sweep still running, skipping tick");
                        continue;
                    }

                    let engine = self.engine.clone();
                    sweep = Some(tokio::spawn(async move {
                        if let Err(e) = engine.sweep_missed_punch_outs(punch_util::now()).await {
                            error!(error = %e, "Missed punch-out sweep failed");
                        }
                    }));
                }
            }
        }

        let _ = shutdown_tx.send(true);
        if let Err(e) = server.await {
            warn!(error = %e, "HTTP server task ended abnormally");
        }

        if let Err(e) = self.store.append_audit(AuditEvent::new(AuditEventType::ServiceStopped)) {
            warn!(error = %e, "Failed to log service shutdown");
        }

        info!("Shutdown complete");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "punchd starting"
    );

    let service = Service::new(&args).await?;
    service.run().await
}

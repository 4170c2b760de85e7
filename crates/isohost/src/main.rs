//! Isohost Server
//!
//! Hosts named JavaScript instances and runs them on request over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use isohost::config::{Overrides, ServerConfig};
use isohost::server::{AppState, create_router};
use isohost_runtime::{Platform, Registry};

const DEFAULT_LOG_FILTER: &str = "isohost=info,isohost_runtime=info,tower_http=debug";

/// Isolated script instance host
#[derive(Parser, Debug)]
#[command(name = "isohost")]
#[command(about = "Isolated script instance host", long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server host address
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(long)]
    port: Option<u16>,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Directory that relative script paths are resolved against
    #[arg(long)]
    script_root: Option<PathBuf>,

    /// Maximum number of script invocations running at once
    #[arg(long)]
    max_concurrent_runs: Option<usize>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            host: self.host.clone(),
            port: self.port,
            log_json: self.log_json,
            script_root: self.script_root.clone(),
            max_concurrent_runs: self.max_concurrent_runs,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = ServerConfig::load(args.config.as_deref())?.with_overrides(args.overrides());

    init_tracing(config.log_json);

    // V8 is brought up on the main thread before any runtime exists.
    let platform = Platform::init()?;

    // One current-thread runtime drives every registry operation and timer.
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(async_main(config, &platform))?;

    if let Err(e) = platform.shutdown() {
        warn!("Engine platform not shut down: {}", e);
    }
    info!("Server shutdown complete");
    Ok(())
}

async fn async_main(config: ServerConfig, platform: &Platform) -> Result<()> {
    info!("Starting isohost v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Entry function '{}', default timeout {:?}, {} concurrent runs",
        config.runtime.entry_function,
        config.runtime.default_timeout(),
        config.runtime.max_concurrent_runs
    );

    let registry = Arc::new(Registry::new(platform, config.runtime.clone()));
    let app = create_router(AppState::new(Arc::clone(&registry)));

    let addr: SocketAddr = config.bind_addr().parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.shutdown_all().await;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}

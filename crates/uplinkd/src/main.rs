//! uplinkd: router-resident multi-WAN failover daemon (§2).
//!
//! - Elects an active uplink among Starlink/cellular/Wi-Fi/LAN members
//! - Applies the decision through a pluggable `Controller`
//! - Serves an RPC/HTTP surface for status, metrics, and manual control
//!
//! Grounded on `strata_agent::main`'s CLI/state/task-spawn/shutdown shape.

mod discovery;
mod maintenance;
mod runtime;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter};
use uplinkd_common::Config;
use uplinkd_controller::{DirectApplier, MemberController, PolicyApplier, RouteApplier};
use uplinkd_core::TelemetryStore;
use uplinkd_rpc::{CommandBus, RpcState};

/// uplinkd daemon.
#[derive(Parser, Debug)]
#[command(name = "uplinkd", about = "Multi-WAN failover daemon")]
struct Cli {
    /// Path to a TOML config file. Defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// HTTP bind address for the metrics/health/RPC surface (§6.2).
    #[arg(long, default_value = "127.0.0.1:8733")]
    http_addr: String,

    /// Disable the HTTP surface entirely (RPC still reachable in-process).
    #[arg(long, default_value_t = false)]
    no_http: bool,

    /// Initial log filter, overridable at runtime via the `setlog` RPC
    /// method.
    #[arg(long, default_value = "info")]
    log_level: String,
}

const EXIT_OK: i32 = 0;
const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_RUNTIME_ERROR: i32 = 2;
const EXIT_DEPENDENCY_MISSING: i32 = 3;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    let (filter, reload_handle) = reload::Layer::new(env_filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    match run(cli, reload_handle).await {
        Ok(()) => std::process::ExitCode::from(EXIT_OK as u8),
        Err(StartupError::Config(detail)) => {
            tracing::error!(%detail, "configuration error");
            std::process::ExitCode::from(EXIT_CONFIG_ERROR as u8)
        }
        Err(StartupError::Dependency(detail)) => {
            tracing::error!(%detail, "missing dependency");
            std::process::ExitCode::from(EXIT_DEPENDENCY_MISSING as u8)
        }
        Err(StartupError::Runtime(detail)) => {
            tracing::error!(%detail, "unrecoverable runtime error");
            std::process::ExitCode::from(EXIT_RUNTIME_ERROR as u8)
        }
    }
}

enum StartupError {
    Config(String),
    Dependency(String),
    Runtime(String),
}

type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

async fn run(cli: Cli, reload_handle: ReloadHandle) -> Result<(), StartupError> {
    let config_path = cli.config.as_ref().map(|p| p.to_string_lossy().to_string());
    let config = match &cli.config {
        Some(path) => {
            let contents = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| StartupError::Config(format!("reading `{}`: {e}", path.display())))?;
            Config::from_toml_str(&contents).map_err(|e| StartupError::Config(e.to_string()))?
        }
        None => Config::default(),
    };

    tracing::info!(
        members = config.members.len(),
        poll_interval_ms = config.poll_interval_ms,
        decision_interval_ms = config.decision_interval_ms,
        "uplinkd starting"
    );

    let store = Arc::new(TelemetryStore::new(config.retention_hours));

    let applier: Box<dyn RouteApplier> = if config.use_controller {
        Box::new(PolicyApplier::default())
    } else {
        Box::new(DirectApplier::default())
    };
    let controller: Arc<dyn uplinkd_controller::Controller> =
        Arc::new(MemberController::new(applier));

    let (bus, command_rx) = CommandBus::new(64);
    let rpc = RpcState::new(
        store.clone(),
        config.clone(),
        controller.clone(),
        bus.clone(),
        env!("CARGO_PKG_VERSION").to_string(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_handle = if cli.no_http {
        None
    } else {
        let addr: std::net::SocketAddr = cli
            .http_addr
            .parse()
            .map_err(|e| StartupError::Config(format!("invalid --http-addr: {e}")))?;
        let router = uplinkd_rpc::http::router(rpc.clone());
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| StartupError::Dependency(format!("binding {addr}: {e}")))?;
        tracing::info!(%addr, "RPC/HTTP surface listening");
        let mut http_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    http_shutdown.changed().await.ok();
                })
                .await
        }))
    };

    let log_reload = move |level: &str| -> Result<(), String> {
        let parsed: LevelFilter = level
            .parse()
            .map_err(|_| format!("unrecognized log level `{level}`"))?;
        reload_handle
            .modify(|filter| *filter = EnvFilter::new(parsed.to_string()))
            .map_err(|e| e.to_string())
    };

    let runtime_result = runtime::run(
        config,
        config_path,
        store,
        controller,
        rpc,
        command_rx,
        log_reload,
        shutdown_rx,
    )
    .await;

    shutdown_tx.send(true).ok();
    if let Some(handle) = http_handle {
        let _ = handle.await;
    }

    runtime_result.map_err(|e| StartupError::Runtime(e.to_string()))
}

//! slicemetrics-svc - slicing metrics microservice
//!
//! Accepts a model upload plus printer/process/filament profile names,
//! runs the configured slicer binary and answers with filament volume,
//! weight and estimated print time.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use slicemetrics_common::config::{load_config_with_source, write_toml_config, ConfigResolver, TomlConfig};
use slicemetrics_common::logging::init_logging;
use slicemetrics_svc::models::ProfileKind;
use slicemetrics_svc::services::{CliSlicer, ProfileDirs, ProfileStore, SliceService};
use slicemetrics_svc::types::SlicerBackend;
use slicemetrics_svc::{build_router, AppState};
use tokio::signal;
use tracing::{info, warn};

/// Command-line arguments for slicemetrics-svc
#[derive(Parser, Debug)]
#[command(name = "slicemetrics-svc")]
#[command(about = "Slice 3D models and report filament and print time metrics")]
#[command(version)]
struct Args {
    /// Config file (overrides SLICEMETRICS_CONFIG and the default locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:5780
    #[arg(short, long, env = "SLICEMETRICS_BIND")]
    bind: Option<String>,

    /// Slicer binary to run
    #[arg(long, env = "SLICEMETRICS_SLICER_BIN")]
    slicer_bin: Option<PathBuf>,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, env = "SLICEMETRICS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Write a config file with all defaults to PATH and exit
    #[arg(long, value_name = "PATH")]
    write_default_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(path) = &args.write_default_config {
        write_toml_config(&TomlConfig::default(), path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let config_path = ConfigResolver::new(args.config.clone()).resolve();
    // Logged below, once the subscriber exists
    let (mut config, config_source) =
        load_config_with_source(config_path.as_deref()).context("Failed to load configuration")?;

    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(binary) = args.slicer_bin {
        config.slicer.binary = binary;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate().context("Invalid configuration")?;

    init_logging(&config.logging.level)?;

    info!("Starting slicemetrics-svc {}", env!("CARGO_PKG_VERSION"));
    config_source.log();

    let dirs = ProfileDirs::from(&config.profiles);
    let store = ProfileStore::load(&dirs).context("Failed to load profiles")?;
    for kind in ProfileKind::ALL {
        info!(
            kind = %kind,
            count = store.len(kind),
            dir = %dirs.dir_for(kind).display(),
            "Profiles loaded"
        );
    }

    let backend = Arc::new(CliSlicer::from_config(&config.slicer));
    let probe = backend.probe().await;
    if probe.available {
        info!(slicer = %probe.detail, "Slicer binary found");
    } else {
        warn!(detail = %probe.detail, "Slicer binary is not usable; /health will report degraded");
    }

    std::fs::create_dir_all(&config.work_dir)
        .with_context(|| format!("Failed to create work dir {}", config.work_dir.display()))?;
    info!(
        work_dir = %config.work_dir.display(),
        capacity = config.admission.capacity,
        policy = ?config.admission.policy,
        timeout_secs = config.slicer.timeout_secs,
        "Slicing engine ready"
    );

    let service = Arc::new(SliceService::new(&config, store, backend));
    let app = build_router(AppState::new(service));

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server.bind))?;
    info!("Listening on http://{}", config.server.bind);
    info!("Health check: http://{}/health", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

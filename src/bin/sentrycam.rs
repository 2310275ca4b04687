//! SentryCam server.
//!
//! ```bash
//! sentrycam --config /etc/sentrycam.toml --auto-start
//! sentrycam --synthetic --bind 127.0.0.1:8080
//! ```

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use sentrycam::config::SentryConfig;
use sentrycam::SurveillanceSystem;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "sentrycam", version)]
#[command(about = "Camera monitor with live stream, recording and motion detection")]
struct Args {
    /// TOML configuration file
    #[arg(long, default_value = "sentrycam.toml")]
    config: PathBuf,

    /// Start motion detection immediately and write the presence marker
    #[arg(long)]
    auto_start: bool,

    /// Override the HTTP bind address (e.g. 0.0.0.0:5000)
    #[arg(long)]
    bind: Option<String>,

    /// Use the in-memory camera instead of hardware
    #[arg(long)]
    synthetic: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    sentrycam::init_logging();

    let mut config = SentryConfig::load(&args.config)?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if args.synthetic {
        config.camera.backend = "synthetic".to_string();
    }

    let bind = config.server.bind.clone();
    let marker = config.marker_path();

    let system = SurveillanceSystem::open(config)
        .await
        .context("Camera initialization failed")?;

    if let Err(e) = system.cleanup() {
        log::warn!("Retention cleanup failed: {}", e);
    }

    if args.auto_start {
        log::info!("Auto-start: enabling motion detection");
        if let Err(e) = system.start_motion().await {
            log::error!("Motion detection did not start: {}", e);
        }
        write_marker(&marker)?;
    }

    log::info!(
        "SentryCam {} serving on http://{} (motion detection {})",
        sentrycam::VERSION,
        bind,
        if system.monitor().is_active() { "ACTIVE" } else { "INACTIVE" }
    );

    let served = sentrycam::web::serve(system.clone(), &bind, shutdown_signal()).await;

    system.shutdown().await;
    if args.auto_start {
        remove_marker(&marker);
    }
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("Ctrl-C received, shutting down"),
        _ = terminate => log::info!("SIGTERM received, shutting down"),
    }
}

fn write_marker(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        format!(
            "System started {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ),
    )
    .with_context(|| format!("Failed to write marker {}", path.display()))?;
    log::info!("Marker written: {}", path.display());
    Ok(())
}

fn remove_marker(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::info!("Marker removed: {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Could not remove marker {}: {}", path.display(), e),
    }
}

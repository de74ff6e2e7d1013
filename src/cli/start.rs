//! Start the courier daemon process.

use crate::control;
use crate::runtime::{self, RuntimeOptions};
use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Get the PID file path.
pub fn pid_file_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".courier/courier.pid")
}

/// Check if courier is already running. Returns the PID if so.
pub fn check_already_running() -> Option<i32> {
    let pid_path = pid_file_path();
    if !pid_path.exists() {
        return None;
    }
    let pid_str = std::fs::read_to_string(&pid_path).ok()?;
    let pid: i32 = pid_str.trim().parse().ok()?;

    let output = std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output();
    if matches!(output, Ok(o) if o.status.success()) {
        return Some(pid);
    }

    // Stale PID file
    let _ = std::fs::remove_file(&pid_path);
    None
}

/// Start the daemon: write the pidfile, attach to the browser, serve the
/// control socket, and drive tabs until a shutdown signal arrives.
pub async fn run(devtools: Option<String>, paused: bool, verbose: bool) -> Result<()> {
    if let Some(pid) = check_already_running() {
        eprintln!("Courier is already running (PID {pid}).");
        eprintln!("Use 'courier stop' first.");
        std::process::exit(1);
    }

    let pid_path = pid_file_path();
    if let Some(parent) = pid_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let directive = if verbose {
        "courier_runtime=debug"
    } else {
        "courier_runtime=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .init();

    info!("starting courier v{}", env!("CARGO_PKG_VERSION"));
    std::fs::write(&pid_path, std::process::id().to_string())
        .context("failed to write PID file")?;

    let socket_path = control::default_socket_path();
    eprintln!(
        "Courier v{} started (PID {}).",
        env!("CARGO_PKG_VERSION"),
        std::process::id()
    );
    eprintln!("Control socket: {}", socket_path.display());

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_cancel.cancel();
    });

    let options = RuntimeOptions {
        devtools_url: devtools,
        socket_path,
        config_path: None,
        automation_on: !paused,
    };
    let result = runtime::run(options, cancel).await;

    let _ = std::fs::remove_file(&pid_path);
    eprintln!("Courier stopped.");
    result
}

/// Resolve on SIGINT or SIGTERM; `courier stop` sends the latter.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let term = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                warn!("could not install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }
}

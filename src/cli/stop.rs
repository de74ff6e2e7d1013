//! Stop the running courier daemon.

use crate::cli::start::pid_file_path;
use crate::control;
use anyhow::{bail, Context, Result};
use std::process::Command;
use std::time::Duration;

/// Stop the daemon by reading the PID file and sending SIGTERM.
pub async fn run() -> Result<()> {
    let pid_path = pid_file_path();

    if !pid_path.exists() {
        bail!(
            "courier is not running (no PID file at {})",
            pid_path.display()
        );
    }

    let pid_str = std::fs::read_to_string(&pid_path).context("failed to read PID file")?;
    let pid: i32 = pid_str.trim().parse().context("invalid PID in PID file")?;

    println!("Stopping courier (PID {pid})...");

    let output = Command::new("kill")
        .arg(pid.to_string())
        .output()
        .context("failed to send SIGTERM")?;
    if !output.status.success() {
        let _ = std::fs::remove_file(&pid_path);
        bail!("failed to send SIGTERM to PID {pid} (process may have already exited)");
    }

    // Wait up to 5 seconds for the process to exit
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let output = Command::new("kill").args(["-0", &pid.to_string()]).output();
        if matches!(output, Ok(o) if !o.status.success()) {
            println!("Courier stopped.");
            let _ = std::fs::remove_file(&pid_path);
            let _ = std::fs::remove_file(control::default_socket_path());
            return Ok(());
        }
    }

    // Clean up PID file anyway
    let _ = std::fs::remove_file(&pid_path);
    println!("Warning: courier may still be running. PID file removed.");
    Ok(())
}

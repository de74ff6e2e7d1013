//! Environment readiness check.

use crate::cdp;
use crate::cli::start;
use crate::config::{Config, ConfigStore};
use crate::control;
use anyhow::Result;

/// Check browser, DevTools endpoint, config, and socket path.
pub async fn run() -> Result<()> {
    println!("Courier Doctor");
    println!("==============");
    println!();

    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    println!("OS:   {os}");
    println!("Arch: {arch}");
    println!();

    // Browser binary, for starting a debuggable browser by hand.
    match cdp::find_browser() {
        Some(path) => println!("[OK] Chrome/Chromium found: {}", path.display()),
        None => println!(
            "[!!] Chrome/Chromium NOT found. Install one or set COURIER_BROWSER_PATH."
        ),
    }

    // Config file and active oracle.
    let store = ConfigStore::at_default();
    let config = match store.load() {
        Ok(config) => {
            println!(
                "[OK] Config at {} (oracle: {})",
                store.path().display(),
                store.oracle_kind().as_str()
            );
            config
        }
        Err(err) => {
            println!("[!!] Config unreadable: {err:#}");
            Config::default()
        }
    };

    // The endpoint the daemon will attach to.
    let reachable = match cdp::probe_endpoint(&config.devtools_url).await {
        Ok(browser) => {
            println!("[OK] DevTools at {}: {browser}", config.devtools_url);
            true
        }
        Err(_) => {
            println!("[!!] DevTools NOT reachable at {}.", config.devtools_url);
            println!("     Start the browser with --remote-debugging-port=9222.");
            false
        }
    };

    // Daemon state and socket path.
    match start::check_already_running() {
        Some(pid) => println!("[OK] Daemon running (PID {pid})"),
        None => println!("[??] Daemon not running. Start it with 'courier start'."),
    }
    let socket_path = control::default_socket_path();
    match socket_path.parent() {
        Some(parent) if parent.exists() => {
            println!("[OK] Socket path {} is writable", socket_path.display())
        }
        _ => println!(
            "[??] Socket directory missing (created on start): {}",
            socket_path.display()
        ),
    }

    println!();
    if reachable {
        println!("Status: READY");
    } else {
        println!("Status: NOT READY");
        println!("  Courier attaches to a running browser; start one with DevTools enabled.");
    }

    Ok(())
}

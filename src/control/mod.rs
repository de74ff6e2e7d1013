//! Control plane: a Unix-socket JSON protocol for steering the daemon.
//!
//! The CLI talks to the running daemon through this socket: pause and
//! resume the automation loop, switch the active oracle, read status.

pub mod protocol;
pub mod server;

pub use server::{ControlServer, ControlState};

use std::path::PathBuf;

/// `~/.courier/courier.sock`, or a temp-dir fallback when there is no home.
pub fn default_socket_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".courier").join("courier.sock"))
        .unwrap_or_else(|| std::env::temp_dir().join("courier.sock"))
}

//! Resume the automation loop of a running daemon.

use crate::cli::client;
use anyhow::Result;

pub async fn run() -> Result<()> {
    client::request("resume", serde_json::json!({})).await?;
    println!("Automation resumed.");
    Ok(())
}

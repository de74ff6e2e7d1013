//! Pause the automation loop of a running daemon.

use crate::cli::client;
use anyhow::Result;

pub async fn run() -> Result<()> {
    client::request("pause", serde_json::json!({})).await?;
    println!("Automation paused. Questions on screen stay where they are.");
    Ok(())
}

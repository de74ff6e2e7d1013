//! Select which oracle answers relayed questions.

use crate::cli::{client, start};
use crate::config::ConfigStore;
use crate::oracle::OracleKind;
use anyhow::Result;

pub async fn run(oracle: &str) -> Result<()> {
    // Validate locally so a typo fails with the full list, not a socket trip.
    let kind = OracleKind::parse(oracle)?;

    if start::check_already_running().is_none() {
        ConfigStore::at_default().set_oracle(kind)?;
        println!(
            "Oracle set to {} (daemon not running; takes effect on next start).",
            kind.display_name()
        );
        return Ok(());
    }

    let result = client::request("use", serde_json::json!({ "oracle": kind.as_str() })).await?;
    println!("Oracle set to {}.", kind.display_name());
    if !result["available"].as_bool().unwrap_or(false) {
        println!(
            "No {} tab is open. Open {} in the browser so questions have somewhere to go.",
            kind.display_name(),
            kind.url_pattern().host()
        );
    }
    Ok(())
}

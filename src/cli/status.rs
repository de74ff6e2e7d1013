//! Show status of the running courier daemon.

use crate::cli::{client, start};
use anyhow::Result;
use serde_json::Value;

/// Connect to the control socket and display runtime status.
pub async fn run(json: bool) -> Result<()> {
    if start::check_already_running().is_none() {
        if json {
            println!(r#"{{"running": false}}"#);
        } else {
            println!("Courier is not running.");
        }
        return Ok(());
    }

    let result = client::request("status", serde_json::json!({})).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!(
        "Courier v{} (up {}s)",
        result["version"].as_str().unwrap_or("?"),
        result["uptime_s"].as_u64().unwrap_or(0)
    );
    println!(
        "  Automation: {}",
        if result["automation"].as_bool().unwrap_or(false) {
            "on"
        } else {
            "paused"
        }
    );
    println!(
        "  Oracle:     {} ({})",
        result["oracle"].as_str().unwrap_or("?"),
        tab_state(&result["tabs"]["oracle"], &result["session"]["oracle"]["context"]),
    );
    println!(
        "  Study tab:  {}",
        tab_state(&result["tabs"]["task"], &result["session"]["task"]["context"]),
    );
    println!(
        "  Relay:      {}",
        if result["session"]["relay_in_flight"]
            .as_bool()
            .unwrap_or(false)
        {
            "question in flight"
        } else {
            "idle"
        }
    );

    Ok(())
}

fn tab_state(open: &Value, slot_context: &Value) -> String {
    match (open.as_bool().unwrap_or(false), slot_context.as_u64()) {
        (_, Some(ctx)) => format!("tab open, role held by ctx:{ctx}"),
        (true, None) => "tab open".to_string(),
        (false, None) => "no tab open".to_string(),
    }
}

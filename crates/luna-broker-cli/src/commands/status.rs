use anyhow::Result;
use luna_broker_core::{BrokerClient, BrokerConfig};
use serde_json::json;

use crate::cli::OutputFormat;

/// Connects and hangs up. No request is sent.
pub async fn run(config: &BrokerConfig, format: OutputFormat) -> Result<()> {
    let endpoint = config.endpoint()?;
    let reachable = match BrokerClient::connect(&endpoint).await {
        Ok(client) => {
            client.close().await?;
            true
        }
        Err(_) => false,
    };

    if format.is_json() {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "endpoint": endpoint, "running": reachable }))?
        );
    } else if reachable {
        println!("Broker running at {endpoint}");
    } else {
        println!("Broker not running at {endpoint}");
    }

    if !reachable {
        std::process::exit(1);
    }
    Ok(())
}

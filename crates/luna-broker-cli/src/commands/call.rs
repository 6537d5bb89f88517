use anyhow::{Result, bail};
use luna_broker_core::{BrokerClient, BrokerConfig};

use super::parse_params;
use crate::cli::{CallArgs, OutputFormat};

pub async fn run(config: &BrokerConfig, args: CallArgs, format: OutputFormat) -> Result<()> {
    let params = parse_params(args.params.as_deref())?;
    let endpoint = config.endpoint()?;

    let mut client = BrokerClient::connect(&endpoint).await?;
    let response = client.call(&args.operation, params).await?;
    client.close().await?;

    if format.is_json() {
        println!("{}", serde_json::to_string_pretty(&response)?);
        if !response.success {
            std::process::exit(1);
        }
        return Ok(());
    }

    if !response.success {
        bail!(
            "{}",
            response
                .error_message
                .unwrap_or_else(|| "Unknown broker error".to_string())
        );
    }
    if let Some(data) = response.data {
        println!("{}", serde_json::to_string_pretty(&data)?);
    }
    Ok(())
}

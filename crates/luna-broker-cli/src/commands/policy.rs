use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use luna_broker_core::models::BrokerRequest;
use luna_broker_core::{
    BrokerConfig, CallerIdentity, OperationExecutor, RequestDispatcher, SecurityPolicy,
    SecurityValidator,
};
use luna_platform::{MemoryBackend, Platform};
use serde_json::json;
use tracing::warn;

use super::parse_params;
use crate::cli::{OutputFormat, PolicyCommands};

pub async fn run(config: &BrokerConfig, command: PolicyCommands, format: OutputFormat) -> Result<()> {
    match command {
        PolicyCommands::Show => show(config),
        PolicyCommands::Init { path, force } => {
            let path = match path {
                Some(path) => path,
                None => config.policy_path()?,
            };
            init(&path, force)
        }
        PolicyCommands::Check { operation, params } => {
            check(config, &operation, params.as_deref(), format).await
        }
    }
}

fn show(config: &BrokerConfig) -> Result<()> {
    let path = config.policy_path()?;
    let policy = config.load_policy()?;
    if path.exists() {
        println!("# Loaded from {}", path.display());
    } else {
        println!("# Built-in defaults ({} does not exist)", path.display());
    }
    print!("{}", policy.to_toml()?);
    Ok(())
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = SecurityPolicy::default().to_toml()?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote default security policy to {}", path.display());
    Ok(())
}

async fn check(
    config: &BrokerConfig,
    operation: &str,
    params: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let params = parse_params(params)?;
    let policy = config.load_policy()?;

    // Facts such as the display size and process table come from the real OS
    // when it is reachable.
    let platform = match config.native_options().and_then(|options| Ok(Platform::native(&options)?)) {
        Ok(platform) => platform,
        Err(err) => {
            warn!(error = %err, "Native platform unavailable, using configured defaults");
            MemoryBackend::new(config.display()).platform()
        }
    };

    let validator = SecurityValidator::new(Arc::new(policy));
    let executor = OperationExecutor::new(platform, config.executor_options());
    let dispatcher = RequestDispatcher::new(Arc::new(validator), Arc::new(executor));
    let request = BrokerRequest::new(operation, params);
    let caller = CallerIdentity::new("local", Some(std::process::id()));
    let result = dispatcher.evaluate(&request, &caller).await;

    if format.is_json() {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "operation": operation,
                "allowed": result.valid,
                "reason": result.reason,
            }))?
        );
    } else if result.valid {
        println!("allowed: {operation}");
    } else {
        println!(
            "denied: {operation}: {}",
            result.reason.as_deref().unwrap_or("no reason given")
        );
    }

    if !result.valid {
        std::process::exit(1);
    }
    Ok(())
}

use anyhow::Result;
use luna_broker_core::{BrokerConfig, BrokerService};
use luna_platform::{MemoryBackend, Platform};
use tracing::{info, warn};

use crate::cli::ServeArgs;

pub async fn run(config: BrokerConfig, args: ServeArgs) -> Result<()> {
    let platform = if args.dry_run {
        warn!("Dry run: operations are recorded in memory and never reach the OS");
        MemoryBackend::new(config.display()).platform()
    } else {
        Platform::native(&config.native_options()?)?
    };

    let mut service = BrokerService::new(config, platform);
    service.start().await?;
    if let Some(endpoint) = service.endpoint() {
        println!("Luna broker listening on {endpoint}");
    }

    tokio::select! {
        result = service.wait() => result,
        _ = shutdown_signal() => {
            info!("Shutdown requested");
            service.stop().await
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable, waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

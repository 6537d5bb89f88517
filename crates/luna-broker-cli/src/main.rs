mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use luna_broker_core::{BrokerConfig, paths};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let serving = matches!(cli.command, Commands::Serve(_));
    let _guard = init_logging(cli.verbose, serving)?;

    let mut config = match &cli.config {
        Some(path) => BrokerConfig::load(path)?,
        None => match paths::config_path() {
            Ok(path) => BrokerConfig::load_or_default(&path)?,
            Err(_) => BrokerConfig::default(),
        },
    };
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = Some(endpoint.clone());
    }

    match cli.command {
        Commands::Serve(args) => commands::serve::run(config, args).await,
        Commands::Call(args) => commands::call::run(&config, args, cli.format).await,
        Commands::Status => commands::status::run(&config, cli.format).await,
        Commands::Policy { command } => commands::policy::run(&config, command, cli.format).await,
    }
}

/// Client commands log warnings to stderr only. `serve` also writes a daily
/// rolling file under the broker's logs directory.
fn init_logging(verbose: bool, serving: bool) -> Result<Option<WorkerGuard>> {
    let default_level = match (verbose, serving) {
        (true, _) => "debug",
        (false, true) => "info",
        (false, false) => "warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);

    if !serving {
        tracing_subscriber::registry().with(filter).with(stderr).init();
        return Ok(None);
    }

    let file_appender = tracing_appender::rolling::daily(paths::logs_dir()?, "luna-broker.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .with_level(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .init();
    Ok(Some(guard))
}

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format for CLI commands
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        matches!(self, OutputFormat::Json)
    }
}

#[derive(Parser)]
#[command(name = "luna-broker")]
#[command(version, about = "Luna Privilege Broker - policy-checked OS operations over local IPC")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to <config dir>/luna-broker/config.toml)
    #[arg(long, global = true, env = "LUNA_BROKER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Pipe or socket path, overriding the config file
    #[arg(long, global = true, env = "LUNA_BROKER_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the broker in the foreground until Ctrl+C or SIGTERM
    Serve(ServeArgs),

    /// Send one request to a running broker
    Call(CallArgs),

    /// Check whether a broker is accepting connections
    Status,

    /// Security policy tools
    Policy {
        #[command(subcommand)]
        command: PolicyCommands,
    },
}

#[derive(Args)]
pub struct ServeArgs {
    /// Record operations in memory instead of touching the OS
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct CallArgs {
    /// Operation name, e.g. uiautomation.getwindows
    pub operation: String,

    /// Parameters as a JSON object
    #[arg(short, long)]
    pub params: Option<String>,
}

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// Print the effective security policy as TOML
    Show,

    /// Write the built-in default policy to the policy path
    Init {
        /// Destination (defaults to the configured policy path)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Decide a request against the policy without executing it
    Check {
        /// Operation name
        operation: String,

        /// Parameters as a JSON object
        #[arg(short, long)]
        params: Option<String>,
    },
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// hwfand: temperature-driven PWM fan daemon for hwmon devices
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file path (default: $HWFAND_CONFIG, then /etc/hwfand/config.yml)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level, including every held cycle
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the control loop (default)
    Run,
    /// Show what the running daemon last did
    Status {
        /// Print the raw JSON snapshot
        #[arg(long)]
        json: bool,
    },
    /// Stop the running daemon and pin the fan at full duty
    Emergency,
    /// Pin the fan at the configured safe duty, for use at system shutdown
    SafeDuty,
    /// Validate the configuration and print the effective settings
    CheckConfig,
}

impl Cli {
    pub fn action(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}

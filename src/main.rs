use std::process;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, error, info};
use syslog::{BasicLogger, Facility, Formatter3164};

use hwfand::{
    application::{Application, RunOutcome},
    config::Config,
    lock, operator,
    status::StatusSnapshot,
};

mod cli;

use cli::{Cli, Command};

fn init_log(verbose: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    syslog::unix(Formatter3164 {
        facility: Facility::LOG_DAEMON,
        hostname: None,
        process: "hwfand".into(),
        pid: process::id(),
    })
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| {
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|()| log::set_max_level(level))
            .map_err(|e| anyhow!("{e}"))
    })
}

async fn run_daemon(config: Config) -> Result<()> {
    let mut app = Application::builder().with_config(config).build()?;

    match app.run().await {
        Ok(RunOutcome::Stopped) => {
            info!("hwfand stopped");
            Ok(())
        }
        Ok(RunOutcome::AlreadyRunning) => Ok(()),
        Err(e) => {
            error!("{e:#}");
            Err(e)
        }
    }
}

fn daemon_state(config: &Config) -> String {
    match lock::is_held(&config.lock_path) {
        Ok(true) => match lock::holder_pid(&config.lock_path) {
            Some(pid) => format!("running (PID {pid})"),
            None => "running".to_string(),
        },
        Ok(false) => "not running".to_string(),
        Err(_) => "unknown".to_string(),
    }
}

/// What `status` prints on stdout. With `json`, stdout carries the snapshot
/// or nothing at all.
fn status_report(config: &Config, json: bool) -> Result<String> {
    let daemon = daemon_state(config);

    let snapshot = match StatusSnapshot::load(&config.status_path) {
        Ok(snapshot) => snapshot,
        Err(e) if !config.status_path.exists() => {
            let missing = format!("no status recorded at {}", config.status_path.display());
            if json {
                return Err(e).context(format!("daemon {daemon}, {missing}"));
            }
            return Ok(format!("daemon:      {daemon}\n{missing}"));
        }
        Err(e) => return Err(e),
    };

    if json {
        Ok(serde_json::to_string_pretty(&snapshot)?)
    } else {
        Ok(format!("daemon:      {daemon}\n{}", snapshot.render()))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = init_log(cli.verbose) {
        eprintln!("hwfand: syslog unavailable, continuing without logging: {e}");
    }

    let config = Config::load(cli.config.clone()).context("Failed to load configuration")?;

    match cli.action() {
        Command::Run => run_daemon(config).await,
        Command::Status { json } => {
            println!("{}", status_report(&config, json)?);
            Ok(())
        }
        Command::Emergency => {
            operator::emergency_override(&config).await?;
            println!("fan pinned at full duty");
            Ok(())
        }
        Command::SafeDuty => {
            match operator::apply_safe_duty(&config).await {
                Some(duty) => println!("fan set to safe duty {duty}"),
                None => eprintln!("safe duty not applied, see the system log"),
            }
            Ok(())
        }
        Command::CheckConfig => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
    }
}

//! easyserial binary
//!
//! Sends one framed instruction and prints the reply as JSON on stdout.
//! Logs go to stderr.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use easyserial_cli::{run, watchdog, Cli};
use easyserial_core::convert::display_to_string;
use easyserial_core::guard::{DeviceLock, GuardError};
use easyserial_core::protocol::Exchanger;

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    tracing::debug!("easyserial v{}", easyserial_core::VERSION);

    if cli.deadline_secs > 0 {
        watchdog::arm(Duration::from_secs(cli.deadline_secs));
    }

    let _lock = if cli.no_lock {
        None
    } else {
        match DeviceLock::acquire(cli.wait) {
            Ok(lock) => Some(lock),
            Err(GuardError::Busy(addr)) => {
                tracing::debug!("device lock {} held elsewhere", addr);
                println!("{}", display_to_string("busy"));
                return Ok(ExitCode::SUCCESS);
            }
            Err(e) => return Err(e.into()),
        }
    };

    let engine = Exchanger::new(cli.exchange_config());
    match run(&cli, &engine)? {
        Ok(report) => {
            println!("{}", display_to_string(&report));
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            println!("{}", display_to_string(&failure));
            Ok(ExitCode::FAILURE)
        }
    }
}

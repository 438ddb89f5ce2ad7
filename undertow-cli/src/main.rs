//! Undertow CLI - Command-line interface
//!
//! Inspects torrents and plays files through the streaming pipeline against
//! the simulated engine.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use undertow_core::UndertowError;
use undertow_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "undertow")]
#[command(about = "Stream files out of a BitTorrent swarm")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// Console log level (RUST_LOG overrides)
    #[arg(long, value_enum, default_value_t = CliLogLevel::Warn, global = true)]
    log_level: CliLogLevel,

    /// Directory for the full trace log
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref()) {
        eprintln!("warning: tracing disabled: {e}");
    }

    match commands::handle_command(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!("Command failed: {e:?}");
            match e.downcast_ref::<UndertowError>() {
                Some(error) => {
                    eprintln!("error: {}", error.user_message());
                    eprintln!("  {e:#}");
                    // Usage errors exit with 2, like clap's own
                    if error.is_user_error() {
                        ExitCode::from(2)
                    } else {
                        ExitCode::FAILURE
                    }
                }
                None => {
                    eprintln!("error: {e:#}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

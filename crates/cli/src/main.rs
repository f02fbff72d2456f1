// shipmatch CLI - reconcile warehouse fulfillment against the order book

mod exit_codes;
mod export;
mod recon;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use exit_codes::EXIT_SUCCESS;
use recon::ReconCommands;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "SHIPMATCH_LOG";

#[derive(Parser)]
#[command(name = "shipmatch")]
#[command(about = "Reconcile packed and shipped quantities against the order book")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Log filter, e.g. "debug" or "shipmatch_recon=debug" (default: $SHIPMATCH_LOG, else info)
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: ReconCommands,
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("SHIPMATCH_GIT_HASH"), ")",
        "\nengine:  shipmatch-recon ", env!("CARGO_PKG_VERSION"),
    )
}

/// Logs go to stderr so `--json` output on stdout stays machine-readable.
fn init_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(f) => EnvFilter::new(f),
        None => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log.as_deref());

    match recon::cmd_recon(cli.command) {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

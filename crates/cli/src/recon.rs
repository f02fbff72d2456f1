//! `shipmatch run` / `shipmatch validate`: config-driven order reconciliation.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use shipmatch_recon::{ReconConfig, ReconError, ReconResult};
use tracing::info;

use crate::exit_codes::{recon_exit_code, EXIT_RECON_PARTIAL, EXIT_RECON_RUNTIME};
use crate::export;
use crate::CliError;

#[derive(Subcommand)]
pub enum ReconCommands {
    /// Run reconciliation from a TOML config file
    #[command(after_help = "\
Examples:
  shipmatch run weekly.recon.toml
  shipmatch run weekly.recon.toml --json
  shipmatch run weekly.recon.toml --output result.json --csv results.csv
  shipmatch run weekly.recon.toml --threshold 85")]
    Run {
        /// Path to the .recon.toml config file
        config: PathBuf,

        /// Output JSON to stdout instead of only the human summary
        #[arg(long)]
        json: bool,

        /// Write JSON output to file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write match results as CSV to file
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Override matching.fuzzy_threshold (0-100)
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Validate a recon config without running
    #[command(after_help = "\
Examples:
  shipmatch validate weekly.recon.toml")]
    Validate {
        /// Path to the .recon.toml config file
        config: PathBuf,
    },
}

pub fn cmd_recon(cmd: ReconCommands) -> Result<(), CliError> {
    match cmd {
        ReconCommands::Run { config, json, output, csv, threshold } => {
            cmd_recon_run(config, json, output, csv, threshold)
        }
        ReconCommands::Validate { config } => cmd_recon_validate(config),
    }
}

fn recon_err(code: u8, msg: impl Into<String>) -> CliError {
    CliError { code, message: msg.into(), hint: None }
}

fn engine_err(err: ReconError) -> CliError {
    let hint = match &err {
        ReconError::NoInputs(_) => Some("add [inputs.orders] and [[inputs.fulfillment]] sections to the config"),
        ReconError::MissingColumn { .. } => Some("map the header with [inputs.<file>.columns] in the config"),
        _ => None,
    };
    let e = recon_err(recon_exit_code(&err), err.to_string());
    match hint {
        Some(h) => e.with_hint(h),
        None => e,
    }
}

fn load_config(config_path: &Path) -> Result<ReconConfig, CliError> {
    let config_str = std::fs::read_to_string(config_path)
        .map_err(|e| recon_err(EXIT_RECON_RUNTIME, format!("cannot read config: {e}")))?;
    ReconConfig::from_toml(&config_str).map_err(engine_err)
}

fn cmd_recon_run(
    config_path: PathBuf,
    json_output: bool,
    output_file: Option<PathBuf>,
    csv_file: Option<PathBuf>,
    threshold: Option<f64>,
) -> Result<(), CliError> {
    let mut config = load_config(&config_path)?;
    if let Some(t) = threshold {
        config.matching.fuzzy_threshold = t;
    }

    // Input files resolve relative to the config file's directory
    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let input = shipmatch_recon::load_input(&config, base_dir).map_err(engine_err)?;
    info!(
        orders = input.orders.len(),
        fulfillment = input.fulfillment.len(),
        "loaded input files"
    );

    let result = shipmatch_recon::run(&config, &input).map_err(engine_err)?;

    if output_file.is_some() || json_output {
        let json_str = serde_json::to_string_pretty(&result)
            .map_err(|e| recon_err(EXIT_RECON_RUNTIME, format!("JSON serialization error: {e}")))?;

        if let Some(ref path) = output_file {
            std::fs::write(path, &json_str)
                .map_err(|e| recon_err(EXIT_RECON_RUNTIME, format!("cannot write output: {e}")))?;
            eprintln!("wrote {}", path.display());
        }

        if json_output {
            println!("{json_str}");
        }
    }

    if let Some(ref path) = csv_file {
        export::write_results_file(path, &result.results)
            .map_err(|e| recon_err(EXIT_RECON_RUNTIME, format!("cannot write CSV: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    print_summary(&result);

    if !result.failures.is_empty() {
        return Err(recon_err(
            EXIT_RECON_PARTIAL,
            format!("{} customer(s) did not complete", result.failures.len()),
        ));
    }

    Ok(())
}

/// Human summary to stderr.
fn print_summary(result: &ReconResult) {
    let s = &result.summary;
    eprintln!(
        "recon '{}': {} groups: {} exact, {} fuzzy, {} unmatched ({:.1}% linked)",
        result.meta.config_name,
        s.total_results,
        s.status.exact,
        s.status.fuzzy,
        s.status.no_match,
        s.match_rate * 100.0,
    );
    eprintln!(
        "quality: {} good, {} acceptable, {} questionable, {} poor; {} near miss(es)",
        s.quality.good, s.quality.acceptable, s.quality.questionable, s.quality.poor, s.near_misses,
    );
    for f in &result.failures {
        eprintln!("customer {}: {}", f.customer, f.reason);
    }
}

fn cmd_recon_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let fulfillment_inputs = config.inputs.as_ref().map(|i| i.fulfillment.len()).unwrap_or(0);
    eprintln!(
        "valid: recon '{}' with {} customer config(s), {} fulfillment input(s), fuzzy threshold {}",
        config.name,
        config.customers.len(),
        fulfillment_inputs,
        config.matching.fuzzy_threshold,
    );
    Ok(())
}

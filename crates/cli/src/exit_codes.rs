//! CLI Exit Code Registry
//!
//! Single source of truth for `shipmatch` exit codes. Scripts rely on them.
//!
//! | Code | Meaning                                                   |
//! |------|-----------------------------------------------------------|
//! | 0    | Success: every customer completed                         |
//! | 1    | General error (unspecified)                               |
//! | 2    | Usage error (bad arguments; emitted by clap)              |
//! | 3    | Run completed, but some customers reported failures       |
//! | 4    | Invalid config (TOML parse or validation)                 |
//! | 5    | Invalid input data (missing column, bad quantity, CSV)    |
//! | 6    | Runtime error (file IO, serialization)                    |

use shipmatch_recon::ReconError;

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// Results were produced but at least one customer was skipped or panicked.
pub const EXIT_RECON_PARTIAL: u8 = 3;

/// Config could not be parsed or failed validation.
pub const EXIT_RECON_INVALID_CONFIG: u8 = 4;

/// An input file was readable but its content was rejected.
pub const EXIT_RECON_INPUT: u8 = 5;

/// File IO or output serialization failed.
pub const EXIT_RECON_RUNTIME: u8 = 6;

/// Map an engine error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) | ReconError::NoInputs(_) => {
            EXIT_RECON_INVALID_CONFIG
        }
        ReconError::MissingColumn { .. } | ReconError::QuantityParse { .. } | ReconError::Csv { .. } => {
            EXIT_RECON_INPUT
        }
        ReconError::Io(_) => EXIT_RECON_RUNTIME,
    }
}

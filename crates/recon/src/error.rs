use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (threshold out of range, tolerances out of order, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// Missing required column in an input file.
    #[error("{input}: missing column '{column}'")]
    MissingColumn { input: String, column: String },
    /// Quantity cell that is not a non-negative integer.
    #[error("{input}, line {line}: cannot parse quantity '{value}'")]
    QuantityParse { input: String, line: u64, value: String },
    /// The config has no `[inputs]` section but file loading was requested.
    #[error("config '{0}' does not declare any input files")]
    NoInputs(String),
    /// CSV framing error (unbalanced quotes, ragged rows, ...).
    #[error("{input}: {message}")]
    Csv { input: String, message: String },
    /// IO error (file read, etc.).
    #[error("IO error: {0}")]
    Io(String),
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrepError {
    #[error("Invalid filename: '{0}' does not match <device-type>-<instance>")]
    InvalidFilename(String),

    #[error("Unknown device: no metadata found for '{0}'")]
    UnknownDevice(String),

    #[error("Device index out of range: instance {instance} of '{device}' but only {available} address(es) configured")]
    DeviceIndexOutOfRange {
        device: String,
        instance: usize,
        available: usize,
    },

    #[error("Unseen categorical value '{value}' in column '{column}'")]
    UnseenCategoricalValue { column: String, value: String },

    #[error("Unseen label '{value}' for {granularity} vocabulary")]
    UnseenLabel { granularity: String, value: String },

    #[error("Unsupported protocol stack: '{0}'")]
    UnsupportedProtocolStack(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Extractor '{command}' failed with exit code {exit_code}: {stderr}")]
    ExtractorFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),
}

impl PrepError {
    /// Errors that only mean "this file is not ours", so a directory run
    /// logs and moves on instead of reporting a failure.
    pub fn is_skippable(&self) -> bool {
        matches!(self, PrepError::InvalidFilename(_))
    }
}

pub type Result<T> = std::result::Result<T, PrepError>;

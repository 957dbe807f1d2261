use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the glucometer crates.
#[derive(Error, Debug)]
pub enum GlucometerError {
    /// A glucose record matched the type tag but could not be decoded.
    ///
    /// Carries the raw fields so the record can be diagnosed without a
    /// second, verbose pass over the device.
    #[error("Malformed record [{}]: {reason}", .fields.join(","))]
    MalformedRecord { fields: Vec<String>, reason: String },

    /// Communication with the device failed while running `command`.
    #[error("Transport error during {command}: {source}")]
    Transport {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A reading carried a kind tag that no exporter models.
    #[error("Unsupported reading kind: {0}")]
    UnsupportedReadingKind(String),

    /// The meter clock only stores two-digit years.
    #[error("Meter clock cannot be set to {0}")]
    ClockOutOfRange(chrono::NaiveDateTime),

    /// A file could not be opened or read from disk.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON document could not be parsed or produced.
    #[error("Failed to process JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// A unit string is neither `mg/dL` nor `mmol/L`.
    #[error("Invalid glucose unit: {0}")]
    InvalidUnit(String),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GlucometerError {
    /// Build a [`GlucometerError::MalformedRecord`] from borrowed fields.
    pub fn malformed<S: AsRef<str>>(fields: &[S], reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            fields: fields.iter().map(|f| f.as_ref().to_string()).collect(),
            reason: reason.into(),
        }
    }

    /// Whether this error only concerns a single record of a decode pass.
    pub fn is_record_level(&self) -> bool {
        matches!(self, Self::MalformedRecord { .. })
    }
}

/// Convenience alias used throughout the glucometer crates.
pub type Result<T> = std::result::Result<T, GlucometerError>;

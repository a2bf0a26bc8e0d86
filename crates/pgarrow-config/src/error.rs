use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("invalid replication slot name '{value}': use lowercase letters, digits and underscores")]
    InvalidSlotName { value: String },

    #[error("invalid error code '{value}': expected a 5 character SQLSTATE")]
    InvalidErrorCode { value: String },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

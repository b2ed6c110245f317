//! Configuration Error Types
//!
//! Errors raised while locating, parsing, merging and validating
//! `conduit-config.yaml`.

use std::fmt::Display;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("No configuration file found (looked for {searched_paths:?})")]
    ConfigFileNotFound { searched_paths: Vec<PathBuf> },

    #[error("Could not parse configuration from '{file_path}': {error}")]
    InvalidYaml { file_path: String, error: String },

    /// A value that parsed but cannot be used, such as an oversized file
    #[error("Unusable value '{value}' for '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    #[error("Could not read configuration file '{file_path}': {error}")]
    FileReadError { file_path: String, error: String },

    /// A section's own `validate()` rejected it
    #[error("Invalid '{section}' configuration: {error}")]
    ValidationError { section: String, error: String },
}

impl ConfigurationError {
    pub fn config_file_not_found(searched_paths: Vec<PathBuf>) -> Self {
        Self::ConfigFileNotFound { searched_paths }
    }

    pub fn invalid_yaml(file_path: impl Into<String>, error: impl Display) -> Self {
        Self::InvalidYaml {
            file_path: file_path.into(),
            error: error.to_string(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }

    pub fn file_read_error(file_path: impl Into<String>, error: impl Display) -> Self {
        Self::FileReadError {
            file_path: file_path.into(),
            error: error.to_string(),
        }
    }

    pub fn validation_error(section: impl Into<String>, error: impl Display) -> Self {
        Self::ValidationError {
            section: section.into(),
            error: error.to_string(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;

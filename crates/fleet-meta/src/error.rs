//! Error types for fleet-meta

use std::path::PathBuf;

/// Result type for fleet-meta operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fleet-meta operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Declarative input is malformed; the caller must fix the configuration
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigValidation { path: String, reason: String },

    /// A kind discriminator string is not one of the known module kinds
    #[error("Unknown module kind: {kind}")]
    UnknownModuleKind { kind: String },

    /// Configuration file not found at expected path
    #[error("Configuration not found at {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration file could not be parsed
    #[error("Failed to parse {format} config at {path}: {message}")]
    ConfigParse {
        path: PathBuf,
        format: String,
        message: String,
    },

    /// File extension does not map to a supported format
    #[error("Unsupported config format: {extension}")]
    UnsupportedFormat { extension: String },

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// TOML deserialization error
    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),
}

impl Error {
    pub fn validation(path: &[String], reason: impl Into<String>) -> Self {
        let path = if path.is_empty() {
            "<root>".to_string()
        } else {
            path.join(".")
        };
        Self::ConfigValidation {
            path,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_names_the_field_path() {
        let path = vec!["routes".to_string(), "10".to_string(), "threshold".to_string()];
        let err = Error::validation(&path, "threshold 3 exceeds 2 validators");
        assert_eq!(
            err.to_string(),
            "Invalid configuration at routes.10.threshold: threshold 3 exceeds 2 validators"
        );
    }

    #[test]
    fn root_path_is_rendered_explicitly() {
        let err = Error::validation(&[], "boom");
        assert!(err.to_string().contains("<root>"));
    }
}

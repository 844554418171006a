//! Error types for fleet-core

use std::path::PathBuf;

use fleet_chain::{Address, EndpointId};

/// Result type for fleet-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fleet-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// On-chain kind discriminator matches no known module kind
    #[error("Module at {address} on {endpoint} has undecodable kind {kind:?}")]
    UndecodableModule {
        endpoint: EndpointId,
        address: Address,
        kind: String,
    },

    /// The reconciler has no rule to turn `current` into `target`
    #[error("Unsupported transition from {current} to {target}; deploy a fresh module instead")]
    UnsupportedTransition { current: String, target: String },

    /// Endpoint is not part of the fleet configuration
    #[error("Endpoint {endpoint} is not configured")]
    UnknownEndpoint { endpoint: EndpointId },

    /// A deployment step failed on one endpoint
    #[error("Deployment step {step} failed on {endpoint}: {source}")]
    Step {
        endpoint: EndpointId,
        step: String,
        #[source]
        source: Box<Error>,
    },

    /// Error in ledger operations
    #[error("Ledger error at {path}: {message}")]
    Ledger { path: PathBuf, message: String },

    /// Tracing subscriber could not be installed
    #[error("Logging setup failed: {0}")]
    Logging(String),

    // Transparent wrappers for underlying crate errors
    /// Endpoint or transport error from fleet-chain
    #[error(transparent)]
    Chain(#[from] fleet_chain::Error),

    /// Configuration error from fleet-meta
    #[error(transparent)]
    Meta(#[from] fleet_meta::Error),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// TOML deserialization error
    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error
    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
}

impl Error {
    /// Shorthand for a programmer-facing assertion failure
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Chain(fleet_chain::Error::InvariantViolation(message.into()))
    }

    /// Whether this error must abort a whole fleet run rather than one endpoint
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Chain(e) => e.is_fatal(),
            Self::Step { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    /// Whether an endpoint exhausted its read retries
    pub fn is_endpoint_unavailable(&self) -> bool {
        match self {
            Self::Chain(fleet_chain::Error::EndpointUnavailable { .. }) => true,
            Self::Step { source, .. } => source.is_endpoint_unavailable(),
            _ => false,
        }
    }
}

//! Error types for fleet-chain

use crate::types::EndpointId;

/// Result type for fleet-chain operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a transport implementation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The call may succeed if retried (timeouts, rate limits, dropped connections)
    #[error("transient transport failure: {0}")]
    Transient(String),

    /// The call will not succeed on retry
    #[error("transport failure: {0}")]
    Permanent(String),

    /// The endpoint executed the call and rejected it
    #[error("call reverted: {0}")]
    Reverted(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errors that can occur in fleet-chain operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport call failed on a specific endpoint
    #[error("{endpoint}: {source}")]
    Transport {
        endpoint: EndpointId,
        #[source]
        source: TransportError,
    },

    /// Transient read failures exhausted the retry budget
    #[error("Endpoint {endpoint} unavailable after {attempts} attempts: {message}")]
    EndpointUnavailable {
        endpoint: EndpointId,
        attempts: u32,
        message: String,
    },

    /// Return data could not be decoded into the expected shape
    #[error("Malformed response from {function} on {endpoint}: {message}")]
    MalformedResponse {
        endpoint: EndpointId,
        function: String,
        message: String,
    },

    /// A hex string did not decode into the expected width
    #[error("Invalid hex value {value}: {reason}")]
    InvalidHex { value: String, reason: String },

    /// A message byte string was too short or otherwise unparsable
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// A programmer-facing assertion failed; never recovered from
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    /// JSON encoding error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn transport(endpoint: &EndpointId, source: TransportError) -> Self {
        Self::Transport {
            endpoint: endpoint.clone(),
            source,
        }
    }

    /// Whether this error must abort a whole fleet run rather than one endpoint
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_unavailable_mentions_attempts() {
        let err = Error::EndpointUnavailable {
            endpoint: EndpointId::new("alpha"),
            attempts: 3,
            message: "timeout".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("alpha"));
        assert!(display.contains("3 attempts"));
    }

    #[test]
    fn only_invariant_violations_are_fatal() {
        assert!(Error::InvariantViolation("dup".into()).is_fatal());
        assert!(!Error::InvalidMessage("short".into()).is_fatal());
    }
}

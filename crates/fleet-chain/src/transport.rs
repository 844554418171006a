//! Transport seam between the fleet manager and live endpoints
//!
//! Contract invocation, signing and the byte-level ABI all live behind
//! [`Transport`]. Calls carry JSON-valued arguments; `read` returns the JSON
//! encoding of the function's return value.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;
use crate::types::{Address, EndpointId, H256};

/// A contract interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Call {
    /// Create a new contract of the named kind
    Deploy { contract: String, args: Value },
    /// Invoke a function on an existing contract
    Function {
        to: Address,
        function: String,
        args: Vec<Value>,
    },
}

impl Call {
    pub fn deploy(contract: impl Into<String>, args: Value) -> Self {
        Self::Deploy {
            contract: contract.into(),
            args,
        }
    }

    pub fn function(to: Address, function: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Function {
            to,
            function: function.into(),
            args,
        }
    }

    /// Function name or deployed contract kind, for logging
    pub fn label(&self) -> &str {
        match self {
            Self::Deploy { contract, .. } => contract,
            Self::Function { function, .. } => function,
        }
    }
}

/// Outcome of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub block_number: u64,
    pub transaction_hash: H256,
    /// Set when the transaction created a contract
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<Address>,
}

/// A log entry emitted by a contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub address: Address,
    pub name: String,
    pub block_number: u64,
    pub log_index: u64,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

/// Selects events by emitting contract and event name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    pub name: String,
}

impl EventFilter {
    pub fn new(address: Option<Address>, name: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        event.name == self.name && self.address.is_none_or(|a| a == event.address)
    }
}

/// Connection to every endpoint of the fleet
///
/// Implementations are expected to apply call-level timeouts. Retrying is the
/// caller's business; see [`crate::retry`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sign and submit a state-changing call
    async fn submit(&self, endpoint: &EndpointId, call: &Call) -> Result<Receipt, TransportError>;

    /// Execute a read-only call and return its encoded result
    async fn read(&self, endpoint: &EndpointId, call: &Call) -> Result<Vec<u8>, TransportError>;

    /// Fetch events within an inclusive block range
    async fn query_events(
        &self,
        endpoint: &EndpointId,
        filter: &EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Event>, TransportError>;

    /// Latest block number
    async fn block_number(&self, endpoint: &EndpointId) -> Result<u64, TransportError>;

    /// Runtime bytecode stored at an address
    async fn code(&self, endpoint: &EndpointId, address: &Address)
    -> Result<Vec<u8>, TransportError>;
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}

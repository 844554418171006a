//! Shared cache of per-endpoint module factory bindings
//!
//! Static module kinds are created through factory contracts whose addresses
//! are derived per `(protocol, chain id)`. Several endpoint tasks may resolve
//! the same key at once; the cache guarantees a key is derived at most once
//! and every caller observes the same binding.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sha3::{Digest, Keccak256};
use tokio::sync::OnceCell;

use crate::error::{Error, Result};
use crate::types::{Address, ChainMetadata, ProtocolKind};

/// Cache key
pub type FactoryKey = (ProtocolKind, u64);

/// Factory addresses for the static module kinds of one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactoryBindings {
    pub static_multisig: Address,
    pub weighted_multisig: Address,
    pub aggregation: Address,
}

impl FactoryBindings {
    /// Deterministically derive the bindings for a chain
    pub fn derive(protocol: ProtocolKind, chain_id: u64) -> Self {
        let derive_one = |kind: &str| {
            let mut hasher = Keccak256::new();
            hasher.update(protocol.to_string().as_bytes());
            hasher.update(chain_id.to_be_bytes());
            hasher.update(kind.as_bytes());
            let digest = hasher.finalize();
            let mut bytes = [0u8; 20];
            bytes.copy_from_slice(&digest[12..]);
            Address(bytes)
        };
        Self {
            static_multisig: derive_one("staticThresholdMultisigFactory"),
            weighted_multisig: derive_one("weightedMultisigFactory"),
            aggregation: derive_one("aggregationFactory"),
        }
    }
}

/// Write-once cache of [`FactoryBindings`]
///
/// Pass one instance by reference (usually behind an `Arc`) to every task of
/// a fleet run; tests create their own isolated instance.
#[derive(Debug, Default)]
pub struct FactoryCache {
    cells: Mutex<HashMap<FactoryKey, Arc<OnceCell<FactoryBindings>>>>,
}

impl FactoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the bindings for `key`, running `derive` only if no other
    /// caller has resolved (or is resolving) the same key
    pub async fn get_or_derive<F, Fut>(&self, key: FactoryKey, derive: F) -> Result<FactoryBindings>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FactoryBindings>>,
    {
        let cell = {
            let mut cells = self
                .cells
                .lock()
                .map_err(|_| Error::InvariantViolation("factory cache lock poisoned".into()))?;
            Arc::clone(cells.entry(key).or_default())
        };
        let bindings = cell.get_or_try_init(derive).await?;
        Ok(*bindings)
    }

    /// Resolve the bindings for a chain with the default derivation
    pub async fn bindings_for(&self, chain: &ChainMetadata) -> Result<FactoryBindings> {
        let (protocol, chain_id) = (chain.protocol, chain.chain_id);
        self.get_or_derive((protocol, chain_id), || async move {
            tracing::debug!(%protocol, chain_id, "Deriving factory bindings");
            Ok(FactoryBindings::derive(protocol, chain_id))
        })
        .await
    }

    /// Number of keys that have been requested
    pub fn len(&self) -> usize {
        self.cells.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

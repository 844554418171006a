//! Per-endpoint execution context

use std::fmt;
use std::sync::Arc;

use fleet_chain::{
    Address, Call, ChainMetadata, EndpointId, FactoryBindings, FactoryCache, Receipt, RetryPolicy,
    Transport, read_with_retry, with_retry,
};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

/// Everything a task needs to talk to one endpoint
///
/// Cloning is cheap; the transport and factory cache are shared.
#[derive(Clone)]
pub struct ChainContext {
    pub metadata: ChainMetadata,
    pub transport: Arc<dyn Transport>,
    /// Account that signs submissions; owns freshly deployed contracts
    pub signer: Address,
    pub factories: Arc<FactoryCache>,
    pub retry: RetryPolicy,
}

impl fmt::Debug for ChainContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainContext")
            .field("endpoint", &self.metadata.name)
            .field("signer", &self.signer)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ChainContext {
    pub fn new(metadata: ChainMetadata, transport: Arc<dyn Transport>, signer: Address) -> Self {
        Self {
            metadata,
            transport,
            signer,
            factories: Arc::new(FactoryCache::new()),
            retry: RetryPolicy::default(),
        }
    }

    /// Share a fleet-wide factory cache
    pub fn with_factories(mut self, factories: Arc<FactoryCache>) -> Self {
        self.factories = factories;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &EndpointId {
        &self.metadata.name
    }

    /// Call a view function and decode its JSON return value
    pub async fn read_json<T: DeserializeOwned>(
        &self,
        to: Address,
        function: &str,
        args: Vec<Value>,
    ) -> Result<T> {
        let call = Call::function(to, function, args);
        let bytes =
            read_with_retry(self.transport.as_ref(), self.endpoint(), &call, &self.retry).await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            Error::Chain(fleet_chain::Error::MalformedResponse {
                endpoint: self.endpoint().clone(),
                function: function.to_string(),
                message: e.to_string(),
            })
        })
    }

    /// Submit a call once; submissions are never retried
    pub async fn submit(&self, call: &Call) -> Result<Receipt> {
        tracing::debug!(endpoint = %self.endpoint(), call = call.label(), "Submitting");
        self.transport
            .submit(self.endpoint(), call)
            .await
            .map_err(|e| fleet_chain::Error::transport(self.endpoint(), e).into())
    }

    /// Deploy a contract and return its address
    pub async fn deploy(&self, contract: &str, args: Value) -> Result<Address> {
        let receipt = self.submit(&Call::deploy(contract, args)).await?;
        let address = receipt.contract_address.ok_or_else(|| {
            Error::invariant(format!("deployment of {contract} returned no contract address"))
        })?;
        tracing::debug!(endpoint = %self.endpoint(), contract, address = %address, "Deployed");
        Ok(address)
    }

    /// Invoke a state-changing function
    pub async fn call(&self, to: Address, function: &str, args: Vec<Value>) -> Result<Receipt> {
        self.submit(&Call::function(to, function, args)).await
    }

    pub async fn block_number(&self) -> Result<u64> {
        let endpoint = self.endpoint();
        let block = with_retry(endpoint, "blockNumber", &self.retry, || {
            self.transport.block_number(endpoint)
        })
        .await?;
        Ok(block)
    }

    pub async fn code(&self, address: Address) -> Result<Vec<u8>> {
        let endpoint = self.endpoint();
        let code = with_retry(endpoint, "code", &self.retry, || {
            self.transport.code(endpoint, &address)
        })
        .await?;
        Ok(code)
    }

    /// Factory bindings for this endpoint, resolved once per fleet
    pub async fn factories(&self) -> Result<FactoryBindings> {
        Ok(self.factories.bindings_for(&self.metadata).await?)
    }
}

//! Deployed address maps and per-endpoint deployment checkpoints
//!
//! These records are exchanged with the checker and persisted by the
//! ledger, so their field names and the contract names in [`names`] are part
//! of the stable interface.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use fleet_chain::Address;
use serde::{Deserialize, Serialize};

/// Logical names of the core contracts of an endpoint
pub mod names {
    pub const PROXY_ADMIN: &str = "proxyAdmin";
    pub const INTERCHAIN_GAS_PAYMASTER: &str = "interchainGasPaymaster";
    pub const DEFAULT_ISM: &str = "defaultIsm";
    pub const REQUIRED_HOOK: &str = "requiredHook";
    pub const MAILBOX: &str = "mailbox";
    pub const VALIDATOR_ANNOUNCE: &str = "validatorAnnounce";

    /// Contracts whose ownership is handed to the configured owner
    pub const OWNABLE: [&str; 3] = [PROXY_ADMIN, MAILBOX, INTERCHAIN_GAS_PAYMASTER];
}

/// Registration steps recorded in [`DeploymentState::registrations`]
pub mod registrations {
    pub const MAILBOX: &str = "proxyAdmin.registerMailbox";
}

/// One deployed contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedContract {
    /// Address callers use; the proxy for proxied contracts
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<Address>,
    /// Kind discriminator, e.g. `mailbox` or `staticThresholdMultisig`
    pub kind: String,
}

impl DeployedContract {
    pub fn new(address: Address, kind: impl Into<String>) -> Self {
        Self {
            address,
            implementation: None,
            kind: kind.into(),
        }
    }

    pub fn proxied(address: Address, implementation: Address, kind: impl Into<String>) -> Self {
        Self {
            implementation: Some(implementation),
            ..Self::new(address, kind)
        }
    }
}

/// Logical contract name to deployed contract, for one endpoint
pub type DeployedAddressMap = BTreeMap<String, DeployedContract>;

/// Resumption checkpoint for one endpoint's deployment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentState {
    /// Block at which the first deployment attempt began
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_block: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Completed registration steps
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub registrations: BTreeSet<String>,
    #[serde(default)]
    pub contracts: DeployedAddressMap,
}

impl DeploymentState {
    pub fn contract(&self, name: &str) -> Option<&DeployedContract> {
        self.contracts.get(name)
    }

    pub fn address(&self, name: &str) -> Option<Address> {
        self.contracts.get(name).map(|c| c.address)
    }

    /// Add a contract; entries are never replaced
    pub fn record(&mut self, name: &str, contract: DeployedContract) {
        self.contracts.entry(name.to_string()).or_insert(contract);
    }

    pub fn is_registered(&self, step: &str) -> bool {
        self.registrations.contains(step)
    }

    pub fn mark_registered(&mut self, step: &str) {
        self.registrations.insert(step.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.starting_block.is_none() && self.contracts.is_empty() && self.registrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_contracts_are_never_replaced() {
        let mut state = DeploymentState::default();
        state.record(names::PROXY_ADMIN, DeployedContract::new(Address([1; 20]), "proxyAdmin"));
        state.record(names::PROXY_ADMIN, DeployedContract::new(Address([2; 20]), "proxyAdmin"));
        assert_eq!(state.address(names::PROXY_ADMIN), Some(Address([1; 20])));
    }

    #[test]
    fn state_serializes_to_toml_and_back() {
        let mut state = DeploymentState {
            starting_block: Some(42),
            ..Default::default()
        };
        state.record(
            names::MAILBOX,
            DeployedContract::proxied(Address([3; 20]), Address([4; 20]), "mailbox"),
        );
        state.mark_registered(registrations::MAILBOX);

        let toml = toml::to_string(&state).unwrap();
        assert!(toml.contains("starting_block = 42"));
        let back: DeploymentState = toml::from_str(&toml).unwrap();
        assert_eq!(back, state);
    }
}

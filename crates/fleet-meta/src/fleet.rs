//! Fleet configuration
//!
//! The declarative input of a fleet run: global settings plus one
//! [`EndpointConfig`] per endpoint. Format is detected from the file
//! extension:
//!
//! - `.toml` -> TOML
//! - `.json` -> JSON
//! - `.yaml`, `.yml` -> YAML
//!
//! ```toml
//! [settings]
//! bytecode_severity = "warn"
//!
//! [endpoints.alpha]
//! domain_id = 1000
//! chain_id = 1
//! owner = "0x00000000000000000000000000000000000000aa"
//!
//! [endpoints.alpha.default_ism]
//! type = "staticThresholdMultisig"
//! validators = ["0x0000000000000000000000000000000000000001"]
//! threshold = 1
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use fleet_chain::{Address, ChainMetadata, DomainId, EndpointId, ProtocolKind, RetryPolicy};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::module::{InterchainGasPaymasterConfig, ModuleConfig, ModuleFamily};
use crate::normalize::normalize_at;

/// How the checker treats bytecode that matches no known-good hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BytecodeSeverity {
    /// Do not run the bytecode check
    Ignore,
    /// Log the mismatch and record nothing
    #[default]
    Warn,
    /// Record a violation
    Violation,
}

/// Run-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetSettings {
    pub bytecode_severity: BytecodeSeverity,
    /// Read attempts per call before an endpoint is reported unavailable
    pub max_read_attempts: u32,
    pub retry_initial_interval_ms: u64,
}

impl Default for FleetSettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            bytecode_severity: BytecodeSeverity::default(),
            max_read_attempts: policy.max_attempts,
            retry_initial_interval_ms: policy.initial_interval.as_millis() as u64,
        }
    }
}

impl FleetSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        let initial = Duration::from_millis(self.retry_initial_interval_ms);
        RetryPolicy {
            max_attempts: self.max_read_attempts.max(1),
            initial_interval: initial,
            max_interval: RetryPolicy::default().max_interval.max(initial),
        }
    }
}

/// Declarative target for one endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub domain_id: DomainId,
    pub chain_id: u64,
    #[serde(default)]
    pub protocol: ProtocolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_block_range: Option<u64>,

    /// Expected owner of every ownable contract
    pub owner: Address,
    /// Per-contract-name exceptions to `owner`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub owner_overrides: BTreeMap<String, Address>,

    /// Security module the mailbox verifies inbound messages with
    pub default_ism: ModuleConfig,
    /// Proxied gas paymaster; defaults to one owned by `owner` with no oracles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_hook: Option<InterchainGasPaymasterConfig>,
    /// Hook every dispatch must pass; defaults to the fee hook
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_hook: Option<ModuleConfig>,

    /// Endpoint is being decommissioned; checks skip it
    #[serde(default)]
    pub remove: bool,
    /// Validators that must have announced themselves on this endpoint
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_validators: Vec<Address>,
}

impl EndpointConfig {
    pub fn metadata(&self, name: &str) -> ChainMetadata {
        ChainMetadata {
            name: EndpointId::new(name),
            domain_id: self.domain_id,
            chain_id: self.chain_id,
            protocol: self.protocol,
            max_block_range: self.max_block_range,
        }
    }

    /// Expected owner of the named contract
    pub fn owner_for(&self, contract: &str) -> Address {
        self.owner_overrides.get(contract).copied().unwrap_or(self.owner)
    }

    /// Owner the named contract must end up with
    ///
    /// The gas paymaster is initialized with its own configured owner, so
    /// that takes precedence over the endpoint-wide owner.
    pub fn expected_owner(&self, contract: &str) -> Address {
        match contract {
            "interchainGasPaymaster" => self.fee_hook_config().owner,
            _ => self.owner_for(contract),
        }
    }

    /// The fee hook with defaults applied
    pub fn fee_hook_config(&self) -> InterchainGasPaymasterConfig {
        let owner = self.owner_for("interchainGasPaymaster");
        self.fee_hook.clone().unwrap_or_else(|| InterchainGasPaymasterConfig {
            owner,
            beneficiary: owner,
            per_destination: BTreeMap::new(),
            address: None,
        })
    }

    /// Declared target of the mailbox's required hook
    pub fn required_hook_config(&self) -> ModuleConfig {
        self.required_hook
            .clone()
            .unwrap_or_else(|| ModuleConfig::InterchainGasPaymaster(self.fee_hook_config()))
    }
}

/// The whole declarative input of a fleet run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub settings: FleetSettings,
    #[serde(default)]
    pub endpoints: BTreeMap<String, EndpointConfig>,
}

impl FleetConfig {
    /// Load from a file, choosing the format by extension
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::ConfigNotFound {
                path: path.to_path_buf(),
            },
            _ => Error::Io(e),
        })?;
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let parse_error = |format: &str, message: String| Error::ConfigParse {
            path: path.to_path_buf(),
            format: format.into(),
            message,
        };

        let config: Self = match extension.to_lowercase().as_str() {
            "toml" => toml::from_str(&content).map_err(|e| parse_error("TOML", e.to_string()))?,
            "json" => {
                serde_json::from_str(&content).map_err(|e| parse_error("JSON", e.to_string()))?
            }
            "yaml" | "yml" => {
                serde_yaml::from_str(&content).map_err(|e| parse_error("YAML", e.to_string()))?
            }
            _ => {
                return Err(Error::UnsupportedFormat {
                    extension: extension.to_string(),
                });
            }
        };
        tracing::debug!(
            path = %path.display(),
            endpoints = config.endpoints.len(),
            "Loaded fleet config"
        );
        Ok(config)
    }

    /// Parse TOML content directly
    pub fn parse_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn endpoint(&self, id: &EndpointId) -> Option<&EndpointConfig> {
        self.endpoints.get(id.as_str())
    }

    pub fn endpoint_ids(&self) -> Vec<EndpointId> {
        self.endpoints.keys().map(EndpointId::new).collect()
    }

    /// Normalize every module tree and check cross-endpoint constraints
    ///
    /// Reports the first failure, with a path rooted at `endpoints.<name>`.
    pub fn validate(&self) -> Result<()> {
        let mut domains: HashMap<DomainId, &str> = HashMap::new();

        for (name, endpoint) in &self.endpoints {
            if let Some(other) = domains.insert(endpoint.domain_id, name.as_str()) {
                return Err(Error::validation(
                    &field_path(name, "domain_id"),
                    format!("domain {} is also used by {other}", endpoint.domain_id),
                ));
            }
            endpoint.validate(name)?;
        }
        Ok(())
    }
}

fn field_path(endpoint: &str, field: &str) -> Vec<String> {
    vec!["endpoints".to_string(), endpoint.to_string(), field.to_string()]
}

impl EndpointConfig {
    /// Normalize this endpoint's module trees, rooting error paths at
    /// `endpoints.<name>`
    pub fn validate(&self, name: &str) -> Result<()> {
        let prefix = |field: &str| field_path(name, field);

        if self.owner.is_zero() {
            return Err(Error::validation(&prefix("owner"), "owner is the zero address"));
        }

        let ism = normalize_at(&self.default_ism, &prefix("default_ism"))?;
        if ism.family() == Some(ModuleFamily::Hook) {
            return Err(Error::validation(
                &prefix("default_ism"),
                "default ISM is a hook configuration",
            ));
        }

        if let Some(fee_hook) = &self.fee_hook {
            normalize_at(
                &ModuleConfig::InterchainGasPaymaster(fee_hook.clone()),
                &prefix("fee_hook"),
            )?;
        }

        if let Some(hook) = &self.required_hook {
            let hook = normalize_at(hook, &prefix("required_hook"))?;
            if hook.family() == Some(ModuleFamily::Ism) {
                return Err(Error::validation(
                    &prefix("required_hook"),
                    "required hook is a security module configuration",
                ));
            }
        }
        Ok(())
    }
}

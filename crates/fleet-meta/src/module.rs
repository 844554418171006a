//! Declarative module configuration
//!
//! A [`ModuleConfig`] describes one deployed module: either a
//! security-verification module ("ISM") or a delivery hook. Composite
//! variants own their children, so every configuration is a finite tree.
//!
//! Every declarative variant carries an optional `address`. The module reader
//! fills it in when reconstructing deployed state; [`crate::normalize`]
//! strips it so that it never takes part in comparisons.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use fleet_chain::{Address, DomainId};
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::error::Error;

/// On-chain discriminator of a module implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModuleKind {
    StaticThresholdMultisig,
    WeightedMultisig,
    Aggregation,
    Routing,
    FallbackRouting,
    AmountRouting,
    MerkleTreeHook,
    InterchainGasPaymaster,
    ProtocolFee,
    Pausable,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 10] = [
        ModuleKind::StaticThresholdMultisig,
        ModuleKind::WeightedMultisig,
        ModuleKind::Aggregation,
        ModuleKind::Routing,
        ModuleKind::FallbackRouting,
        ModuleKind::AmountRouting,
        ModuleKind::MerkleTreeHook,
        ModuleKind::InterchainGasPaymaster,
        ModuleKind::ProtocolFee,
        ModuleKind::Pausable,
    ];

    /// Stable discriminator string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StaticThresholdMultisig => "staticThresholdMultisig",
            Self::WeightedMultisig => "weightedMultisig",
            Self::Aggregation => "aggregation",
            Self::Routing => "routing",
            Self::FallbackRouting => "fallbackRouting",
            Self::AmountRouting => "amountRouting",
            Self::MerkleTreeHook => "merkleTreeHook",
            Self::InterchainGasPaymaster => "interchainGasPaymaster",
            Self::ProtocolFee => "protocolFee",
            Self::Pausable => "pausable",
        }
    }

    /// Whether a deployed instance can be patched in place
    ///
    /// Immutable kinds are redeployed and re-pointed when they change.
    pub fn is_mutable(&self) -> bool {
        match self {
            Self::StaticThresholdMultisig
            | Self::WeightedMultisig
            | Self::Aggregation
            | Self::MerkleTreeHook => false,
            Self::Routing
            | Self::FallbackRouting
            | Self::AmountRouting
            | Self::InterchainGasPaymaster
            | Self::ProtocolFee
            | Self::Pausable => true,
        }
    }

    /// Whether the kind nests child modules
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            Self::Aggregation | Self::Routing | Self::FallbackRouting | Self::AmountRouting
        )
    }

    /// Family of a leaf kind; composites take the family of their children
    pub fn leaf_family(&self) -> Option<ModuleFamily> {
        match self {
            Self::StaticThresholdMultisig | Self::WeightedMultisig => Some(ModuleFamily::Ism),
            Self::MerkleTreeHook
            | Self::InterchainGasPaymaster
            | Self::ProtocolFee
            | Self::Pausable => Some(ModuleFamily::Hook),
            Self::Aggregation | Self::Routing | Self::FallbackRouting | Self::AmountRouting => None,
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::UnknownModuleKind {
                kind: s.to_string(),
            })
    }
}

/// Whether a module verifies messages or reacts to dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleFamily {
    /// Security-verification module
    Ism,
    /// Delivery-side hook
    Hook,
}

impl fmt::Display for ModuleFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ism => write!(f, "ism"),
            Self::Hook => write!(f, "hook"),
        }
    }
}

/// Multisig with a fixed signer count threshold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticThresholdMultisigConfig {
    pub validators: Vec<Address>,
    pub threshold: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

/// One signer of a weighted multisig
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WeightedValidator {
    pub address: Address,
    pub weight: u64,
}

/// Multisig where each signer carries a weight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedMultisigConfig {
    pub validators: Vec<WeightedValidator>,
    pub threshold_weight: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

/// Requires `threshold` of `children` to accept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationConfig {
    pub children: Vec<ModuleConfig>,
    pub threshold: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

/// Selects a child module by origin or destination domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfig {
    pub owner: Address,
    #[serde(default, with = "domain_map")]
    pub routes: BTreeMap<DomainId, ModuleConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

/// Routing with a catch-all module for unrouted domains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackRoutingConfig {
    pub owner: Address,
    #[serde(default, with = "domain_map")]
    pub routes: BTreeMap<DomainId, ModuleConfig>,
    pub fallback: Box<ModuleConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

/// Selects `lower` below `threshold` and `upper` at or above it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmountRoutingConfig {
    pub threshold: Amount,
    pub lower: Box<ModuleConfig>,
    pub upper: Box<ModuleConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

/// Incremental merkle tree of dispatched message ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleTreeHookConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

/// Gas oracle entry for one destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasOracleConfig {
    pub exchange_rate: Amount,
    pub gas_price: Amount,
    pub overhead: u64,
}

/// Interchain gas paymaster hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterchainGasPaymasterConfig {
    pub owner: Address,
    pub beneficiary: Address,
    #[serde(default, with = "domain_map")]
    pub per_destination: BTreeMap<DomainId, GasOracleConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

/// Flat protocol fee hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolFeeConfig {
    pub owner: Address,
    pub beneficiary: Address,
    /// Fixed at construction
    pub max_fee: Amount,
    pub fee: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

/// Hook that can halt dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PausableConfig {
    pub owner: Address,
    #[serde(default)]
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

/// A module configuration tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ModuleConfig {
    StaticThresholdMultisig(StaticThresholdMultisigConfig),
    WeightedMultisig(WeightedMultisigConfig),
    Aggregation(AggregationConfig),
    Routing(RoutingConfig),
    FallbackRouting(FallbackRoutingConfig),
    AmountRouting(AmountRoutingConfig),
    MerkleTreeHook(MerkleTreeHookConfig),
    InterchainGasPaymaster(InterchainGasPaymasterConfig),
    ProtocolFee(ProtocolFeeConfig),
    Pausable(PausableConfig),
    /// An already-deployed module referenced only by address
    OpaqueAddress { address: Address },
}

impl ModuleConfig {
    pub fn opaque(address: Address) -> Self {
        Self::OpaqueAddress { address }
    }

    pub fn merkle_tree_hook() -> Self {
        Self::MerkleTreeHook(MerkleTreeHookConfig::default())
    }

    pub fn static_multisig(validators: Vec<Address>, threshold: u32) -> Self {
        Self::StaticThresholdMultisig(StaticThresholdMultisigConfig {
            validators,
            threshold,
            address: None,
        })
    }

    /// Kind discriminator; `None` for opaque references
    pub fn kind(&self) -> Option<ModuleKind> {
        Some(match self {
            Self::StaticThresholdMultisig(_) => ModuleKind::StaticThresholdMultisig,
            Self::WeightedMultisig(_) => ModuleKind::WeightedMultisig,
            Self::Aggregation(_) => ModuleKind::Aggregation,
            Self::Routing(_) => ModuleKind::Routing,
            Self::FallbackRouting(_) => ModuleKind::FallbackRouting,
            Self::AmountRouting(_) => ModuleKind::AmountRouting,
            Self::MerkleTreeHook(_) => ModuleKind::MerkleTreeHook,
            Self::InterchainGasPaymaster(_) => ModuleKind::InterchainGasPaymaster,
            Self::ProtocolFee(_) => ModuleKind::ProtocolFee,
            Self::Pausable(_) => ModuleKind::Pausable,
            Self::OpaqueAddress { .. } => return None,
        })
    }

    /// Name used in logs and diffs
    pub fn kind_name(&self) -> &'static str {
        self.kind().map_or("opaqueAddress", |k| k.as_str())
    }

    /// Where this module lives, if known
    pub fn deployed_address(&self) -> Option<Address> {
        match self {
            Self::StaticThresholdMultisig(c) => c.address,
            Self::WeightedMultisig(c) => c.address,
            Self::Aggregation(c) => c.address,
            Self::Routing(c) => c.address,
            Self::FallbackRouting(c) => c.address,
            Self::AmountRouting(c) => c.address,
            Self::MerkleTreeHook(c) => c.address,
            Self::InterchainGasPaymaster(c) => c.address,
            Self::ProtocolFee(c) => c.address,
            Self::Pausable(c) => c.address,
            Self::OpaqueAddress { address } => Some(*address),
        }
    }

    /// Annotate with (or clear) the deployed address
    ///
    /// Has no effect on opaque references, whose address is their identity.
    pub fn set_deployed_address(&mut self, address: Option<Address>) {
        let slot = match self {
            Self::StaticThresholdMultisig(c) => &mut c.address,
            Self::WeightedMultisig(c) => &mut c.address,
            Self::Aggregation(c) => &mut c.address,
            Self::Routing(c) => &mut c.address,
            Self::FallbackRouting(c) => &mut c.address,
            Self::AmountRouting(c) => &mut c.address,
            Self::MerkleTreeHook(c) => &mut c.address,
            Self::InterchainGasPaymaster(c) => &mut c.address,
            Self::ProtocolFee(c) => &mut c.address,
            Self::Pausable(c) => &mut c.address,
            Self::OpaqueAddress { .. } => return,
        };
        *slot = address;
    }

    /// Owner of the module, for ownable kinds
    pub fn owner(&self) -> Option<Address> {
        match self {
            Self::Routing(c) => Some(c.owner),
            Self::FallbackRouting(c) => Some(c.owner),
            Self::InterchainGasPaymaster(c) => Some(c.owner),
            Self::ProtocolFee(c) => Some(c.owner),
            Self::Pausable(c) => Some(c.owner),
            _ => None,
        }
    }

    /// Direct children in declaration order
    pub fn children(&self) -> Vec<&ModuleConfig> {
        match self {
            Self::Aggregation(c) => c.children.iter().collect(),
            Self::Routing(c) => c.routes.values().collect(),
            Self::FallbackRouting(c) => c
                .routes
                .values()
                .chain(std::iter::once(c.fallback.as_ref()))
                .collect(),
            Self::AmountRouting(c) => vec![c.lower.as_ref(), c.upper.as_ref()],
            _ => Vec::new(),
        }
    }

    /// Number of levels in the tree; a leaf has depth 1
    pub fn depth(&self) -> usize {
        1 + self.children().iter().map(|c| c.depth()).max().unwrap_or(0)
    }

    /// Family of the tree, if it can be determined
    ///
    /// Opaque references and composites with no typed descendants have no
    /// family. Use [`crate::normalize`] to reject trees that mix families.
    pub fn family(&self) -> Option<ModuleFamily> {
        match self.kind() {
            None => None,
            Some(kind) => kind
                .leaf_family()
                .or_else(|| self.children().iter().find_map(|c| c.family())),
        }
    }
}

/// (De)serializes domain-keyed maps with string keys, as every config
/// format supports string keys but not all support integer keys
pub(crate) mod domain_map {
    use std::collections::BTreeMap;

    use fleet_chain::DomainId;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<V: Serialize, S: Serializer>(
        map: &BTreeMap<DomainId, V>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let stringly: BTreeMap<String, &V> = map.iter().map(|(k, v)| (k.to_string(), v)).collect();
        stringly.serialize(serializer)
    }

    pub fn deserialize<'de, V: Deserialize<'de>, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<DomainId, V>, D::Error> {
        let stringly = BTreeMap::<String, V>::deserialize(deserializer)?;
        stringly
            .into_iter()
            .map(|(k, v)| {
                k.parse::<DomainId>()
                    .map(|d| (d, v))
                    .map_err(|_| D::Error::custom(format!("invalid domain id {k:?}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn addr(n: u8) -> Address {
        Address([n; 20])
    }

    #[test]
    fn kind_strings_round_trip() {
        for kind in ModuleKind::ALL {
            assert_eq!(kind.as_str().parse::<ModuleKind>().unwrap(), kind);
        }
        assert!("staticAggregationIsm".parse::<ModuleKind>().is_err());
    }

    #[test]
    fn deserializes_tagged_tree_with_string_domain_keys() {
        let value = json!({
            "type": "routing",
            "owner": addr(1).to_string(),
            "routes": {
                "10": {
                    "type": "staticThresholdMultisig",
                    "validators": [addr(2).to_string()],
                    "threshold": 1
                },
                "20": { "type": "opaqueAddress", "address": addr(3).to_string() }
            }
        });
        let config: ModuleConfig = serde_json::from_value(value).unwrap();
        let ModuleConfig::Routing(routing) = &config else {
            panic!("expected routing, got {config:?}");
        };
        assert_eq!(routing.routes.len(), 2);
        assert_eq!(routing.routes[&20], ModuleConfig::opaque(addr(3)));
        assert_eq!(config.family(), Some(ModuleFamily::Ism));
        assert_eq!(config.depth(), 2);
    }

    #[test]
    fn address_annotation_is_skipped_when_absent() {
        let json = serde_json::to_value(ModuleConfig::merkle_tree_hook()).unwrap();
        assert_eq!(json, json!({ "type": "merkleTreeHook" }));
    }

    #[test]
    fn opaque_reference_keeps_its_address() {
        let mut opaque = ModuleConfig::opaque(addr(4));
        opaque.set_deployed_address(None);
        assert_eq!(opaque.deployed_address(), Some(addr(4)));
        assert_eq!(opaque.kind(), None);
        assert_eq!(opaque.family(), None);
    }

    #[test]
    fn mutability_table() {
        assert!(!ModuleKind::StaticThresholdMultisig.is_mutable());
        assert!(!ModuleKind::Aggregation.is_mutable());
        assert!(!ModuleKind::MerkleTreeHook.is_mutable());
        assert!(ModuleKind::Routing.is_mutable());
        assert!(ModuleKind::InterchainGasPaymaster.is_mutable());
        assert!(ModuleKind::AmountRouting.is_mutable());
    }
}

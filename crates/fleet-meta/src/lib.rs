//! Declarative module configuration for the module fleet manager
//!
//! This crate provides the Config Model and everything that reasons about it
//! without touching an endpoint:
//!
//! - **Config Model**: [`ModuleConfig`], a closed tree of security modules and hooks
//! - **Normalizer**: [`normalize`], validation plus canonical ordering
//! - **Diff Engine**: [`diff`], path-annotated structural comparison
//! - **Fleet configuration**: [`FleetConfig`] loading and validation

pub mod amount;
pub mod diff;
pub mod error;
pub mod fleet;
pub mod module;
pub mod normalize;

pub use amount::Amount;
pub use diff::{DiffResult, diff, is_equal};
pub use error::{Error, Result};
pub use fleet::{BytecodeSeverity, EndpointConfig, FleetConfig, FleetSettings};
pub use module::{
    AggregationConfig, AmountRoutingConfig, FallbackRoutingConfig, GasOracleConfig,
    InterchainGasPaymasterConfig, MerkleTreeHookConfig, ModuleConfig, ModuleFamily, ModuleKind,
    PausableConfig, ProtocolFeeConfig, RoutingConfig, StaticThresholdMultisigConfig,
    WeightedMultisigConfig, WeightedValidator,
};
pub use normalize::{canonicalize, normalize, normalize_at, strip_addresses};

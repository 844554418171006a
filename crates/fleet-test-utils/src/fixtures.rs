//! Deterministic addresses and small fleet configurations

use std::time::Duration;

use fleet_chain::{Address, ChainMetadata, DomainId, EndpointId, RetryPolicy};
use fleet_meta::{BytecodeSeverity, EndpointConfig, FleetConfig, FleetSettings, ModuleConfig};

/// Owner configured for every fixture endpoint
pub const FLEET_OWNER: Address = Address([0x0a; 20]);

/// A recognisable, non-zero address for small integers
pub fn addr(n: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[0] = 0xa0;
    bytes[19] = n;
    Address(bytes)
}

/// `addr(n)` for each `n`
pub fn validators(ns: &[u8]) -> Vec<Address> {
    ns.iter().copied().map(addr).collect()
}

/// A single-validator multisig, the smallest useful default ISM
pub fn simple_ism(validator: u8) -> ModuleConfig {
    ModuleConfig::static_multisig(vec![addr(validator)], 1)
}

/// An endpoint owned by [`FLEET_OWNER`] with `chain_id == domain_id`
pub fn endpoint_config(domain_id: DomainId, default_ism: ModuleConfig) -> EndpointConfig {
    EndpointConfig {
        domain_id,
        chain_id: domain_id as u64,
        protocol: Default::default(),
        max_block_range: None,
        owner: FLEET_OWNER,
        owner_overrides: Default::default(),
        default_ism,
        fee_hook: None,
        required_hook: None,
        remove: false,
        expected_validators: Vec::new(),
    }
}

/// A fleet with fast retries and bytecode mismatches recorded as violations
pub fn fleet_config<'a>(
    endpoints: impl IntoIterator<Item = (&'a str, EndpointConfig)>,
) -> FleetConfig {
    FleetConfig {
        settings: FleetSettings {
            bytecode_severity: BytecodeSeverity::Violation,
            max_read_attempts: 3,
            retry_initial_interval_ms: 1,
        },
        endpoints: endpoints
            .into_iter()
            .map(|(name, config)| (name.to_string(), config))
            .collect(),
    }
}

/// Metadata for a standalone test endpoint with `chain_id == domain_id`
pub fn metadata(name: &str, domain_id: DomainId) -> ChainMetadata {
    ChainMetadata {
        name: EndpointId::new(name),
        domain_id,
        chain_id: domain_id as u64,
        protocol: Default::default(),
        max_block_range: None,
    }
}

/// Three attempts with millisecond backoff
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(5),
    }
}

//! Depth-limited synthesis of valid module trees
//!
//! Strategies take a `max_depth`; the root sits at depth 0. A composite
//! chosen at `depth >= max_depth` collapses to a terminal leaf of its family
//! (`merkleTreeHook` for hooks, a single-validator multisig for ISMs), so no
//! composite ever appears at or below `max_depth`. Every generated tree
//! passes [`fleet_meta::normalize`].

use std::collections::BTreeSet;

use fleet_chain::{Address, DomainId};
use fleet_meta::{
    AggregationConfig, Amount, AmountRoutingConfig, FallbackRoutingConfig, GasOracleConfig,
    InterchainGasPaymasterConfig, ModuleConfig, ModuleFamily, ModuleKind, PausableConfig,
    ProtocolFeeConfig, RoutingConfig, WeightedMultisigConfig, WeightedValidator,
};
use proptest::prelude::*;

use crate::fixtures::addr;

const ISM_KINDS: [ModuleKind; 6] = [
    ModuleKind::StaticThresholdMultisig,
    ModuleKind::WeightedMultisig,
    ModuleKind::Aggregation,
    ModuleKind::Routing,
    ModuleKind::FallbackRouting,
    ModuleKind::AmountRouting,
];

const HOOK_KINDS: [ModuleKind; 8] = [
    ModuleKind::MerkleTreeHook,
    ModuleKind::InterchainGasPaymaster,
    ModuleKind::ProtocolFee,
    ModuleKind::Pausable,
    ModuleKind::Aggregation,
    ModuleKind::Routing,
    ModuleKind::FallbackRouting,
    ModuleKind::AmountRouting,
];

/// Non-zero addresses from a small pool, so duplicates occur
pub fn address() -> impl Strategy<Value = Address> {
    (1u8..=12).prop_map(addr)
}

pub fn domain() -> impl Strategy<Value = DomainId> {
    1u32..40
}

pub fn amount() -> impl Strategy<Value = Amount> {
    any::<u64>().prop_map(Amount::from)
}

/// Any valid security-module tree
pub fn ism(max_depth: usize) -> BoxedStrategy<ModuleConfig> {
    node(ModuleFamily::Ism, 0, max_depth)
}

/// Any valid hook tree
pub fn hook(max_depth: usize) -> BoxedStrategy<ModuleConfig> {
    node(ModuleFamily::Hook, 0, max_depth)
}

/// A valid tree of either family
pub fn module(max_depth: usize) -> BoxedStrategy<ModuleConfig> {
    prop_oneof![ism(max_depth), hook(max_depth)].boxed()
}

fn node(family: ModuleFamily, depth: usize, max_depth: usize) -> BoxedStrategy<ModuleConfig> {
    let kinds: &'static [ModuleKind] = match family {
        ModuleFamily::Ism => &ISM_KINDS,
        ModuleFamily::Hook => &HOOK_KINDS,
    };
    prop::sample::select(kinds)
        .prop_flat_map(move |kind| {
            if kind.is_composite() && depth >= max_depth {
                terminal(family)
            } else {
                of_kind(kind, family, depth, max_depth)
            }
        })
        .boxed()
}

fn terminal(family: ModuleFamily) -> BoxedStrategy<ModuleConfig> {
    match family {
        ModuleFamily::Hook => Just(ModuleConfig::merkle_tree_hook()).boxed(),
        ModuleFamily::Ism => address()
            .prop_map(|v| ModuleConfig::static_multisig(vec![v], 1))
            .boxed(),
    }
}

fn of_kind(
    kind: ModuleKind,
    family: ModuleFamily,
    depth: usize,
    max_depth: usize,
) -> BoxedStrategy<ModuleConfig> {
    let child = move || node(family, depth + 1, max_depth);

    match kind {
        ModuleKind::StaticThresholdMultisig => prop::collection::vec(address(), 1..5)
            .prop_flat_map(|validators| {
                let unique = validators.iter().collect::<BTreeSet<_>>().len() as u32;
                (Just(validators), 1..=unique)
            })
            .prop_map(|(validators, threshold)| {
                ModuleConfig::static_multisig(validators, threshold)
            })
            .boxed(),
        ModuleKind::WeightedMultisig => prop::collection::btree_map(address(), 1u64..100, 1..4)
            .prop_flat_map(|weights| {
                let total: u64 = weights.values().sum();
                (Just(weights), 1..=total)
            })
            .prop_map(|(weights, threshold_weight)| {
                ModuleConfig::WeightedMultisig(WeightedMultisigConfig {
                    validators: weights
                        .into_iter()
                        .map(|(address, weight)| WeightedValidator { address, weight })
                        .collect(),
                    threshold_weight,
                    address: None,
                })
            })
            .boxed(),
        ModuleKind::Aggregation => prop::collection::vec(child(), 1..3)
            .prop_flat_map(|children| {
                let n = children.len() as u32;
                (Just(children), 1..=n)
            })
            .prop_map(|(children, threshold)| {
                ModuleConfig::Aggregation(AggregationConfig {
                    children,
                    threshold,
                    address: None,
                })
            })
            .boxed(),
        ModuleKind::Routing => (address(), prop::collection::btree_map(domain(), child(), 0..3))
            .prop_map(|(owner, routes)| {
                ModuleConfig::Routing(RoutingConfig {
                    owner,
                    routes,
                    address: None,
                })
            })
            .boxed(),
        ModuleKind::FallbackRouting => (
            address(),
            prop::collection::btree_map(domain(), child(), 0..3),
            child(),
        )
            .prop_map(|(owner, routes, fallback)| {
                ModuleConfig::FallbackRouting(FallbackRoutingConfig {
                    owner,
                    routes,
                    fallback: Box::new(fallback),
                    address: None,
                })
            })
            .boxed(),
        ModuleKind::AmountRouting => (amount(), child(), child())
            .prop_map(|(threshold, lower, upper)| {
                ModuleConfig::AmountRouting(AmountRoutingConfig {
                    threshold,
                    lower: Box::new(lower),
                    upper: Box::new(upper),
                    address: None,
                })
            })
            .boxed(),
        ModuleKind::MerkleTreeHook => Just(ModuleConfig::merkle_tree_hook()).boxed(),
        ModuleKind::InterchainGasPaymaster => (
            address(),
            address(),
            prop::collection::btree_map(domain(), gas_oracle(), 0..3),
        )
            .prop_map(|(owner, beneficiary, per_destination)| {
                ModuleConfig::InterchainGasPaymaster(InterchainGasPaymasterConfig {
                    owner,
                    beneficiary,
                    per_destination,
                    address: None,
                })
            })
            .boxed(),
        ModuleKind::ProtocolFee => (address(), address(), any::<u64>())
            .prop_flat_map(|(owner, beneficiary, max_fee)| {
                (Just(owner), Just(beneficiary), Just(max_fee), 0..=max_fee)
            })
            .prop_map(|(owner, beneficiary, max_fee, fee)| {
                ModuleConfig::ProtocolFee(ProtocolFeeConfig {
                    owner,
                    beneficiary,
                    max_fee: max_fee.into(),
                    fee: fee.into(),
                    address: None,
                })
            })
            .boxed(),
        ModuleKind::Pausable => (address(), any::<bool>())
            .prop_map(|(owner, paused)| {
                ModuleConfig::Pausable(PausableConfig {
                    owner,
                    paused,
                    address: None,
                })
            })
            .boxed(),
    }
}

pub fn gas_oracle() -> impl Strategy<Value = GasOracleConfig> {
    (amount(), amount(), any::<u32>()).prop_map(|(exchange_rate, gas_price, overhead)| {
        GasOracleConfig {
            exchange_rate,
            gas_price,
            overhead: overhead as u64,
        }
    })
}

/// Depth of the deepest composite node, with the root at depth 0
pub fn deepest_composite(config: &ModuleConfig) -> Option<usize> {
    fn walk(config: &ModuleConfig, depth: usize, deepest: &mut Option<usize>) {
        if config.kind().is_some_and(|k| k.is_composite()) {
            *deepest = Some(deepest.map_or(depth, |d| d.max(depth)));
        }
        for child in config.children() {
            walk(child, depth + 1, deepest);
        }
    }
    let mut deepest = None;
    walk(config, 0, &mut deepest);
    deepest
}

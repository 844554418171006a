//! Structural comparison of module trees
//!
//! Both sides are expected to be normalized; [`diff`] does not reorder
//! anything itself. Transient `address` annotations are ignored.

use std::collections::BTreeMap;
use std::fmt;

use fleet_chain::DomainId;

use crate::module::ModuleConfig;

/// Outcome of comparing a deployed tree with its target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffResult {
    Equal,
    /// First divergence found, as a path from the root
    Divergent { path: Vec<String> },
}

impl DiffResult {
    pub fn is_equal(&self) -> bool {
        matches!(self, Self::Equal)
    }

    /// Path of the divergence, if any
    pub fn path(&self) -> Option<&[String]> {
        match self {
            Self::Equal => None,
            Self::Divergent { path } => Some(path),
        }
    }
}

impl fmt::Display for DiffResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal => write!(f, "equal"),
            Self::Divergent { path } if path.is_empty() => write!(f, "divergent at <root>"),
            Self::Divergent { path } => write!(f, "divergent at {}", path.join(".")),
        }
    }
}

/// Compare `current` against `target`
///
/// A kind mismatch diverges at that node. An opaque target only matches an
/// opaque current with the same address.
pub fn diff(current: &ModuleConfig, target: &ModuleConfig) -> DiffResult {
    let mut path = Vec::new();
    match diff_node(current, target, &mut path) {
        Some(path) => DiffResult::Divergent { path },
        None => DiffResult::Equal,
    }
}

/// Shorthand for field comparisons that diverge at `path.field`
fn field<T: PartialEq>(a: &T, b: &T, path: &[String], name: &str) -> Option<Vec<String>> {
    if a == b {
        None
    } else {
        let mut p = path.to_vec();
        p.push(name.to_string());
        Some(p)
    }
}

fn child(
    current: &ModuleConfig,
    target: &ModuleConfig,
    path: &mut Vec<String>,
    segment: impl ToString,
) -> Option<Vec<String>> {
    path.push(segment.to_string());
    let out = diff_node(current, target, path);
    path.pop();
    out
}

fn diff_node(
    current: &ModuleConfig,
    target: &ModuleConfig,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    use ModuleConfig as M;

    match (current, target) {
        (M::OpaqueAddress { address: a }, M::OpaqueAddress { address: b }) => {
            field(a, b, path, "address")
        }
        (M::StaticThresholdMultisig(a), M::StaticThresholdMultisig(b)) => {
            field(&a.validators, &b.validators, path, "validators")
                .or_else(|| field(&a.threshold, &b.threshold, path, "threshold"))
        }
        (M::WeightedMultisig(a), M::WeightedMultisig(b)) => {
            field(&a.validators, &b.validators, path, "validators").or_else(|| {
                field(&a.threshold_weight, &b.threshold_weight, path, "thresholdWeight")
            })
        }
        (M::Aggregation(a), M::Aggregation(b)) => {
            if a.children.len() != b.children.len() {
                return field(&a.children.len(), &b.children.len(), path, "children");
            }
            path.push("children".to_string());
            let out = a
                .children
                .iter()
                .zip(&b.children)
                .enumerate()
                .find_map(|(i, (x, y))| child(x, y, path, i));
            path.pop();
            out.or_else(|| field(&a.threshold, &b.threshold, path, "threshold"))
        }
        (M::Routing(a), M::Routing(b)) => {
            field(&a.owner, &b.owner, path, "owner").or_else(|| routes(&a.routes, &b.routes, path))
        }
        (M::FallbackRouting(a), M::FallbackRouting(b)) => field(&a.owner, &b.owner, path, "owner")
            .or_else(|| routes(&a.routes, &b.routes, path))
            .or_else(|| child(&a.fallback, &b.fallback, path, "fallback")),
        (M::AmountRouting(a), M::AmountRouting(b)) => {
            field(&a.threshold, &b.threshold, path, "threshold")
                .or_else(|| child(&a.lower, &b.lower, path, "lower"))
                .or_else(|| child(&a.upper, &b.upper, path, "upper"))
        }
        (M::MerkleTreeHook(_), M::MerkleTreeHook(_)) => None,
        (M::InterchainGasPaymaster(a), M::InterchainGasPaymaster(b)) => {
            field(&a.owner, &b.owner, path, "owner")
                .or_else(|| field(&a.beneficiary, &b.beneficiary, path, "beneficiary"))
                .or_else(|| {
                    let keys = union_keys(&a.per_destination, &b.per_destination);
                    keys.into_iter().find_map(|d| {
                        if a.per_destination.get(&d) == b.per_destination.get(&d) {
                            None
                        } else {
                            let mut p = path.clone();
                            p.extend(["perDestination".to_string(), d.to_string()]);
                            Some(p)
                        }
                    })
                })
        }
        (M::ProtocolFee(a), M::ProtocolFee(b)) => field(&a.owner, &b.owner, path, "owner")
            .or_else(|| field(&a.beneficiary, &b.beneficiary, path, "beneficiary"))
            .or_else(|| field(&a.max_fee, &b.max_fee, path, "maxFee"))
            .or_else(|| field(&a.fee, &b.fee, path, "fee")),
        (M::Pausable(a), M::Pausable(b)) => {
            field(&a.owner, &b.owner, path, "owner")
                .or_else(|| field(&a.paused, &b.paused, path, "paused"))
        }
        // Kind mismatch, including opaque against declarative
        _ => Some(path.clone()),
    }
}

fn routes(
    current: &BTreeMap<DomainId, ModuleConfig>,
    target: &BTreeMap<DomainId, ModuleConfig>,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    path.push("routes".to_string());
    let out = union_keys(current, target)
        .into_iter()
        .find_map(|domain| match (current.get(&domain), target.get(&domain)) {
            (Some(a), Some(b)) => child(a, b, path, domain),
            _ => {
                let mut p = path.clone();
                p.push(domain.to_string());
                Some(p)
            }
        });
    path.pop();
    out
}

fn union_keys<V>(a: &BTreeMap<DomainId, V>, b: &BTreeMap<DomainId, V>) -> Vec<DomainId> {
    let mut keys: Vec<DomainId> = a.keys().chain(b.keys()).copied().collect();
    keys.sort_unstable();
    keys.dedup();
    keys
}

/// Convenience check used by callers that only need a yes/no answer
pub fn is_equal(current: &ModuleConfig, target: &ModuleConfig) -> bool {
    diff(current, target).is_equal()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{GasOracleConfig, InterchainGasPaymasterConfig, RoutingConfig};
    use fleet_chain::Address;
    use pretty_assertions::assert_eq;

    fn addr(n: u8) -> Address {
        Address([n; 20])
    }

    fn path(segments: &[&str]) -> DiffResult {
        DiffResult::Divergent {
            path: segments.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn routing(routes: Vec<(DomainId, ModuleConfig)>) -> ModuleConfig {
        ModuleConfig::Routing(RoutingConfig {
            owner: addr(1),
            routes: routes.into_iter().collect(),
            address: None,
        })
    }

    #[test]
    fn identical_trees_are_equal() {
        let tree = routing(vec![(10, ModuleConfig::static_multisig(vec![addr(2)], 1))]);
        assert_eq!(diff(&tree, &tree), DiffResult::Equal);
    }

    #[test]
    fn kind_mismatch_diverges_at_node() {
        let current = routing(vec![(10, ModuleConfig::merkle_tree_hook())]);
        let target = routing(vec![(10, ModuleConfig::static_multisig(vec![addr(2)], 1))]);
        assert_eq!(diff(&current, &target), path(&["routes", "10"]));
    }

    #[test]
    fn opaque_never_matches_declarative() {
        let mut current = ModuleConfig::static_multisig(vec![addr(2)], 1);
        current.set_deployed_address(Some(addr(7)));
        let target = ModuleConfig::opaque(addr(7));
        assert_eq!(diff(&current, &target), path(&[]));
        assert_eq!(diff(&target, &current), path(&[]));
        assert!(is_equal(&target, &ModuleConfig::opaque(addr(7))));
        assert_eq!(diff(&target, &ModuleConfig::opaque(addr(8))), path(&["address"]));
    }

    #[test]
    fn missing_route_is_reported_by_domain() {
        let current = routing(vec![(10, ModuleConfig::merkle_tree_hook())]);
        let target = routing(vec![
            (10, ModuleConfig::merkle_tree_hook()),
            (20, ModuleConfig::merkle_tree_hook()),
        ]);
        assert_eq!(diff(&current, &target), path(&["routes", "20"]));
    }

    #[test]
    fn gas_oracle_entry_is_reported_by_destination() {
        let oracle = |rate: u64| GasOracleConfig {
            exchange_rate: rate.into(),
            gas_price: 1u64.into(),
            overhead: 0,
        };
        let igp = |rate: u64| {
            ModuleConfig::InterchainGasPaymaster(InterchainGasPaymasterConfig {
                owner: addr(1),
                beneficiary: addr(1),
                per_destination: [(5, oracle(1)), (6, oracle(rate))].into_iter().collect(),
                address: None,
            })
        };
        assert_eq!(diff(&igp(1), &igp(2)), path(&["perDestination", "6"]));
    }

    #[test]
    fn display_joins_path() {
        assert_eq!(
            path(&["children", "1", "threshold"]).to_string(),
            "divergent at children.1.threshold"
        );
        assert_eq!(DiffResult::Equal.to_string(), "equal");
    }
}

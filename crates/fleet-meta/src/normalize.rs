//! Canonical, comparison-ready module configurations
//!
//! Normalization validates a tree and rewrites it so that two semantically
//! equal trees are structurally equal:
//!
//! - validator sets are sorted (and de-duplicated for threshold multisigs)
//! - route maps are keyed in domain order (guaranteed by `BTreeMap`)
//! - transient `address` annotations are cleared
//!
//! `normalize` is idempotent. Aggregation children keep their declared order,
//! since the deployed module stores them as a list.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::module::{
    AggregationConfig, AmountRoutingConfig, FallbackRoutingConfig, ModuleConfig, ModuleFamily,
    RoutingConfig, StaticThresholdMultisigConfig, WeightedMultisigConfig,
};

/// Validate and canonicalize a module tree
pub fn normalize(config: &ModuleConfig) -> Result<ModuleConfig> {
    normalize_at(config, &[])
}

/// Like [`normalize`], reporting errors under `prefix` (e.g. `endpoints.alpha.default_ism`)
pub fn normalize_at(config: &ModuleConfig, prefix: &[String]) -> Result<ModuleConfig> {
    let mut path = prefix.to_vec();
    visit(config, &mut path)
}

/// Clear every transient `address` annotation without validating
pub fn strip_addresses(config: &ModuleConfig) -> ModuleConfig {
    let mut out = config.clone();
    strip_in_place(&mut out);
    out
}

/// Sort unordered collections without validating or stripping addresses
///
/// Used on trees read back from an endpoint, which may not pass validation
/// but still need to be compared against a normalized target.
pub fn canonicalize(config: &ModuleConfig) -> ModuleConfig {
    let mut out = config.clone();
    canonicalize_in_place(&mut out);
    out
}

fn canonicalize_in_place(config: &mut ModuleConfig) {
    match config {
        ModuleConfig::StaticThresholdMultisig(c) => {
            c.validators.sort();
            c.validators.dedup();
        }
        ModuleConfig::WeightedMultisig(c) => c.validators.sort(),
        ModuleConfig::Aggregation(c) => c.children.iter_mut().for_each(canonicalize_in_place),
        ModuleConfig::Routing(c) => c.routes.values_mut().for_each(canonicalize_in_place),
        ModuleConfig::FallbackRouting(c) => {
            c.routes.values_mut().for_each(canonicalize_in_place);
            canonicalize_in_place(&mut c.fallback);
        }
        ModuleConfig::AmountRouting(c) => {
            canonicalize_in_place(&mut c.lower);
            canonicalize_in_place(&mut c.upper);
        }
        _ => {}
    }
}

fn strip_in_place(config: &mut ModuleConfig) {
    config.set_deployed_address(None);
    match config {
        ModuleConfig::Aggregation(c) => c.children.iter_mut().for_each(strip_in_place),
        ModuleConfig::Routing(c) => c.routes.values_mut().for_each(strip_in_place),
        ModuleConfig::FallbackRouting(c) => {
            c.routes.values_mut().for_each(strip_in_place);
            strip_in_place(&mut c.fallback);
        }
        ModuleConfig::AmountRouting(c) => {
            strip_in_place(&mut c.lower);
            strip_in_place(&mut c.upper);
        }
        _ => {}
    }
}

fn at<T>(
    path: &mut Vec<String>,
    segment: impl ToString,
    f: impl FnOnce(&mut Vec<String>) -> Result<T>,
) -> Result<T> {
    path.push(segment.to_string());
    let out = f(path);
    path.pop();
    out
}

fn visit(config: &ModuleConfig, path: &mut Vec<String>) -> Result<ModuleConfig> {
    let normalized = match config {
        ModuleConfig::StaticThresholdMultisig(c) => {
            ModuleConfig::StaticThresholdMultisig(static_multisig(c, path)?)
        }
        ModuleConfig::WeightedMultisig(c) => {
            ModuleConfig::WeightedMultisig(weighted_multisig(c, path)?)
        }
        ModuleConfig::Aggregation(c) => ModuleConfig::Aggregation(aggregation(c, path)?),
        ModuleConfig::Routing(c) => ModuleConfig::Routing(routing(c, path)?),
        ModuleConfig::FallbackRouting(c) => {
            ModuleConfig::FallbackRouting(fallback_routing(c, path)?)
        }
        ModuleConfig::AmountRouting(c) => ModuleConfig::AmountRouting(amount_routing(c, path)?),
        ModuleConfig::MerkleTreeHook(_) => ModuleConfig::merkle_tree_hook(),
        ModuleConfig::InterchainGasPaymaster(c) => {
            let mut c = c.clone();
            c.address = None;
            ModuleConfig::InterchainGasPaymaster(c)
        }
        ModuleConfig::ProtocolFee(c) => {
            if c.fee > c.max_fee {
                return at(path, "fee", |p| {
                    Err(Error::validation(
                        p,
                        format!("fee {} exceeds maxFee {}", c.fee, c.max_fee),
                    ))
                });
            }
            let mut c = c.clone();
            c.address = None;
            ModuleConfig::ProtocolFee(c)
        }
        ModuleConfig::Pausable(c) => {
            let mut c = c.clone();
            c.address = None;
            ModuleConfig::Pausable(c)
        }
        ModuleConfig::OpaqueAddress { address } => {
            if address.is_zero() {
                return at(path, "address", |p| {
                    Err(Error::validation(p, "opaque module reference is the zero address"))
                });
            }
            ModuleConfig::opaque(*address)
        }
    };
    Ok(normalized)
}

fn static_multisig(
    c: &StaticThresholdMultisigConfig,
    path: &mut Vec<String>,
) -> Result<StaticThresholdMultisigConfig> {
    let validators: BTreeSet<_> = c.validators.iter().copied().collect();
    if validators.is_empty() {
        return at(path, "validators", |p| Err(Error::validation(p, "validator set is empty")));
    }
    if validators.iter().any(|v| v.is_zero()) {
        return at(path, "validators", |p| {
            Err(Error::validation(p, "validator set contains the zero address"))
        });
    }
    if c.threshold == 0 || c.threshold as usize > validators.len() {
        return at(path, "threshold", |p| {
            Err(Error::validation(
                p,
                format!(
                    "threshold {} must be between 1 and {} validators",
                    c.threshold,
                    validators.len()
                ),
            ))
        });
    }
    Ok(StaticThresholdMultisigConfig {
        validators: validators.into_iter().collect(),
        threshold: c.threshold,
        address: None,
    })
}

fn weighted_multisig(
    c: &WeightedMultisigConfig,
    path: &mut Vec<String>,
) -> Result<WeightedMultisigConfig> {
    if c.validators.is_empty() {
        return at(path, "validators", |p| Err(Error::validation(p, "validator set is empty")));
    }
    let mut validators = c.validators.clone();
    validators.sort();

    let mut total: u128 = 0;
    for (i, v) in validators.iter().enumerate() {
        if v.weight == 0 {
            return at(path, "validators", |p| {
                at(p, i, |p| {
                    Err(Error::validation(p, format!("validator {} has zero weight", v.address)))
                })
            });
        }
        if v.address.is_zero() {
            return at(path, "validators", |p| {
                at(p, i, |p| Err(Error::validation(p, "validator is the zero address")))
            });
        }
        if i > 0 && validators[i - 1].address == v.address {
            return at(path, "validators", |p| {
                Err(Error::validation(p, format!("validator {} listed twice", v.address)))
            });
        }
        total += v.weight as u128;
    }

    if c.threshold_weight == 0 || c.threshold_weight as u128 > total {
        return at(path, "thresholdWeight", |p| {
            Err(Error::validation(
                p,
                format!(
                    "threshold weight {} must be between 1 and total weight {}",
                    c.threshold_weight, total
                ),
            ))
        });
    }

    Ok(WeightedMultisigConfig {
        validators,
        threshold_weight: c.threshold_weight,
        address: None,
    })
}

fn aggregation(c: &AggregationConfig, path: &mut Vec<String>) -> Result<AggregationConfig> {
    if c.children.is_empty() {
        return at(path, "children", |p| Err(Error::validation(p, "aggregation has no children")));
    }
    if c.threshold == 0 || c.threshold as usize > c.children.len() {
        return at(path, "threshold", |p| {
            Err(Error::validation(
                p,
                format!(
                    "threshold {} must be between 1 and {} children",
                    c.threshold,
                    c.children.len()
                ),
            ))
        });
    }
    let children = at(path, "children", |p| {
        c.children
            .iter()
            .enumerate()
            .map(|(i, child)| at(p, i, |p| visit(child, p)))
            .collect::<Result<Vec<_>>>()
    })?;
    check_family(children.iter(), path)?;
    Ok(AggregationConfig {
        children,
        threshold: c.threshold,
        address: None,
    })
}

fn routes(
    routes: &std::collections::BTreeMap<u32, ModuleConfig>,
    path: &mut Vec<String>,
) -> Result<std::collections::BTreeMap<u32, ModuleConfig>> {
    at(path, "routes", |p| {
        routes
            .iter()
            .map(|(domain, child)| at(p, domain, |p| visit(child, p)).map(|c| (*domain, c)))
            .collect()
    })
}

fn routing(c: &RoutingConfig, path: &mut Vec<String>) -> Result<RoutingConfig> {
    let routes = routes(&c.routes, path)?;
    check_family(routes.values(), path)?;
    Ok(RoutingConfig {
        owner: c.owner,
        routes,
        address: None,
    })
}

fn fallback_routing(
    c: &FallbackRoutingConfig,
    path: &mut Vec<String>,
) -> Result<FallbackRoutingConfig> {
    let routes = routes(&c.routes, path)?;
    let fallback = at(path, "fallback", |p| visit(&c.fallback, p))?;
    check_family(routes.values().chain(std::iter::once(&fallback)), path)?;
    Ok(FallbackRoutingConfig {
        owner: c.owner,
        routes,
        fallback: Box::new(fallback),
        address: None,
    })
}

fn amount_routing(c: &AmountRoutingConfig, path: &mut Vec<String>) -> Result<AmountRoutingConfig> {
    let lower = at(path, "lower", |p| visit(&c.lower, p))?;
    let upper = at(path, "upper", |p| visit(&c.upper, p))?;
    check_family([&lower, &upper].into_iter(), path)?;
    Ok(AmountRoutingConfig {
        threshold: c.threshold,
        lower: Box::new(lower),
        upper: Box::new(upper),
        address: None,
    })
}

fn check_family<'a>(
    children: impl Iterator<Item = &'a ModuleConfig>,
    path: &mut Vec<String>,
) -> Result<()> {
    let mut seen: Option<ModuleFamily> = None;
    for child in children {
        match (seen, child.family()) {
            (Some(a), Some(b)) if a != b => {
                return Err(Error::validation(
                    path,
                    format!("composite mixes {a} and {b} modules"),
                ));
            }
            (None, Some(b)) => seen = Some(b),
            _ => {}
        }
    }
    Ok(())
}

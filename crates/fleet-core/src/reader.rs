//! Reconstructing module configurations from deployed state
//!
//! [`ModuleReader::derive`] is the inverse of deployment: starting from a
//! module address it reads the kind discriminator, then the kind's fields,
//! then recurses into child module addresses. Every derived node carries its
//! address in the transient `address` annotation.

use std::collections::BTreeMap;

use fleet_chain::abi::read;
use fleet_chain::{Address, DomainId, TransportError};
use fleet_meta::{
    AggregationConfig, Amount, AmountRoutingConfig, FallbackRoutingConfig, GasOracleConfig,
    InterchainGasPaymasterConfig, MerkleTreeHookConfig, ModuleConfig, ModuleKind, PausableConfig,
    ProtocolFeeConfig, RoutingConfig, StaticThresholdMultisigConfig, WeightedMultisigConfig,
    WeightedValidator,
};
use futures::future::{BoxFuture, FutureExt, try_join_all};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::context::ChainContext;
use crate::error::{Error, Result};

/// Maximum nesting followed before a subtree is treated as undecodable
const MAX_DERIVE_DEPTH: usize = 16;

#[derive(Deserialize)]
struct ValidatorsAndThreshold {
    validators: Vec<Address>,
    threshold: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidatorsAndThresholdWeight {
    validators: Vec<WeightedValidator>,
    threshold_weight: u64,
}

#[derive(Deserialize)]
struct ModulesAndThreshold {
    modules: Vec<Address>,
    threshold: u32,
}

/// Reads module trees from one endpoint
#[derive(Debug, Clone)]
pub struct ModuleReader {
    ctx: ChainContext,
}

impl ModuleReader {
    pub fn new(ctx: ChainContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ChainContext {
        &self.ctx
    }

    /// Derive the tree rooted at `address`
    ///
    /// Fails with [`Error::UndecodableModule`] if any node's kind is unknown.
    pub async fn derive(&self, address: Address) -> Result<ModuleConfig> {
        self.derive_node(address, false, 0).await
    }

    /// Derive the tree rooted at `address`, substituting an opaque reference
    /// for every node whose kind is unknown
    pub async fn derive_lenient(&self, address: Address) -> Result<ModuleConfig> {
        self.derive_node(address, true, 0).await
    }

    async fn read<T: DeserializeOwned>(&self, address: Address, function: &str) -> Result<T> {
        self.ctx.read_json(address, function, vec![]).await
    }

    async fn read_at<T: DeserializeOwned>(
        &self,
        address: Address,
        function: &str,
        domain: DomainId,
    ) -> Result<T> {
        self.ctx.read_json(address, function, vec![json!(domain)]).await
    }

    fn undecodable(&self, address: Address, kind: &str, lenient: bool) -> Result<ModuleConfig> {
        if lenient {
            tracing::warn!(
                endpoint = %self.ctx.endpoint(),
                address = %address,
                kind,
                "Undecodable module, treating as opaque"
            );
            Ok(ModuleConfig::opaque(address))
        } else {
            Err(Error::UndecodableModule {
                endpoint: self.ctx.endpoint().clone(),
                address,
                kind: kind.to_string(),
            })
        }
    }

    async fn kind_of(&self, address: Address) -> Result<std::result::Result<ModuleKind, String>> {
        let raw: String = match self.read(address, read::MODULE_KIND).await {
            Ok(raw) => raw,
            Err(Error::Chain(fleet_chain::Error::Transport {
                source: TransportError::Reverted(_),
                ..
            })) => return Ok(Err("<none>".to_string())),
            Err(Error::Chain(fleet_chain::Error::MalformedResponse { .. })) => {
                return Ok(Err("<malformed>".to_string()));
            }
            Err(e) => return Err(e),
        };
        Ok(raw.parse::<ModuleKind>().map_err(|_| raw))
    }

    fn derive_node(
        &self,
        address: Address,
        lenient: bool,
        depth: usize,
    ) -> BoxFuture<'_, Result<ModuleConfig>> {
        async move {
            if depth > MAX_DERIVE_DEPTH {
                return self.undecodable(address, "<depth limit>", lenient);
            }
            let kind = match self.kind_of(address).await? {
                Ok(kind) => kind,
                Err(raw) => return self.undecodable(address, &raw, lenient),
            };
            tracing::debug!(
                endpoint = %self.ctx.endpoint(),
                address = %address,
                %kind,
                depth,
                "Deriving module"
            );

            let child = |child: Address| self.derive_node(child, lenient, depth + 1);
            let routes = |at: Address| async move {
                let domains: Vec<DomainId> = self.read(at, read::DOMAINS).await?;
                let entries = try_join_all(domains.into_iter().map(|domain| async move {
                    let module: Address = self.read_at(at, read::MODULE, domain).await?;
                    Ok::<_, Error>((domain, child(module).await?))
                }))
                .await?;
                Ok::<_, Error>(entries.into_iter().collect::<BTreeMap<_, _>>())
            };

            let config = match kind {
                ModuleKind::StaticThresholdMultisig => {
                    let v: ValidatorsAndThreshold =
                        self.read(address, read::VALIDATORS_AND_THRESHOLD).await?;
                    ModuleConfig::StaticThresholdMultisig(StaticThresholdMultisigConfig {
                        validators: v.validators,
                        threshold: v.threshold,
                        address: Some(address),
                    })
                }
                ModuleKind::WeightedMultisig => {
                    let v: ValidatorsAndThresholdWeight =
                        self.read(address, read::VALIDATORS_AND_THRESHOLD_WEIGHT).await?;
                    ModuleConfig::WeightedMultisig(WeightedMultisigConfig {
                        validators: v.validators,
                        threshold_weight: v.threshold_weight,
                        address: Some(address),
                    })
                }
                ModuleKind::Aggregation => {
                    let m: ModulesAndThreshold =
                        self.read(address, read::MODULES_AND_THRESHOLD).await?;
                    let children = try_join_all(m.modules.into_iter().map(child)).await?;
                    ModuleConfig::Aggregation(AggregationConfig {
                        children,
                        threshold: m.threshold,
                        address: Some(address),
                    })
                }
                ModuleKind::Routing => ModuleConfig::Routing(RoutingConfig {
                    owner: self.read(address, read::OWNER).await?,
                    routes: routes(address).await?,
                    address: Some(address),
                }),
                ModuleKind::FallbackRouting => {
                    let fallback: Address = self.read(address, read::FALLBACK).await?;
                    ModuleConfig::FallbackRouting(FallbackRoutingConfig {
                        owner: self.read(address, read::OWNER).await?,
                        routes: routes(address).await?,
                        fallback: Box::new(child(fallback).await?),
                        address: Some(address),
                    })
                }
                ModuleKind::AmountRouting => {
                    let threshold: Amount = self.read(address, read::THRESHOLD).await?;
                    let lower: Address = self.read(address, read::LOWER).await?;
                    let upper: Address = self.read(address, read::UPPER).await?;
                    ModuleConfig::AmountRouting(AmountRoutingConfig {
                        threshold,
                        lower: Box::new(child(lower).await?),
                        upper: Box::new(child(upper).await?),
                        address: Some(address),
                    })
                }
                ModuleKind::MerkleTreeHook => ModuleConfig::MerkleTreeHook(MerkleTreeHookConfig {
                    address: Some(address),
                }),
                ModuleKind::InterchainGasPaymaster => {
                    let domains: Vec<DomainId> = self.read(address, read::DOMAINS).await?;
                    let oracles = try_join_all(domains.into_iter().map(|domain| async move {
                        let oracle: Option<GasOracleConfig> =
                            self.read_at(address, read::DESTINATION_GAS_CONFIG, domain).await?;
                        Ok::<_, Error>(oracle.map(|o| (domain, o)))
                    }))
                    .await?;
                    ModuleConfig::InterchainGasPaymaster(InterchainGasPaymasterConfig {
                        owner: self.read(address, read::OWNER).await?,
                        beneficiary: self.read(address, read::BENEFICIARY).await?,
                        per_destination: oracles.into_iter().flatten().collect(),
                        address: Some(address),
                    })
                }
                ModuleKind::ProtocolFee => ModuleConfig::ProtocolFee(ProtocolFeeConfig {
                    owner: self.read(address, read::OWNER).await?,
                    beneficiary: self.read(address, read::BENEFICIARY).await?,
                    max_fee: self.read(address, read::MAX_PROTOCOL_FEE).await?,
                    fee: self.read(address, read::PROTOCOL_FEE).await?,
                    address: Some(address),
                }),
                ModuleKind::Pausable => ModuleConfig::Pausable(PausableConfig {
                    owner: self.read(address, read::OWNER).await?,
                    paused: self.read(address, read::PAUSED).await?,
                    address: Some(address),
                }),
            };
            Ok(config)
        }
        .boxed()
    }
}

/// Replace derived subtrees by opaque references wherever `target` pins an
/// address and the derived subtree lives at that address
///
/// Pinned modules are compared by identity, not by structure.
pub fn project_opaque(current: &ModuleConfig, target: &ModuleConfig) -> ModuleConfig {
    use ModuleConfig as M;

    if let M::OpaqueAddress { address } = target {
        if current.deployed_address() == Some(*address) {
            return ModuleConfig::opaque(*address);
        }
        return current.clone();
    }

    type Routes = BTreeMap<DomainId, ModuleConfig>;
    let project_routes = |current: &Routes, target: &Routes| {
        current
            .iter()
            .map(|(domain, child)| {
                let projected = match target.get(domain) {
                    Some(t) => project_opaque(child, t),
                    None => child.clone(),
                };
                (*domain, projected)
            })
            .collect::<BTreeMap<_, _>>()
    };

    match (current, target) {
        (M::Aggregation(c), M::Aggregation(t)) => {
            let mut out = c.clone();
            for (child, target) in out.children.iter_mut().zip(&t.children) {
                *child = project_opaque(child, target);
            }
            M::Aggregation(out)
        }
        (M::Routing(c), M::Routing(t)) => M::Routing(RoutingConfig {
            routes: project_routes(&c.routes, &t.routes),
            ..c.clone()
        }),
        (M::FallbackRouting(c), M::FallbackRouting(t)) => M::FallbackRouting(FallbackRoutingConfig {
            routes: project_routes(&c.routes, &t.routes),
            fallback: Box::new(project_opaque(&c.fallback, &t.fallback)),
            ..c.clone()
        }),
        (M::AmountRouting(c), M::AmountRouting(t)) => M::AmountRouting(AmountRoutingConfig {
            lower: Box::new(project_opaque(&c.lower, &t.lower)),
            upper: Box::new(project_opaque(&c.upper, &t.upper)),
            ..c.clone()
        }),
        _ => current.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_chain::Address;
    use pretty_assertions::assert_eq;

    fn addr(n: u8) -> Address {
        Address([n; 20])
    }

    fn derived(mut config: ModuleConfig, at: u8) -> ModuleConfig {
        config.set_deployed_address(Some(addr(at)));
        config
    }

    #[test]
    fn pinned_child_is_projected_to_opaque() {
        let current = ModuleConfig::Routing(RoutingConfig {
            owner: addr(1),
            routes: [
                (5, derived(ModuleConfig::merkle_tree_hook(), 50)),
                (6, derived(ModuleConfig::merkle_tree_hook(), 60)),
            ]
            .into_iter()
            .collect(),
            address: Some(addr(2)),
        });
        let target = ModuleConfig::Routing(RoutingConfig {
            owner: addr(1),
            routes: [
                (5, ModuleConfig::opaque(addr(50))),
                (6, ModuleConfig::opaque(addr(61))),
            ]
            .into_iter()
            .collect(),
            address: None,
        });

        let projected = project_opaque(&current, &target);
        let ModuleConfig::Routing(routing) = projected else {
            panic!("kind changed");
        };
        assert_eq!(routing.routes[&5], ModuleConfig::opaque(addr(50)));
        assert_eq!(routing.routes[&6].kind(), Some(ModuleKind::MerkleTreeHook));
        assert_eq!(routing.address, Some(addr(2)));
    }

    #[test]
    fn declarative_target_leaves_tree_untouched() {
        let current = derived(ModuleConfig::merkle_tree_hook(), 9);
        assert_eq!(project_opaque(&current, &ModuleConfig::merkle_tree_hook()), current);
    }
}

//! Pure planning: turning (current, target) pairs into operations
//!
//! Nothing here touches an endpoint. The current tree must carry address
//! annotations (as produced by the module reader) and both trees must be in
//! canonical order.

use std::collections::BTreeMap;

use fleet_chain::abi::write;
use fleet_chain::{Address, DomainId, FactoryBindings};
use fleet_meta::{GasOracleConfig, ModuleConfig, ModuleKind, diff};
use serde_json::Value;

use super::plan::{AddressRef, Arg, PlanBuilder, ReconciliationPlan};
use crate::error::{Error, Result};

pub(crate) struct Planner {
    signer: Address,
    factories: FactoryBindings,
    builder: PlanBuilder,
}

impl Planner {
    pub(crate) fn new(signer: Address, factories: FactoryBindings) -> Self {
        Self {
            signer,
            factories,
            builder: PlanBuilder::default(),
        }
    }

    pub(crate) fn mutate(&mut self, target: AddressRef, call: &str, args: Vec<Arg>) {
        self.builder.mutate(target, call, args);
    }

    pub(crate) fn finish(self, new_root: Option<AddressRef>) -> ReconciliationPlan {
        self.builder.finish(new_root)
    }

    /// Hand ownership to `owner` at the end of the plan, unless the signer keeps it
    fn hand_over(&mut self, at: AddressRef, owner: Address) {
        if owner != self.signer {
            self.builder
                .defer(at, write::TRANSFER_OWNERSHIP, vec![Arg::known(owner)]);
        }
    }

    /// Plan a fresh deployment of `config`, children first
    ///
    /// Opaque references are used as-is. Ownable modules are deployed owned
    /// by the signer and handed to their configured owner at the end.
    pub(crate) fn create_node(&mut self, config: &ModuleConfig) -> Result<AddressRef> {
        use ModuleConfig as M;

        let at = match config {
            M::OpaqueAddress { address } => return Ok(AddressRef::Known(*address)),
            M::StaticThresholdMultisig(c) => self.builder.deploy(
                ModuleKind::StaticThresholdMultisig,
                Arg::object([
                    ("factory", Arg::known(self.factories.static_multisig)),
                    ("validators", Arg::value(serde_json::to_value(&c.validators)?)),
                    ("threshold", Arg::value(c.threshold)),
                ]),
            ),
            M::WeightedMultisig(c) => self.builder.deploy(
                ModuleKind::WeightedMultisig,
                Arg::object([
                    ("factory", Arg::known(self.factories.weighted_multisig)),
                    ("validators", Arg::value(serde_json::to_value(&c.validators)?)),
                    ("thresholdWeight", Arg::value(c.threshold_weight)),
                ]),
            ),
            M::Aggregation(c) => {
                let modules = c
                    .children
                    .iter()
                    .map(|child| self.create_node(child).map(Arg::from))
                    .collect::<Result<Vec<_>>>()?;
                self.builder.deploy(
                    ModuleKind::Aggregation,
                    Arg::object([
                        ("factory", Arg::known(self.factories.aggregation)),
                        ("modules", Arg::List(modules)),
                        ("threshold", Arg::value(c.threshold)),
                    ]),
                )
            }
            M::Routing(c) => {
                let routes = self.create_routes(&c.routes)?;
                let at = self.builder.deploy(
                    ModuleKind::Routing,
                    Arg::object([("owner", Arg::known(self.signer)), ("routes", routes)]),
                );
                self.hand_over(at, c.owner);
                at
            }
            M::FallbackRouting(c) => {
                let routes = self.create_routes(&c.routes)?;
                let fallback = self.create_node(&c.fallback)?;
                let at = self.builder.deploy(
                    ModuleKind::FallbackRouting,
                    Arg::object([
                        ("owner", Arg::known(self.signer)),
                        ("routes", routes),
                        ("fallback", fallback.into()),
                    ]),
                );
                self.hand_over(at, c.owner);
                at
            }
            M::AmountRouting(c) => {
                let lower = self.create_node(&c.lower)?;
                let upper = self.create_node(&c.upper)?;
                self.builder.deploy(
                    ModuleKind::AmountRouting,
                    Arg::object([
                        ("threshold", Arg::value(c.threshold.to_string())),
                        ("lower", lower.into()),
                        ("upper", upper.into()),
                    ]),
                )
            }
            M::MerkleTreeHook(_) => self
                .builder
                .deploy(ModuleKind::MerkleTreeHook, Arg::object::<&str>([])),
            M::InterchainGasPaymaster(c) => {
                let at = self.builder.deploy(
                    ModuleKind::InterchainGasPaymaster,
                    Arg::object([
                        ("owner", Arg::known(self.signer)),
                        ("beneficiary", Arg::known(c.beneficiary)),
                        ("gasConfigs", Arg::value(gas_configs(&c.per_destination)?)),
                    ]),
                );
                self.hand_over(at, c.owner);
                at
            }
            M::ProtocolFee(c) => {
                let at = self.builder.deploy(
                    ModuleKind::ProtocolFee,
                    Arg::object([
                        ("owner", Arg::known(self.signer)),
                        ("beneficiary", Arg::known(c.beneficiary)),
                        ("maxProtocolFee", Arg::value(c.max_fee.to_string())),
                        ("protocolFee", Arg::value(c.fee.to_string())),
                    ]),
                );
                self.hand_over(at, c.owner);
                at
            }
            M::Pausable(c) => {
                let at = self.builder.deploy(
                    ModuleKind::Pausable,
                    Arg::object([
                        ("owner", Arg::known(self.signer)),
                        ("paused", Arg::value(c.paused)),
                    ]),
                );
                self.hand_over(at, c.owner);
                at
            }
        };
        Ok(at)
    }

    fn create_routes(&mut self, routes: &BTreeMap<DomainId, ModuleConfig>) -> Result<Arg> {
        let entries = routes
            .iter()
            .map(|(domain, child)| Ok((domain.to_string(), Arg::from(self.create_node(child)?))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Arg::object(entries))
    }

    /// Plan the operations converging `current` to `target`
    ///
    /// Returns the node's new address when it had to be replaced; the caller
    /// repoints whatever references it.
    pub(crate) fn update_node(
        &mut self,
        current: &ModuleConfig,
        target: &ModuleConfig,
    ) -> Result<Option<AddressRef>> {
        use ModuleConfig as M;

        if diff(current, target).is_equal() {
            return Ok(None);
        }
        if let M::OpaqueAddress { address } = target {
            return Ok(Some(AddressRef::Known(*address)));
        }

        let (current_kind, target_kind) = (current.kind(), target.kind());
        if current_kind != target_kind {
            if let (Some(a), Some(b)) = (current.family(), target.family()) {
                if a != b {
                    return Err(Error::UnsupportedTransition {
                        current: format!("{} ({a})", current.kind_name()),
                        target: format!("{} ({b})", target.kind_name()),
                    });
                }
            }
            tracing::debug!(
                from = current.kind_name(),
                to = target.kind_name(),
                "Kind changed, redeploying"
            );
            return self.create_node(target).map(Some);
        }
        if target_kind.is_some_and(|k| !k.is_mutable()) {
            return self.create_node(target).map(Some);
        }

        let address = current.deployed_address().ok_or_else(|| {
            Error::invariant(format!("derived {} node has no address", current.kind_name()))
        })?;
        let at = AddressRef::Known(address);

        match (current, target) {
            (M::Routing(c), M::Routing(t)) => {
                self.update_routes(at, &c.routes, &t.routes)?;
                self.update_owner(at, c.owner, t.owner);
            }
            (M::FallbackRouting(c), M::FallbackRouting(t)) => {
                self.update_routes(at, &c.routes, &t.routes)?;
                if let Some(fallback) = self.update_node(&c.fallback, &t.fallback)? {
                    self.mutate(at, write::SET_FALLBACK, vec![fallback.into()]);
                }
                self.update_owner(at, c.owner, t.owner);
            }
            (M::AmountRouting(c), M::AmountRouting(t)) => {
                if c.threshold != t.threshold {
                    let threshold = Arg::value(t.threshold.to_string());
                    self.mutate(at, write::SET_THRESHOLD, vec![threshold]);
                }
                if let Some(lower) = self.update_node(&c.lower, &t.lower)? {
                    self.mutate(at, write::SET_LOWER, vec![lower.into()]);
                }
                if let Some(upper) = self.update_node(&c.upper, &t.upper)? {
                    self.mutate(at, write::SET_UPPER, vec![upper.into()]);
                }
            }
            (M::InterchainGasPaymaster(c), M::InterchainGasPaymaster(t)) => {
                if c.beneficiary != t.beneficiary {
                    self.mutate(at, write::SET_BENEFICIARY, vec![Arg::known(t.beneficiary)]);
                }
                for domain in union_keys(&c.per_destination, &t.per_destination) {
                    match (c.per_destination.get(&domain), t.per_destination.get(&domain)) {
                        (current, Some(oracle)) if current != Some(oracle) => self.mutate(
                            at,
                            write::SET_DESTINATION_GAS_CONFIG,
                            vec![Arg::value(domain), Arg::value(serde_json::to_value(oracle)?)],
                        ),
                        (Some(_), None) => {
                            let args = vec![Arg::value(domain)];
                            self.mutate(at, write::REMOVE_DESTINATION_GAS_CONFIG, args)
                        }
                        _ => {}
                    }
                }
                self.update_owner(at, c.owner, t.owner);
            }
            (M::ProtocolFee(c), M::ProtocolFee(t)) => {
                // maxFee is fixed at construction
                if c.max_fee != t.max_fee {
                    return self.create_node(target).map(Some);
                }
                if c.beneficiary != t.beneficiary {
                    self.mutate(at, write::SET_BENEFICIARY, vec![Arg::known(t.beneficiary)]);
                }
                if c.fee != t.fee {
                    self.mutate(at, write::SET_PROTOCOL_FEE, vec![Arg::value(t.fee.to_string())]);
                }
                self.update_owner(at, c.owner, t.owner);
            }
            (M::Pausable(c), M::Pausable(t)) => {
                if c.paused != t.paused {
                    let call = if t.paused { write::PAUSE } else { write::UNPAUSE };
                    self.mutate(at, call, vec![]);
                }
                self.update_owner(at, c.owner, t.owner);
            }
            _ => {
                return Err(Error::invariant(format!(
                    "no in-place rule for mutable kind {}",
                    target.kind_name()
                )));
            }
        }
        Ok(None)
    }

    fn update_routes(
        &mut self,
        at: AddressRef,
        current: &BTreeMap<DomainId, ModuleConfig>,
        target: &BTreeMap<DomainId, ModuleConfig>,
    ) -> Result<()> {
        for domain in union_keys(current, target) {
            let moved = match (current.get(&domain), target.get(&domain)) {
                (None, Some(t)) => Some(self.create_node(t)?),
                (Some(c), Some(t)) => self.update_node(c, t)?,
                (Some(_), None) => {
                    self.mutate(at, write::REMOVE, vec![Arg::value(domain)]);
                    None
                }
                (None, None) => None,
            };
            if let Some(child) = moved {
                self.mutate(at, write::SET, vec![Arg::value(domain), child.into()]);
            }
        }
        Ok(())
    }

    fn update_owner(&mut self, at: AddressRef, current: Address, target: Address) {
        if current != target {
            self.builder
                .defer(at, write::TRANSFER_OWNERSHIP, vec![Arg::known(target)]);
        }
    }
}

fn gas_configs(per_destination: &BTreeMap<DomainId, GasOracleConfig>) -> Result<Value> {
    let entries = per_destination
        .iter()
        .map(|(domain, oracle)| Ok((domain.to_string(), serde_json::to_value(oracle)?)))
        .collect::<Result<serde_json::Map<_, _>>>()?;
    Ok(Value::Object(entries))
}

fn union_keys<A, B>(a: &BTreeMap<DomainId, A>, b: &BTreeMap<DomainId, B>) -> Vec<DomainId> {
    let mut keys: Vec<DomainId> = a.keys().chain(b.keys()).copied().collect();
    keys.sort_unstable();
    keys.dedup();
    keys
}

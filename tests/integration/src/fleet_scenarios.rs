//! Fleet-level scenarios
//!
//! Each test drives deployer, checker and reconciler together against one
//! simulated fleet, the way an operator run would.

use std::collections::BTreeMap;
use std::sync::Arc;

use fleet_chain::abi::write;
use fleet_chain::{EndpointId, FactoryCache};
use fleet_core::state::names;
use fleet_core::{
    ChainContext, DeployedAddressMap, FleetChecker, FleetDeployer, FleetDeployment, LedgerFile,
    ModuleReader, ModuleReconciler, ParentSlot,
};
use fleet_meta::{AggregationConfig, FleetConfig, ModuleConfig};
use fleet_test_utils::{
    FLEET_OWNER, SimulatedChain, endpoint_config, fast_retry, fleet_config, simple_ism, validators,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

// =============================================================================
// Test Infrastructure
// =============================================================================

fn id(name: &str) -> EndpointId {
    EndpointId::new(name)
}

fn three_endpoints() -> FleetConfig {
    fleet_config([
        ("alpha", endpoint_config(1000, simple_ism(1))),
        ("beta", endpoint_config(2000, simple_ism(2))),
        ("gamma", endpoint_config(3000, simple_ism(3))),
    ])
}

fn address_maps(deployment: &FleetDeployment) -> BTreeMap<EndpointId, DeployedAddressMap> {
    deployment
        .states
        .iter()
        .map(|(id, state)| (id.clone(), state.contracts.clone()))
        .collect()
}

/// A fleet plus the shared pieces one operator run would hold
struct Fleet {
    sim: Arc<SimulatedChain>,
    config: FleetConfig,
    factories: Arc<FactoryCache>,
}

impl Fleet {
    fn new(sim: SimulatedChain, config: FleetConfig) -> Self {
        fleet_core::logging::init_for_tests();
        Self {
            sim: Arc::new(sim),
            config,
            factories: Arc::new(FactoryCache::new()),
        }
    }

    fn deployer(&self) -> FleetDeployer {
        FleetDeployer::new(self.config.clone(), self.sim.clone(), self.sim.signer())
            .with_factories(self.factories.clone())
    }

    fn checker(&self, deployment: &FleetDeployment) -> FleetChecker {
        FleetChecker::new(self.config.clone(), self.sim.clone(), address_maps(deployment))
            .with_factories(self.factories.clone())
    }

    fn context(&self, endpoint: &str) -> ChainContext {
        let metadata = self.config.endpoints[endpoint].metadata(endpoint);
        ChainContext::new(metadata, self.sim.clone(), self.sim.signer())
            .with_factories(self.factories.clone())
            .with_retry(fast_retry())
    }
}

// =============================================================================
// Partial failure and resumption
// =============================================================================

mod resumption_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn failing_endpoint_leaves_siblings_complete_and_resumes_from_ledger() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deployments.toml");
        let fleet = Fleet::new(SimulatedChain::new(), three_endpoints());
        fleet.sim.fail_deploys_of(&id("beta"), "staticThresholdMultisig");

        let ledger = Arc::new(LedgerFile::open(&path).unwrap());
        let first = fleet
            .deployer()
            .with_checkpoints(ledger)
            .deploy(BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(first.succeeded().collect::<Vec<_>>(), vec![&id("alpha"), &id("gamma")]);
        let failed: Vec<_> = first.failed().map(|(id, _)| id.clone()).collect();
        assert_eq!(failed, vec![id("beta")]);

        let beta = &first.states[&id("beta")];
        assert!(beta.starting_block.is_some());
        assert!(beta.contract(names::PROXY_ADMIN).is_some());
        assert!(beta.contract(names::INTERCHAIN_GAS_PAYMASTER).is_some());
        assert!(beta.contract(names::DEFAULT_ISM).is_none());
        assert!(beta.contract(names::MAILBOX).is_none());

        // the operator fixes the endpoint and reruns from the saved ledger
        fleet.sim.clear_deploy_failures(&id("beta"));
        let alpha_deploys = fleet.sim.deploy_count(&id("alpha"));
        let reopened = Arc::new(LedgerFile::open(&path).unwrap());
        let partial = reopened.snapshot().states();
        assert_eq!(partial.len(), 3);

        let second = fleet
            .deployer()
            .with_checkpoints(reopened)
            .deploy(partial)
            .await
            .unwrap();
        assert!(second.is_complete());
        assert_eq!(fleet.sim.deploy_count(&id("alpha")), alpha_deploys);
        assert_eq!(
            second.states[&id("beta")].address(names::PROXY_ADMIN),
            beta.address(names::PROXY_ADMIN)
        );

        let report = fleet.checker(&second).check_all().await.unwrap();
        assert!(report.is_clean(), "{:?}", report.violations);
        assert_eq!(report.endpoints.len(), 3);
    }
}

// =============================================================================
// Module trees through the whole stack
// =============================================================================

mod module_tree_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn identical_aggregation_children_get_their_own_deployments() {
        let child = ModuleConfig::static_multisig(validators(&[1, 2]), 2);
        let ism = ModuleConfig::Aggregation(AggregationConfig {
            children: vec![child.clone(), child],
            threshold: 2,
            address: None,
        });
        let fleet = Fleet::new(
            SimulatedChain::new(),
            fleet_config([("alpha", endpoint_config(1000, ism))]),
        );

        let deployment = fleet.deployer().deploy(BTreeMap::new()).await.unwrap();
        assert!(deployment.is_complete());

        let root = deployment.states[&id("alpha")].address(names::DEFAULT_ISM).unwrap();
        let derived = ModuleReader::new(fleet.context("alpha")).derive(root).await.unwrap();
        let children: Vec<_> = derived.children().iter().map(|c| c.deployed_address()).collect();
        assert_eq!(children.len(), 2);
        assert_ne!(children[0], children[1]);

        let report = fleet.checker(&deployment).check_all().await.unwrap();
        assert!(report.is_clean(), "{:?}", report.violations);
    }

    #[tokio::test]
    async fn drifted_default_ism_is_reported_then_reconciled() {
        // signing as the configured owner keeps the mailbox writable after deploy
        let mut fleet = Fleet::new(
            SimulatedChain::with_signer(FLEET_OWNER),
            fleet_config([(
                "alpha",
                endpoint_config(1000, ModuleConfig::static_multisig(validators(&[1, 2]), 1)),
            )]),
        );
        let deployment = fleet.deployer().deploy(BTreeMap::new()).await.unwrap();
        let state = &deployment.states[&id("alpha")];

        let target = ModuleConfig::static_multisig(validators(&[1, 2, 3]), 2);
        fleet.config.endpoints.get_mut("alpha").unwrap().default_ism = target.clone();

        let before = fleet.checker(&deployment).check_all().await.unwrap();
        let kinds: Vec<_> = before.violations.iter().map(|v| v.kind()).collect();
        assert_eq!(kinds, vec!["ModuleConsistency/DefaultIsm"]);

        let mailbox = state.address(names::MAILBOX).unwrap();
        let root = state.address(names::DEFAULT_ISM).unwrap();
        let mut reconciler = ModuleReconciler::for_root(fleet.context("alpha"), root)
            .with_parent(ParentSlot::new(mailbox, write::SET_DEFAULT_ISM));
        let plan = reconciler.update(&target).await.unwrap();
        assert_eq!(plan.deploys().count(), 1);
        assert_eq!(plan.mutations().count(), 1);
        reconciler.apply(&plan).await.unwrap();

        let after = fleet.checker(&deployment).check_all().await.unwrap();
        assert!(after.is_clean(), "{:?}", after.violations);
        assert!(reconciler.update(&target).await.unwrap().is_empty());
    }
}

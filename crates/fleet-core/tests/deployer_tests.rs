//! Tests for resumable per-endpoint deployment

use std::collections::BTreeMap;
use std::sync::Arc;

use fleet_chain::EndpointId;
use fleet_core::state::{names, registrations};
use fleet_core::{DeploymentLedger, Error, FleetDeployer, LedgerFile};
use fleet_meta::{FleetConfig, ModuleConfig};
use fleet_test_utils::{
    FLEET_OWNER, SIM_SIGNER, SimulatedChain, addr, endpoint_config, fleet_config, simple_ism,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::tempdir;

fn alpha() -> EndpointId {
    EndpointId::new("alpha")
}

fn single() -> FleetConfig {
    fleet_config([("alpha", endpoint_config(1000, simple_ism(1)))])
}

fn deployer(sim: &Arc<SimulatedChain>, config: FleetConfig) -> FleetDeployer {
    FleetDeployer::new(config, sim.clone(), SIM_SIGNER)
}

mod deploy_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn fresh_endpoint_gets_every_core_contract() {
        let sim = Arc::new(SimulatedChain::new());
        let deployment = deployer(&sim, single()).deploy(BTreeMap::new()).await.unwrap();
        assert!(deployment.is_complete());

        let state = &deployment.states[&alpha()];
        assert_eq!(state.starting_block, Some(100));
        for name in [
            names::PROXY_ADMIN,
            names::INTERCHAIN_GAS_PAYMASTER,
            names::DEFAULT_ISM,
            names::MAILBOX,
            names::VALIDATOR_ANNOUNCE,
        ] {
            assert!(state.contract(name).is_some(), "{name} missing");
        }
        assert!(state.contract(names::REQUIRED_HOOK).is_none());
        assert!(state.is_registered(registrations::MAILBOX));

        let mailbox = sim.contract(&alpha(), state.address(names::MAILBOX).unwrap()).unwrap();
        assert_eq!(mailbox.state["defaultIsm"], json!(state.address(names::DEFAULT_ISM).unwrap()));
        assert_eq!(
            mailbox.state["requiredHook"],
            json!(state.address(names::INTERCHAIN_GAS_PAYMASTER).unwrap())
        );
        assert_eq!(mailbox.state["admin"], json!(state.address(names::PROXY_ADMIN).unwrap()));

        for name in names::OWNABLE {
            let contract = sim.contract(&alpha(), state.address(name).unwrap()).unwrap();
            assert_eq!(contract.state["owner"], json!(FLEET_OWNER), "{name}");
        }
    }

    #[tokio::test]
    async fn rerun_with_complete_state_deploys_nothing() {
        let sim = Arc::new(SimulatedChain::new());
        let deployer = deployer(&sim, single());
        let first = deployer.deploy(BTreeMap::new()).await.unwrap();
        let deploys = sim.deploy_count(&alpha());
        let submitted = sim.submitted(&alpha()).len();

        let second = deployer.deploy(first.states.clone()).await.unwrap();
        assert!(second.is_complete());
        assert_eq!(sim.deploy_count(&alpha()), deploys);
        assert_eq!(sim.submitted(&alpha()).len(), submitted);
        assert_eq!(second.states, first.states);
    }

    #[tokio::test]
    async fn failed_step_keeps_progress_and_resumes() {
        let sim = Arc::new(SimulatedChain::new());
        sim.fail_deploys_of(&alpha(), "staticThresholdMultisig");
        let deployer = deployer(&sim, single());

        let partial = deployer.deploy(BTreeMap::new()).await.unwrap();
        assert!(!partial.is_complete());
        let (_, err) = partial.failed().next().unwrap();
        assert!(
            matches!(err, Error::Step { step, .. } if step == names::DEFAULT_ISM),
            "got {err:?}"
        );
        let state = &partial.states[&alpha()];
        assert!(state.starting_block.is_some());
        assert!(state.contract(names::PROXY_ADMIN).is_some());
        assert!(state.contract(names::INTERCHAIN_GAS_PAYMASTER).is_some());
        assert!(state.contract(names::DEFAULT_ISM).is_none());

        sim.clear_deploy_failures(&alpha());
        let resumed = deployer.deploy(partial.states.clone()).await.unwrap();
        assert!(resumed.is_complete());
        let resumed_state = &resumed.states[&alpha()];
        assert_eq!(
            resumed_state.address(names::PROXY_ADMIN),
            state.address(names::PROXY_ADMIN)
        );
        assert_eq!(resumed_state.starting_block, state.starting_block);
        assert_eq!(sim.contracts_of_kind(&alpha(), "proxyAdmin").len(), 1);
        assert_eq!(sim.contracts_of_kind(&alpha(), "mailbox").len(), 2);
    }

    #[tokio::test]
    async fn explicit_required_hook_is_deployed_and_wired() {
        let sim = Arc::new(SimulatedChain::new());
        let mut endpoint = endpoint_config(1000, simple_ism(1));
        endpoint.required_hook = Some(ModuleConfig::merkle_tree_hook());

        let deployment = deployer(&sim, fleet_config([("alpha", endpoint)]))
            .deploy(BTreeMap::new())
            .await
            .unwrap();
        let state = &deployment.states[&alpha()];
        let hook = state.address(names::REQUIRED_HOOK).unwrap();
        let mailbox = sim.contract(&alpha(), state.address(names::MAILBOX).unwrap()).unwrap();
        assert_eq!(mailbox.state["requiredHook"], json!(hook));
        assert_eq!(state.contract(names::REQUIRED_HOOK).unwrap().kind, "merkleTreeHook");
    }

    #[tokio::test]
    async fn removed_endpoints_are_not_deployed() {
        let sim = Arc::new(SimulatedChain::new());
        let mut retired = endpoint_config(2000, simple_ism(2));
        retired.remove = true;
        let config = fleet_config([
            ("alpha", endpoint_config(1000, simple_ism(1))),
            ("retired", retired),
        ]);

        let deployment = deployer(&sim, config).deploy(BTreeMap::new()).await.unwrap();
        assert_eq!(deployment.succeeded().collect::<Vec<_>>(), vec![&alpha()]);
        assert_eq!(sim.deploy_count(&EndpointId::new("retired")), 0);
    }

    #[tokio::test]
    async fn unreachable_endpoint_does_not_stop_siblings() {
        let sim = Arc::new(SimulatedChain::new());
        let beta = EndpointId::new("beta");
        sim.set_unavailable(&beta, true);
        let config = fleet_config([
            ("alpha", endpoint_config(1000, simple_ism(1))),
            ("beta", endpoint_config(2000, simple_ism(2))),
        ]);

        let deployment = deployer(&sim, config).deploy(BTreeMap::new()).await.unwrap();
        assert!(deployment.results[&alpha()].is_ok());
        let err = deployment.results[&beta].as_ref().unwrap_err();
        assert!(err.is_endpoint_unavailable(), "got {err:?}");
        assert!(deployment.states[&beta].is_empty());
    }

    #[tokio::test]
    async fn malformed_config_is_rejected_before_any_submission() {
        let sim = Arc::new(SimulatedChain::new());
        let config = fleet_config([
            ("alpha", endpoint_config(1000, simple_ism(1))),
            ("beta", endpoint_config(2000, ModuleConfig::static_multisig(vec![addr(2)], 0))),
        ]);

        let err = deployer(&sim, config).deploy(BTreeMap::new()).await.unwrap_err();
        match err {
            Error::Meta(fleet_meta::Error::ConfigValidation { path, .. }) => {
                assert_eq!(path, "endpoints.beta.default_ism.threshold")
            }
            other => panic!("expected a config validation error, got {other:?}"),
        }
        assert!(sim.submitted(&alpha()).is_empty());
    }
}

mod checkpoint_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn every_completed_step_reaches_the_ledger() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deployments.toml");
        let sim = Arc::new(SimulatedChain::new());
        sim.fail_deploys_of(&alpha(), "mailbox");

        let ledger = Arc::new(LedgerFile::open(&path).unwrap());
        let deployment = deployer(&sim, single())
            .with_checkpoints(ledger.clone())
            .deploy(BTreeMap::new())
            .await
            .unwrap();
        assert!(!deployment.is_complete());

        let saved = DeploymentLedger::load(&path).unwrap();
        let state = saved.state(&alpha()).unwrap();
        assert!(state.updated_at.is_some());
        assert_eq!(state.contracts, deployment.states[&alpha()].contracts);
        assert!(state.contract(names::DEFAULT_ISM).is_some());
        assert!(state.contract(names::MAILBOX).is_none());
    }

    #[tokio::test]
    async fn reopened_ledger_resumes_the_run() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deployments.toml");
        let sim = Arc::new(SimulatedChain::new());
        sim.fail_deploys_of(&alpha(), "validatorAnnounce");

        let first = Arc::new(LedgerFile::open(&path).unwrap());
        deployer(&sim, single())
            .with_checkpoints(first)
            .deploy(BTreeMap::new())
            .await
            .unwrap();
        sim.clear_deploy_failures(&alpha());
        let before = sim.deploy_count(&alpha());

        let reopened = Arc::new(LedgerFile::open(&path).unwrap());
        let partial = reopened.snapshot().states();
        let deployment = deployer(&sim, single())
            .with_checkpoints(reopened)
            .deploy(partial)
            .await
            .unwrap();
        assert!(deployment.is_complete());
        assert_eq!(sim.deploy_count(&alpha()), before + 1);
    }
}

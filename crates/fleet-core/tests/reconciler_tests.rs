//! Tests for module creation and update planning against the simulator

use std::collections::BTreeMap;
use std::sync::Arc;

use fleet_chain::abi::write;
use fleet_chain::{Address, EndpointId, FactoryBindings, ProtocolKind};
use fleet_core::{
    AddressRef, Arg, ChainContext, Error, ModuleReader, ModuleReconciler, Operation, ParentSlot,
};
use fleet_meta::{
    AggregationConfig, Amount, GasOracleConfig, InterchainGasPaymasterConfig, ModuleConfig,
    PausableConfig, ProtocolFeeConfig, RoutingConfig,
};
use fleet_test_utils::{
    FLEET_OWNER, SIM_SIGNER, SimulatedChain, addr, fast_retry, metadata, validators,
};
use pretty_assertions::assert_eq;
use serde_json::json;

const DOMAIN: u32 = 1000;

fn alpha() -> EndpointId {
    EndpointId::new("alpha")
}

fn context(sim: &Arc<SimulatedChain>) -> ChainContext {
    ChainContext::new(metadata("alpha", DOMAIN), sim.clone(), sim.signer()).with_retry(fast_retry())
}

fn labels(plan: &fleet_core::ReconciliationPlan) -> Vec<&str> {
    plan.operations.iter().map(|op| op.label()).collect()
}

fn oracle(rate: u64) -> GasOracleConfig {
    GasOracleConfig {
        exchange_rate: Amount::from(rate),
        gas_price: Amount::from(7u64),
        overhead: 50_000,
    }
}

fn routing(owner: Address, routes: impl IntoIterator<Item = (u32, ModuleConfig)>) -> ModuleConfig {
    ModuleConfig::Routing(RoutingConfig {
        owner,
        routes: routes.into_iter().collect(),
        address: None,
    })
}

async fn created(sim: &Arc<SimulatedChain>, config: &ModuleConfig) -> ModuleReconciler {
    let mut reconciler = ModuleReconciler::new(context(sim));
    reconciler.create(config).await.expect("create should succeed");
    reconciler
}

mod create_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn identical_children_are_deployed_separately() {
        let sim = Arc::new(SimulatedChain::new());
        let child = ModuleConfig::static_multisig(validators(&[1]), 1);
        let config = ModuleConfig::Aggregation(AggregationConfig {
            children: vec![child.clone(), child],
            threshold: 1,
            address: None,
        });

        let reconciler = created(&sim, &config).await;
        let root = reconciler.root().unwrap();

        let derived = ModuleReader::new(context(&sim)).derive(root).await.unwrap();
        let ModuleConfig::Aggregation(aggregation) = derived else {
            panic!("expected an aggregation, got {derived:?}");
        };
        let children: Vec<Address> = aggregation
            .children
            .iter()
            .map(|c| c.deployed_address().unwrap())
            .collect();
        assert_eq!(children.len(), 2);
        assert_ne!(children[0], children[1]);
        assert_eq!(sim.deploy_count(&alpha()), 3);
    }

    #[tokio::test]
    async fn static_kinds_carry_the_endpoint_factory() {
        let sim = Arc::new(SimulatedChain::new());
        let reconciler = ModuleReconciler::new(context(&sim));
        let plan = reconciler
            .plan_create(&ModuleConfig::static_multisig(validators(&[1, 2]), 2))
            .await
            .unwrap();

        let expected =
            FactoryBindings::derive(ProtocolKind::Ethereum, DOMAIN as u64).static_multisig;
        let Operation::Deploy(deploy) = &plan.operations[0] else {
            panic!("expected a deploy");
        };
        let Arg::Map(args) = &deploy.constructor_args else {
            panic!("expected map constructor args");
        };
        assert_eq!(args["factory"], Arg::known(expected));
        assert_eq!(plan.new_root, Some(AddressRef::Deployed(0)));
    }

    #[tokio::test]
    async fn ownable_modules_are_handed_to_their_owner_last() {
        let sim = Arc::new(SimulatedChain::new());
        let config = ModuleConfig::Pausable(PausableConfig {
            owner: FLEET_OWNER,
            paused: true,
            address: None,
        });

        let reconciler = created(&sim, &config).await;
        let contract = sim.contract(&alpha(), reconciler.root().unwrap()).unwrap();
        assert_eq!(contract.state["owner"], json!(FLEET_OWNER));
        assert_eq!(contract.state["paused"], json!(true));
        assert_eq!(
            sim.submitted(&alpha()).last().map(|c| c.label()),
            Some(write::TRANSFER_OWNERSHIP)
        );
    }

    #[tokio::test]
    async fn opaque_root_deploys_nothing() {
        let sim = Arc::new(SimulatedChain::new());
        let mut reconciler = ModuleReconciler::new(context(&sim));
        let root = reconciler.create(&ModuleConfig::opaque(addr(77))).await.unwrap();
        assert_eq!(root, addr(77));
        assert_eq!(sim.deploy_count(&alpha()), 0);
    }
}

mod update_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn threshold_change_redeploys_and_repoints_the_mailbox() {
        let sim = Arc::new(SimulatedChain::new());
        let current = ModuleConfig::static_multisig(validators(&[1, 2]), 1);
        let old_root = created(&sim, &current).await.root().unwrap();
        let mailbox = sim.install(
            &alpha(),
            "mailbox",
            json!({ "owner": SIM_SIGNER, "defaultIsm": old_root }),
        );

        let mut reconciler = ModuleReconciler::for_root(context(&sim), old_root)
            .with_parent(ParentSlot::new(mailbox, write::SET_DEFAULT_ISM));
        let target = ModuleConfig::static_multisig(validators(&[2, 1]), 2);

        let plan = reconciler.update(&target).await.unwrap();
        assert_eq!(labels(&plan), vec!["staticThresholdMultisig", write::SET_DEFAULT_ISM]);
        let Operation::Mutate(repoint) = &plan.operations[1] else {
            panic!("expected the repoint last");
        };
        assert_eq!(repoint.target, AddressRef::Known(mailbox));
        assert_eq!(repoint.args, vec![Arg::Address(AddressRef::Deployed(0))]);

        let applied = reconciler.apply(&plan).await.unwrap();
        let new_root = applied.new_root.unwrap();
        assert_ne!(new_root, old_root);
        assert_eq!(reconciler.root(), Some(new_root));
        assert_eq!(
            sim.contract(&alpha(), mailbox).unwrap().state["defaultIsm"],
            json!(new_root)
        );

        assert!(reconciler.update(&target).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn matching_tree_plans_nothing() {
        let sim = Arc::new(SimulatedChain::new());
        let route = ModuleConfig::static_multisig(validators(&[3, 1]), 1);
        let config = routing(FLEET_OWNER, [(5, route)]);
        let reconciler = created(&sim, &config).await;
        let submitted = sim.submitted(&alpha()).len();

        assert!(reconciler.update(&config).await.unwrap().is_empty());
        assert_eq!(sim.submitted(&alpha()).len(), submitted);
    }

    #[tokio::test]
    async fn gas_oracle_changes_are_patched_per_destination() {
        let sim = Arc::new(SimulatedChain::new());
        let igp = |per_destination: BTreeMap<u32, GasOracleConfig>| {
            ModuleConfig::InterchainGasPaymaster(InterchainGasPaymasterConfig {
                owner: SIM_SIGNER,
                beneficiary: addr(9),
                per_destination,
                address: None,
            })
        };
        let mut reconciler = created(&sim, &igp([(1, oracle(10)), (2, oracle(20))].into())).await;

        let target = igp([(1, oracle(11)), (3, oracle(30))].into());
        let plan = reconciler.update(&target).await.unwrap();
        assert_eq!(
            labels(&plan),
            vec![
                write::SET_DESTINATION_GAS_CONFIG,
                write::REMOVE_DESTINATION_GAS_CONFIG,
                write::SET_DESTINATION_GAS_CONFIG,
            ]
        );
        assert_eq!(plan.deploys().count(), 0);
        assert_eq!(plan.new_root, None);

        reconciler.apply(&plan).await.unwrap();
        assert!(reconciler.update(&target).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn child_redeploy_is_scoped_and_ownership_moves_last() {
        let sim = Arc::new(SimulatedChain::new());
        let current = routing(
            SIM_SIGNER,
            [
                (5, ModuleConfig::static_multisig(validators(&[1, 2]), 1)),
                (6, ModuleConfig::static_multisig(validators(&[4]), 1)),
            ],
        );
        let mut reconciler = created(&sim, &current).await;
        let root = reconciler.root().unwrap();

        let target = routing(
            FLEET_OWNER,
            [
                (5, ModuleConfig::static_multisig(validators(&[1, 2]), 2)),
                (6, ModuleConfig::static_multisig(validators(&[4]), 1)),
            ],
        );
        let plan = reconciler.update(&target).await.unwrap();
        assert_eq!(
            labels(&plan),
            vec!["staticThresholdMultisig", write::SET, write::TRANSFER_OWNERSHIP]
        );
        assert_eq!(plan.new_root, None);

        reconciler.apply(&plan).await.unwrap();
        assert_eq!(reconciler.root(), Some(root));
        assert!(reconciler.update(&target).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropped_routes_are_removed() {
        let sim = Arc::new(SimulatedChain::new());
        let ism = || ModuleConfig::static_multisig(validators(&[1]), 1);
        let mut reconciler = created(&sim, &routing(SIM_SIGNER, [(5, ism()), (6, ism())])).await;

        let target = routing(SIM_SIGNER, [(5, ism())]);
        let plan = reconciler.update(&target).await.unwrap();
        assert_eq!(labels(&plan), vec![write::REMOVE]);

        reconciler.apply(&plan).await.unwrap();
        assert!(reconciler.update(&target).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn protocol_fee_max_change_forces_redeploy() {
        let sim = Arc::new(SimulatedChain::new());
        let fee = |max_fee: u64, fee: u64| {
            ModuleConfig::ProtocolFee(ProtocolFeeConfig {
                owner: SIM_SIGNER,
                beneficiary: addr(3),
                max_fee: max_fee.into(),
                fee: fee.into(),
                address: None,
            })
        };
        let reconciler = created(&sim, &fee(100, 10)).await;

        let in_place = reconciler.update(&fee(100, 20)).await.unwrap();
        assert_eq!(labels(&in_place), vec![write::SET_PROTOCOL_FEE]);

        let redeploy = reconciler.update(&fee(200, 20)).await.unwrap();
        assert_eq!(labels(&redeploy), vec!["protocolFee"]);
        assert_eq!(redeploy.new_root, Some(AddressRef::Deployed(0)));
    }

    #[tokio::test]
    async fn pinned_address_is_repointed_without_deploying() {
        let sim = Arc::new(SimulatedChain::new());
        let root = created(&sim, &ModuleConfig::static_multisig(validators(&[1]), 1))
            .await
            .root()
            .unwrap();
        let mailbox = sim.install(
            &alpha(),
            "mailbox",
            json!({ "owner": SIM_SIGNER, "defaultIsm": root }),
        );
        let reconciler = ModuleReconciler::for_root(context(&sim), root)
            .with_parent(ParentSlot::new(mailbox, write::SET_DEFAULT_ISM));

        let plan = reconciler.update(&ModuleConfig::opaque(addr(77))).await.unwrap();
        assert_eq!(labels(&plan), vec![write::SET_DEFAULT_ISM]);
        assert_eq!(plan.new_root, Some(AddressRef::Known(addr(77))));
    }

    #[tokio::test]
    async fn hook_cannot_become_a_security_module() {
        let sim = Arc::new(SimulatedChain::new());
        let reconciler = created(&sim, &ModuleConfig::merkle_tree_hook()).await;

        let err = reconciler
            .update(&ModuleConfig::static_multisig(validators(&[1]), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedTransition { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn undecodable_root_is_replaced() {
        let sim = Arc::new(SimulatedChain::new());
        let mystery = sim.install(&alpha(), "futureModule", json!({}));
        let reconciler = ModuleReconciler::for_root(context(&sim), mystery);

        let plan = reconciler.update(&ModuleConfig::merkle_tree_hook()).await.unwrap();
        assert_eq!(labels(&plan), vec!["merkleTreeHook"]);
    }

    #[tokio::test]
    async fn missing_root_plans_a_create() {
        let sim = Arc::new(SimulatedChain::new());
        let mut reconciler = ModuleReconciler::new(context(&sim));
        let target = ModuleConfig::static_multisig(validators(&[1]), 1);

        let applied = reconciler.converge(&target).await.unwrap();
        assert!(applied.new_root.is_some());
        assert!(reconciler.update(&target).await.unwrap().is_empty());
    }
}

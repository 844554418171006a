//! Tests for deriving module trees from simulated endpoints

use std::sync::Arc;

use fleet_chain::EndpointId;
use fleet_core::{ChainContext, Error, ModuleReader, ModuleReconciler};
use fleet_meta::{
    Amount, AmountRoutingConfig, FallbackRoutingConfig, GasOracleConfig,
    InterchainGasPaymasterConfig, ModuleConfig, WeightedMultisigConfig, WeightedValidator,
    normalize, strip_addresses,
};
use fleet_test_utils::{
    FLEET_OWNER, SIM_SIGNER, SimulatedChain, addr, fast_retry, metadata, validators,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn alpha() -> EndpointId {
    EndpointId::new("alpha")
}

fn context(sim: &Arc<SimulatedChain>) -> ChainContext {
    ChainContext::new(metadata("alpha", 1000), sim.clone(), sim.signer()).with_retry(fast_retry())
}

async fn deploy(sim: &Arc<SimulatedChain>, config: &ModuleConfig) -> fleet_chain::Address {
    ModuleReconciler::new(context(sim))
        .create(config)
        .await
        .expect("create should succeed")
}

mod derive_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn nested_composites_read_back_as_configured() {
        let sim = Arc::new(SimulatedChain::new());
        let config = ModuleConfig::FallbackRouting(FallbackRoutingConfig {
            owner: FLEET_OWNER,
            routes: [
                (10, ModuleConfig::static_multisig(validators(&[3, 1, 2]), 2)),
                (
                    20,
                    ModuleConfig::AmountRouting(AmountRoutingConfig {
                        threshold: Amount::from(1_000u64),
                        lower: Box::new(ModuleConfig::static_multisig(validators(&[4]), 1)),
                        upper: Box::new(ModuleConfig::WeightedMultisig(WeightedMultisigConfig {
                            validators: vec![
                                WeightedValidator { address: addr(6), weight: 40 },
                                WeightedValidator { address: addr(5), weight: 60 },
                            ],
                            threshold_weight: 60,
                            address: None,
                        })),
                        address: None,
                    }),
                ),
            ]
            .into_iter()
            .collect(),
            fallback: Box::new(ModuleConfig::static_multisig(validators(&[9]), 1)),
            address: None,
        });
        let root = deploy(&sim, &config).await;

        let derived = ModuleReader::new(context(&sim)).derive(root).await.unwrap();
        assert_eq!(derived.deployed_address(), Some(root));
        assert!(derived.children().iter().all(|c| c.deployed_address().is_some()));
        assert_eq!(strip_addresses(&derived), normalize(&config).unwrap());
    }

    #[tokio::test]
    async fn gas_oracles_are_read_per_destination() {
        let sim = Arc::new(SimulatedChain::new());
        let oracle = GasOracleConfig {
            exchange_rate: Amount::from(10_000_000_000u64),
            gas_price: Amount::from(3u64),
            overhead: 80_000,
        };
        let config = ModuleConfig::InterchainGasPaymaster(InterchainGasPaymasterConfig {
            owner: SIM_SIGNER,
            beneficiary: addr(8),
            per_destination: [(2000, oracle.clone()), (3000, oracle)].into(),
            address: None,
        });
        let root = deploy(&sim, &config).await;

        let derived = ModuleReader::new(context(&sim)).derive(root).await.unwrap();
        assert_eq!(strip_addresses(&derived), config);
    }

    #[tokio::test]
    async fn unknown_kind_is_undecodable_when_strict() {
        let sim = Arc::new(SimulatedChain::new());
        let mystery = sim.install(&alpha(), "futureModule", json!({}));

        let err = ModuleReader::new(context(&sim)).derive(mystery).await.unwrap_err();
        assert!(matches!(err, Error::UndecodableModule { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn unknown_child_becomes_opaque_when_lenient() {
        let sim = Arc::new(SimulatedChain::new());
        let known = deploy(&sim, &ModuleConfig::static_multisig(validators(&[1]), 1)).await;
        let mystery = sim.install(&alpha(), "futureModule", json!({}));
        let root = sim.install(
            &alpha(),
            "aggregation",
            json!({ "modules": [mystery, known], "threshold": 1 }),
        );

        let reader = ModuleReader::new(context(&sim));
        assert!(reader.derive(root).await.is_err());

        let ModuleConfig::Aggregation(derived) = reader.derive_lenient(root).await.unwrap() else {
            panic!("root kind changed");
        };
        assert_eq!(derived.children[0], ModuleConfig::opaque(mystery));
        assert_eq!(derived.children[1].deployed_address(), Some(known));
    }
}

mod transport_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let sim = Arc::new(SimulatedChain::new());
        let root = deploy(&sim, &ModuleConfig::merkle_tree_hook()).await;
        sim.fail_reads(&alpha(), 2);

        let derived = ModuleReader::new(context(&sim)).derive(root).await.unwrap();
        assert_eq!(strip_addresses(&derived), ModuleConfig::merkle_tree_hook());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_unavailable() {
        let sim = Arc::new(SimulatedChain::new());
        let root = deploy(&sim, &ModuleConfig::merkle_tree_hook()).await;
        sim.set_unavailable(&alpha(), true);

        let err = ModuleReader::new(context(&sim)).derive(root).await.unwrap_err();
        assert!(err.is_endpoint_unavailable(), "got {err:?}");
        assert!(!err.is_fatal());
    }
}

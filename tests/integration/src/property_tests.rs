use std::sync::Arc;

use fleet_core::{ChainContext, ModuleReader, ModuleReconciler};
use fleet_meta::{ModuleConfig, diff, normalize, strip_addresses};
use fleet_test_utils::synth::{self, deepest_composite};
use fleet_test_utils::{SimulatedChain, fast_retry, metadata};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn normalize_is_idempotent(config in synth::module(3)) {
        let once = normalize(&config).unwrap();
        let twice = normalize(&once).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn normalized_tree_has_no_diff_with_itself(config in synth::module(3)) {
        let normalized = normalize(&config).unwrap();
        prop_assert!(diff(&normalized, &normalized).is_equal());
    }

    #[test]
    fn validator_order_is_irrelevant(
        validators in prop::collection::vec(synth::address(), 1..6),
        threshold in 1u32..2,
    ) {
        let mut reversed = validators.clone();
        reversed.reverse();
        let a = normalize(&ModuleConfig::static_multisig(validators, threshold)).unwrap();
        let b = normalize(&ModuleConfig::static_multisig(reversed, threshold)).unwrap();
        prop_assert!(diff(&a, &b).is_equal());
        prop_assert_eq!(a, b);
    }

    #[test]
    fn synthesis_respects_max_depth(config in synth::module(2)) {
        // root is depth 0
        if let Some(depth) = deepest_composite(&config) {
            prop_assert!(depth < 2, "composite at depth {}", depth);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn created_tree_reads_back_and_needs_no_update(config in synth::module(2)) {
        let expected = normalize(&config).unwrap();
        let (derived, plan) = runtime().block_on(async {
            let sim = Arc::new(SimulatedChain::new());
            let ctx = ChainContext::new(metadata("alpha", 1000), sim.clone(), sim.signer())
                .with_retry(fast_retry());

            let mut reconciler = ModuleReconciler::new(ctx.clone());
            let root = reconciler.create(&config).await.unwrap();
            let derived = ModuleReader::new(ctx).derive(root).await.unwrap();
            let plan = reconciler.update(&config).await.unwrap();
            (derived, plan)
        });

        prop_assert_eq!(strip_addresses(&derived), expected);
        prop_assert!(plan.is_empty(), "unexpected plan {:?}", plan);
    }
}

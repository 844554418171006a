//! Shared test utilities for the module fleet manager workspace.
//!
//! This crate provides fixtures used across crate test suites. It is a
//! dev-dependency only, never published.
//!
//! # Modules
//!
//! - [`sim`]: [`SimulatedChain`], an in-memory [`fleet_chain::Transport`]
//! - [`fixtures`]: deterministic addresses and small fleet configurations
//! - [`synth`]: depth-limited proptest strategies for module trees

pub mod fixtures;
pub mod sim;
pub mod synth;

pub use fixtures::{
    FLEET_OWNER, addr, endpoint_config, fast_retry, fleet_config, metadata, simple_ism, validators,
};
pub use sim::{SIM_SIGNER, SimContract, SimulatedChain};

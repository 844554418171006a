//! Reading, reconciling, checking and deploying module fleets
//!
//! This crate is the top layer of the workspace. It combines the Config
//! Model from `fleet-meta` with the transport seam from `fleet-chain`:
//!
//! - **Module Reader**: [`ModuleReader`] derives module trees from live state
//! - **Module Reconciler**: [`ModuleReconciler`] plans and applies create/update operations
//! - **Fleet Checker**: [`FleetChecker`] reports drift as [`Violation`]s, read-only
//! - **Resumable Deployer**: [`FleetDeployer`] deploys core contracts per endpoint
//! - **Ledger**: [`DeploymentLedger`] persists deployment checkpoints as TOML
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use fleet_core::{FleetDeployer, LedgerFile};
//!
//! let ledger = Arc::new(LedgerFile::open("deployments.toml")?);
//! let partial = ledger.snapshot().states();
//! let deployment = FleetDeployer::new(config, transport, signer)
//!     .with_checkpoints(ledger)
//!     .deploy(partial)
//!     .await?;
//! ```

pub mod checker;
pub mod context;
pub mod deployer;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod reader;
pub mod reconciler;
pub mod state;

pub use checker::{
    BytecodeRules, CheckOptions, CheckReport, EndpointStatus, FleetChecker, StatusBoard,
    Violation, ViolationCategory, ViolationCollector,
};
pub use context::ChainContext;
pub use deployer::{FleetDeployer, FleetDeployment};
pub use error::{Error, Result};
pub use ledger::{CheckpointSink, DeploymentLedger, LedgerFile};
pub use reader::{ModuleReader, project_opaque};
pub use reconciler::{
    AddressRef, AppliedPlan, Arg, DeployOperation, ModuleReconciler, MutateOperation, Operation,
    ParentSlot, PlanExecutor, ReconciliationPlan,
};
pub use state::{DeployedAddressMap, DeployedContract, DeploymentState};

//! Converging deployed module trees to their declared configuration
//!
//! The reconciler never diffs against anything but live state: every
//! [`ModuleReconciler::update`] re-derives the current tree, compares it with
//! the normalized target and plans the smallest set of operations that
//! closes the gap.
//!
//! Plans follow three ordering rules:
//!
//! 1. Children are deployed before anything references them
//! 2. A replaced root is repointed in its parent after its own subtree is ready
//! 3. Ownership transfers run last, so the signer keeps control while mutating

mod plan;
mod planner;

pub use plan::{
    AddressRef, AppliedPlan, Arg, DeployOperation, MutateOperation, Operation, PlanExecutor,
    ReconciliationPlan,
};

use fleet_chain::Address;
use fleet_meta::{ModuleConfig, canonicalize, diff, normalize};

use crate::context::ChainContext;
use crate::error::{Error, Result};
use crate::reader::{ModuleReader, project_opaque};
use planner::Planner;

/// The contract slot that references a reconciled root
///
/// When the root has to be redeployed the plan ends by calling
/// `setter(new_root)` on `address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentSlot {
    pub address: Address,
    pub setter: String,
}

impl ParentSlot {
    pub fn new(address: Address, setter: impl Into<String>) -> Self {
        Self {
            address,
            setter: setter.into(),
        }
    }
}

/// Creates and updates one module tree on one endpoint
#[derive(Debug, Clone)]
pub struct ModuleReconciler {
    ctx: ChainContext,
    root: Option<Address>,
    parent: Option<ParentSlot>,
}

impl ModuleReconciler {
    /// A reconciler with no deployed root yet
    pub fn new(ctx: ChainContext) -> Self {
        Self {
            ctx,
            root: None,
            parent: None,
        }
    }

    /// A reconciler for the tree rooted at `root`
    pub fn for_root(ctx: ChainContext, root: Address) -> Self {
        Self {
            root: Some(root),
            ..Self::new(ctx)
        }
    }

    /// Repoint `parent` whenever the root is replaced
    pub fn with_parent(mut self, parent: ParentSlot) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn root(&self) -> Option<Address> {
        self.root
    }

    pub fn context(&self) -> &ChainContext {
        &self.ctx
    }

    /// Plan a fresh deployment of `config`
    ///
    /// Opaque references plan nothing; the plan's root is the referenced
    /// address.
    pub async fn plan_create(&self, config: &ModuleConfig) -> Result<ReconciliationPlan> {
        let config = normalize(config)?;
        let mut planner = Planner::new(self.ctx.signer, self.ctx.factories().await?);
        let root = planner.create_node(&config)?;
        Ok(planner.finish(Some(root)))
    }

    /// Deploy `config` and make it the reconciled root
    pub async fn create(&mut self, config: &ModuleConfig) -> Result<Address> {
        let plan = self.plan_create(config).await?;
        let applied = self.apply(&plan).await?;
        applied
            .new_root
            .ok_or_else(|| Error::invariant("create plan produced no root"))
    }

    /// Plan the operations that converge the deployed root to `target`
    ///
    /// Read-only. Returns an empty plan when the live tree already matches.
    /// Without a root the plan creates the tree and repoints the parent.
    pub async fn update(&self, target: &ModuleConfig) -> Result<ReconciliationPlan> {
        let target = normalize(target)?;

        let Some(root) = self.root else {
            let mut planner = Planner::new(self.ctx.signer, self.ctx.factories().await?);
            let created = planner.create_node(&target)?;
            self.repoint(&mut planner, created);
            return Ok(planner.finish(Some(created)));
        };

        let derived = ModuleReader::new(self.ctx.clone()).derive_lenient(root).await?;
        let current = canonicalize(&project_opaque(&derived, &target));
        let divergence = diff(&current, &target);
        if divergence.is_equal() {
            tracing::debug!(
                endpoint = %self.ctx.endpoint(),
                root = %root,
                "Module tree up to date"
            );
            return Ok(ReconciliationPlan::default());
        }
        tracing::info!(
            endpoint = %self.ctx.endpoint(),
            root = %root,
            %divergence,
            "Module tree diverged"
        );

        let mut planner = Planner::new(self.ctx.signer, self.ctx.factories().await?);
        let replaced = planner.update_node(&current, &target)?;
        if let Some(new_root) = replaced {
            self.repoint(&mut planner, new_root);
        }
        Ok(planner.finish(replaced))
    }

    fn repoint(&self, planner: &mut Planner, new_root: AddressRef) {
        if let Some(parent) = &self.parent {
            planner.mutate(
                AddressRef::Known(parent.address),
                &parent.setter,
                vec![new_root.into()],
            );
        }
    }

    /// Execute `plan` and track the root if it moved
    pub async fn apply(&mut self, plan: &ReconciliationPlan) -> Result<AppliedPlan> {
        let applied = PlanExecutor::new(&self.ctx).apply(plan).await?;
        if let Some(new_root) = applied.new_root {
            if self.root != Some(new_root) {
                tracing::info!(
                    endpoint = %self.ctx.endpoint(),
                    root = %new_root,
                    "Module root moved"
                );
            }
            self.root = Some(new_root);
        }
        Ok(applied)
    }

    /// Plan and apply in one go; returns the applied plan
    pub async fn converge(&mut self, target: &ModuleConfig) -> Result<AppliedPlan> {
        let plan = self.update(target).await?;
        self.apply(&plan).await
    }
}

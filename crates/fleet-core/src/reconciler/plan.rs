//! Reconciliation plans and their execution
//!
//! A plan is an ordered list of operations. Operations may refer to
//! contracts deployed by earlier operations of the same plan through
//! [`AddressRef::Deployed`], which is resolved at execution time.

use std::collections::BTreeMap;
use std::fmt;

use fleet_chain::Address;
use fleet_meta::ModuleKind;
use serde_json::{Map, Value};

use crate::context::ChainContext;
use crate::error::{Error, Result};

/// An address known now, or the address of an earlier deploy in the same plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressRef {
    Known(Address),
    /// Index into the plan's operation list; that operation must be a deploy
    Deployed(usize),
}

impl AddressRef {
    fn resolve(&self, deployed: &BTreeMap<usize, Address>) -> Result<Address> {
        match self {
            Self::Known(address) => Ok(*address),
            Self::Deployed(index) => deployed
                .get(index)
                .copied()
                .ok_or_else(|| {
                    Error::invariant(format!("operation {index} has not deployed a contract"))
                }),
        }
    }
}

impl fmt::Display for AddressRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(address) => write!(f, "{address}"),
            Self::Deployed(index) => write!(f, "<deployed by #{index}>"),
        }
    }
}

/// A call argument that may embed plan-relative addresses
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(Value),
    Address(AddressRef),
    List(Vec<Arg>),
    Map(BTreeMap<String, Arg>),
}

impl Arg {
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    pub fn known(address: Address) -> Self {
        Self::Address(AddressRef::Known(address))
    }

    /// Build a map argument from `(key, arg)` pairs
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Arg)>) -> Self {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    fn resolve(&self, deployed: &BTreeMap<usize, Address>) -> Result<Value> {
        Ok(match self {
            Self::Value(value) => value.clone(),
            Self::Address(r) => Value::String(r.resolve(deployed)?.to_string()),
            Self::List(items) => Value::Array(
                items
                    .iter()
                    .map(|a| a.resolve(deployed))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Self::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.resolve(deployed)?)))
                    .collect::<Result<Map<_, _>>>()?,
            ),
        })
    }
}

impl From<AddressRef> for Arg {
    fn from(r: AddressRef) -> Self {
        Self::Address(r)
    }
}

/// Deploy a fresh module
#[derive(Debug, Clone, PartialEq)]
pub struct DeployOperation {
    pub module_kind: ModuleKind,
    pub constructor_args: Arg,
}

/// Invoke a state-changing function on an existing (or freshly deployed) contract
#[derive(Debug, Clone, PartialEq)]
pub struct MutateOperation {
    pub target: AddressRef,
    pub call: String,
    pub args: Vec<Arg>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Deploy(DeployOperation),
    Mutate(MutateOperation),
}

impl Operation {
    pub fn is_deploy(&self) -> bool {
        matches!(self, Self::Deploy(_))
    }

    /// Function name of a mutation, or the module kind of a deploy
    pub fn label(&self) -> &str {
        match self {
            Self::Deploy(d) => d.module_kind.as_str(),
            Self::Mutate(m) => &m.call,
        }
    }
}

/// Ordered operations converging one module tree to its target
///
/// Children are deployed before the operations that reference them, module
/// updates precede the parent repoint, and ownership transfers come last.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationPlan {
    pub operations: Vec<Operation>,
    /// Where the root lives after the plan is applied, if it moves
    pub new_root: Option<AddressRef>,
}

impl ReconciliationPlan {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn deploys(&self) -> impl Iterator<Item = &DeployOperation> {
        self.operations.iter().filter_map(|op| match op {
            Operation::Deploy(d) => Some(d),
            Operation::Mutate(_) => None,
        })
    }

    pub fn mutations(&self) -> impl Iterator<Item = &MutateOperation> {
        self.operations.iter().filter_map(|op| match op {
            Operation::Mutate(m) => Some(m),
            Operation::Deploy(_) => None,
        })
    }
}

/// Accumulates operations, holding ownership transfers back until the end
#[derive(Debug, Default)]
pub(crate) struct PlanBuilder {
    operations: Vec<Operation>,
    deferred: Vec<Operation>,
}

impl PlanBuilder {
    pub(crate) fn deploy(&mut self, module_kind: ModuleKind, constructor_args: Arg) -> AddressRef {
        self.operations.push(Operation::Deploy(DeployOperation {
            module_kind,
            constructor_args,
        }));
        AddressRef::Deployed(self.operations.len() - 1)
    }

    pub(crate) fn mutate(&mut self, target: AddressRef, call: &str, args: Vec<Arg>) {
        self.operations.push(Operation::Mutate(MutateOperation {
            target,
            call: call.to_string(),
            args,
        }));
    }

    /// Queue a mutation to run after everything else
    pub(crate) fn defer(&mut self, target: AddressRef, call: &str, args: Vec<Arg>) {
        self.deferred.push(Operation::Mutate(MutateOperation {
            target,
            call: call.to_string(),
            args,
        }));
    }

    pub(crate) fn finish(mut self, new_root: Option<AddressRef>) -> ReconciliationPlan {
        self.operations.append(&mut self.deferred);
        ReconciliationPlan {
            operations: self.operations,
            new_root,
        }
    }
}

/// Addresses produced by applying a plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedPlan {
    /// Contract address per deploy operation index
    pub deployed: BTreeMap<usize, Address>,
    pub new_root: Option<Address>,
}

/// Submits plan operations in order, resolving plan-relative addresses
#[derive(Debug)]
pub struct PlanExecutor<'a> {
    ctx: &'a ChainContext,
}

impl<'a> PlanExecutor<'a> {
    pub fn new(ctx: &'a ChainContext) -> Self {
        Self { ctx }
    }

    /// Apply every operation; stops at the first failure
    pub async fn apply(&self, plan: &ReconciliationPlan) -> Result<AppliedPlan> {
        let mut deployed = BTreeMap::new();

        for (index, operation) in plan.operations.iter().enumerate() {
            match operation {
                Operation::Deploy(op) => {
                    let args = op.constructor_args.resolve(&deployed)?;
                    let address = self.ctx.deploy(op.module_kind.as_str(), args).await?;
                    deployed.insert(index, address);
                }
                Operation::Mutate(op) => {
                    let target = op.target.resolve(&deployed)?;
                    let args = op
                        .args
                        .iter()
                        .map(|a| a.resolve(&deployed))
                        .collect::<Result<Vec<_>>>()?;
                    self.ctx.call(target, &op.call, args).await?;
                }
            }
        }

        let new_root = plan.new_root.map(|r| r.resolve(&deployed)).transpose()?;
        tracing::info!(
            endpoint = %self.ctx.endpoint(),
            operations = plan.operations.len(),
            deployed = deployed.len(),
            "Applied reconciliation plan"
        );
        Ok(AppliedPlan { deployed, new_root })
    }
}

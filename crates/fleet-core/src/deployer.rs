//! Resumable per-endpoint deployment of the core contracts
//!
//! Each endpoint runs an ordered list of steps:
//!
//! 1. record the starting block
//! 2. `proxyAdmin`
//! 3. proxied `interchainGasPaymaster`
//! 4. `defaultIsm` (and an explicit `requiredHook`, if configured) via the reconciler
//! 5. proxied `mailbox`, initialised with the default ISM and required hook
//! 6. `proxyAdmin.registerMailbox(mailbox)`
//! 7. `validatorAnnounce`
//! 8. ownership hand-off to the configured owners
//!
//! Every step first consults the endpoint's [`DeploymentState`] and skips
//! work that is already recorded, then checkpoints. Re-running with the
//! returned states is therefore safe. Endpoints deploy concurrently and a
//! failing endpoint never stops its siblings.

use std::collections::BTreeMap;
use std::sync::Arc;

use fleet_chain::abi::{contract, read, write};
use fleet_chain::{Address, EndpointId, FactoryCache, Transport};
use fleet_meta::{EndpointConfig, FleetConfig, InterchainGasPaymasterConfig, ModuleKind};
use futures::future::join_all;
use serde_json::{Value, json};

use crate::context::ChainContext;
use crate::error::{Error, Result};
use crate::ledger::CheckpointSink;
use crate::reconciler::ModuleReconciler;
use crate::state::{DeployedAddressMap, DeployedContract, DeploymentState, names, registrations};

/// Result of a fleet deployment
#[derive(Debug)]
pub struct FleetDeployment {
    /// Final state of every endpoint, complete or partial
    pub states: BTreeMap<EndpointId, DeploymentState>,
    pub results: BTreeMap<EndpointId, Result<DeployedAddressMap>>,
}

impl FleetDeployment {
    pub fn succeeded(&self) -> impl Iterator<Item = &EndpointId> {
        self.results.iter().filter(|(_, r)| r.is_ok()).map(|(id, _)| id)
    }

    pub fn failed(&self) -> impl Iterator<Item = (&EndpointId, &Error)> {
        self.results
            .iter()
            .filter_map(|(id, r)| r.as_ref().err().map(|e| (id, e)))
    }

    pub fn is_complete(&self) -> bool {
        self.results.values().all(|r| r.is_ok())
    }
}

/// Deploys the core contracts of every configured endpoint
pub struct FleetDeployer {
    config: FleetConfig,
    transport: Arc<dyn Transport>,
    signer: Address,
    factories: Arc<FactoryCache>,
    checkpoints: Option<Arc<dyn CheckpointSink>>,
}

impl FleetDeployer {
    pub fn new(config: FleetConfig, transport: Arc<dyn Transport>, signer: Address) -> Self {
        Self {
            config,
            transport,
            signer,
            factories: Arc::new(FactoryCache::new()),
            checkpoints: None,
        }
    }

    /// Save progress to `sink` after every completed step
    pub fn with_checkpoints(mut self, sink: Arc<dyn CheckpointSink>) -> Self {
        self.checkpoints = Some(sink);
        self
    }

    pub fn with_factories(mut self, factories: Arc<FactoryCache>) -> Self {
        self.factories = factories;
        self
    }

    fn context(&self, id: &EndpointId, config: &EndpointConfig) -> ChainContext {
        ChainContext::new(config.metadata(id.as_str()), self.transport.clone(), self.signer)
            .with_factories(self.factories.clone())
            .with_retry(self.config.settings.retry_policy())
    }

    /// Deploy every endpoint not flagged for removal, resuming from `partial`
    ///
    /// Per-endpoint failures are reported in [`FleetDeployment::results`];
    /// only malformed configuration and invariant violations fail the whole
    /// call, and configuration is checked before anything is submitted.
    pub async fn deploy(
        &self,
        partial: BTreeMap<EndpointId, DeploymentState>,
    ) -> Result<FleetDeployment> {
        let targets: Vec<(EndpointId, &EndpointConfig)> = self
            .config
            .endpoints
            .iter()
            .filter(|(_, config)| !config.remove)
            .map(|(name, config)| (EndpointId::new(name.as_str()), config))
            .collect();
        for (id, config) in &targets {
            config.validate(id.as_str())?;
        }
        tracing::info!(endpoints = targets.len(), "Deploying fleet");

        let runs = join_all(targets.into_iter().map(|(id, config)| {
            let state = partial.get(&id).cloned().unwrap_or_default();
            async move {
                let (state, result) = self.deploy_endpoint(&id, config, state).await;
                (id, state, result)
            }
        }))
        .await;

        let mut deployment = FleetDeployment {
            states: BTreeMap::new(),
            results: BTreeMap::new(),
        };
        for (id, state, result) in runs {
            let result = match result {
                Ok(()) => Ok(state.contracts.clone()),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::error!(endpoint = %id, error = %e, "Endpoint deployment failed");
                    Err(e)
                }
            };
            deployment.states.insert(id.clone(), state);
            deployment.results.insert(id, result);
        }
        Ok(deployment)
    }

    /// Deploy one endpoint; returns the state reached even on failure
    pub async fn deploy_endpoint(
        &self,
        id: &EndpointId,
        config: &EndpointConfig,
        state: DeploymentState,
    ) -> (DeploymentState, Result<()>) {
        let mut run = EndpointDeployment {
            id,
            config,
            ctx: self.context(id, config),
            state,
            checkpoints: self.checkpoints.as_deref(),
        };
        let result = run.run().await;
        if result.is_ok() {
            tracing::info!(
                endpoint = %id,
                contracts = run.state.contracts.len(),
                "Endpoint deployed"
            );
        }
        (run.state, result)
    }
}

/// Ordered deployment steps of one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    StartBlock,
    ProxyAdmin,
    FeeHook,
    DefaultIsm,
    RequiredHook,
    Mailbox,
    RegisterMailbox,
    ValidatorAnnounce,
    Ownership,
}

impl Step {
    const ALL: [Step; 9] = [
        Step::StartBlock,
        Step::ProxyAdmin,
        Step::FeeHook,
        Step::DefaultIsm,
        Step::RequiredHook,
        Step::Mailbox,
        Step::RegisterMailbox,
        Step::ValidatorAnnounce,
        Step::Ownership,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            Self::StartBlock => "startBlock",
            Self::ProxyAdmin => names::PROXY_ADMIN,
            Self::FeeHook => names::INTERCHAIN_GAS_PAYMASTER,
            Self::DefaultIsm => names::DEFAULT_ISM,
            Self::RequiredHook => names::REQUIRED_HOOK,
            Self::Mailbox => names::MAILBOX,
            Self::RegisterMailbox => registrations::MAILBOX,
            Self::ValidatorAnnounce => names::VALIDATOR_ANNOUNCE,
            Self::Ownership => "ownership",
        }
    }
}

struct EndpointDeployment<'a> {
    id: &'a EndpointId,
    config: &'a EndpointConfig,
    ctx: ChainContext,
    state: DeploymentState,
    checkpoints: Option<&'a dyn CheckpointSink>,
}

impl EndpointDeployment<'_> {
    async fn run(&mut self) -> Result<()> {
        for step in Step::ALL {
            self.step(step).await?;
        }
        Ok(())
    }

    /// Run one step, wrapping its error and checkpointing if it changed the state
    async fn step(&mut self, step: Step) -> Result<()> {
        let before = self.state.clone();
        let result = match step {
            Step::StartBlock => self.starting_block().await,
            Step::ProxyAdmin => self.proxy_admin().await,
            Step::FeeHook => self.fee_hook().await,
            Step::DefaultIsm => self.default_ism().await,
            Step::RequiredHook => self.required_hook().await,
            Step::Mailbox => self.mailbox().await,
            Step::RegisterMailbox => self.register_mailbox().await,
            Step::ValidatorAnnounce => self.validator_announce().await,
            Step::Ownership => self.hand_over_ownership().await,
        };
        if let Err(source) = result {
            return Err(Error::Step {
                endpoint: self.id.clone(),
                step: step.as_str().to_string(),
                source: Box::new(source),
            });
        }

        if self.state == before {
            tracing::debug!(
                endpoint = %self.id,
                step = step.as_str(),
                "Deployment step already done"
            );
            return Ok(());
        }
        tracing::info!(endpoint = %self.id, step = step.as_str(), "Deployment step completed");
        if let Some(sink) = self.checkpoints {
            sink.checkpoint(self.id, &self.state).await?;
        }
        Ok(())
    }

    fn require(&self, name: &str) -> Result<Address> {
        self.state
            .address(name)
            .ok_or_else(|| Error::invariant(format!("{name} must be deployed before this step")))
    }

    async fn starting_block(&mut self) -> Result<()> {
        if self.state.starting_block.is_none() {
            self.state.starting_block = Some(self.ctx.block_number().await?);
        }
        Ok(())
    }

    async fn proxy_admin(&mut self) -> Result<()> {
        if self.state.contract(names::PROXY_ADMIN).is_some() {
            return Ok(());
        }
        let address = self
            .ctx
            .deploy(contract::PROXY_ADMIN, json!({ "owner": self.ctx.signer }))
            .await?;
        self.state
            .record(names::PROXY_ADMIN, DeployedContract::new(address, contract::PROXY_ADMIN));
        Ok(())
    }

    /// Deploy `kind` behind a proxy administered by the proxy admin
    async fn proxied(
        &self,
        kind: &str,
        constructor: Value,
        initializer: Value,
    ) -> Result<DeployedContract> {
        let admin = self.require(names::PROXY_ADMIN)?;
        let implementation = self.ctx.deploy(kind, constructor).await?;
        let args = json!({
            "implementation": implementation,
            "admin": admin,
            "initializer": initializer,
        });
        let proxy = self.ctx.deploy(contract::PROXY, args).await?;
        Ok(DeployedContract::proxied(proxy, implementation, kind))
    }

    async fn fee_hook(&mut self) -> Result<()> {
        if self.state.contract(names::INTERCHAIN_GAS_PAYMASTER).is_some() {
            return Ok(());
        }
        let fee_hook: InterchainGasPaymasterConfig = self.config.fee_hook_config();
        let initializer = json!({
            "owner": self.ctx.signer,
            "beneficiary": fee_hook.beneficiary,
            "gasConfigs": serde_json::to_value(&fee_hook.per_destination)?,
        });
        let deployed = self
            .proxied(
                ModuleKind::InterchainGasPaymaster.as_str(),
                json!({ "owner": self.ctx.signer }),
                initializer,
            )
            .await?;
        self.state.record(names::INTERCHAIN_GAS_PAYMASTER, deployed);
        Ok(())
    }

    async fn default_ism(&mut self) -> Result<()> {
        if self.state.contract(names::DEFAULT_ISM).is_some() {
            return Ok(());
        }
        let ism = &self.config.default_ism;
        let address = ModuleReconciler::new(self.ctx.clone()).create(ism).await?;
        self.state
            .record(names::DEFAULT_ISM, DeployedContract::new(address, ism.kind_name()));
        Ok(())
    }

    /// Only configured hooks are deployed; otherwise the fee hook is required
    async fn required_hook(&mut self) -> Result<()> {
        let Some(hook) = &self.config.required_hook else {
            return Ok(());
        };
        if self.state.contract(names::REQUIRED_HOOK).is_some() {
            return Ok(());
        }
        let address = ModuleReconciler::new(self.ctx.clone()).create(hook).await?;
        self.state
            .record(names::REQUIRED_HOOK, DeployedContract::new(address, hook.kind_name()));
        Ok(())
    }

    async fn mailbox(&mut self) -> Result<()> {
        if self.state.contract(names::MAILBOX).is_some() {
            return Ok(());
        }
        let default_ism = self.require(names::DEFAULT_ISM)?;
        let required_hook = match self.state.address(names::REQUIRED_HOOK) {
            Some(hook) => hook,
            None => self.require(names::INTERCHAIN_GAS_PAYMASTER)?,
        };
        let deployed = self
            .proxied(
                contract::MAILBOX,
                json!({ "localDomain": self.config.domain_id }),
                json!({
                    "owner": self.ctx.signer,
                    "defaultIsm": default_ism,
                    "requiredHook": required_hook,
                }),
            )
            .await?;
        self.state.record(names::MAILBOX, deployed);
        Ok(())
    }

    async fn register_mailbox(&mut self) -> Result<()> {
        if self.state.is_registered(registrations::MAILBOX) {
            return Ok(());
        }
        let admin = self.require(names::PROXY_ADMIN)?;
        let mailbox = self.require(names::MAILBOX)?;
        self.ctx.call(admin, write::REGISTER_MAILBOX, vec![json!(mailbox)]).await?;
        self.state.mark_registered(registrations::MAILBOX);
        Ok(())
    }

    async fn validator_announce(&mut self) -> Result<()> {
        if self.state.contract(names::VALIDATOR_ANNOUNCE).is_some() {
            return Ok(());
        }
        let mailbox = self.require(names::MAILBOX)?;
        let address = self
            .ctx
            .deploy(contract::VALIDATOR_ANNOUNCE, json!({ "mailbox": mailbox }))
            .await?;
        self.state.record(
            names::VALIDATOR_ANNOUNCE,
            DeployedContract::new(address, contract::VALIDATOR_ANNOUNCE),
        );
        Ok(())
    }

    /// Transfer each ownable contract whose live owner is not the configured one
    ///
    /// Reads the live owner every time, so it is idempotent without a
    /// checkpoint entry.
    async fn hand_over_ownership(&mut self) -> Result<()> {
        for name in names::OWNABLE {
            let address = self.require(name)?;
            let expected = self.config.expected_owner(name);
            let current: Address = self.ctx.read_json(address, read::OWNER, vec![]).await?;
            if current == expected {
                continue;
            }
            self.ctx
                .call(address, write::TRANSFER_OWNERSHIP, vec![json!(expected)])
                .await?;
            tracing::info!(
                endpoint = %self.id,
                contract = name,
                owner = %expected,
                "Transferred ownership"
            );
        }
        Ok(())
    }
}

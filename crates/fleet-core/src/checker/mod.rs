//! Read-only fleet checks
//!
//! The checker compares every endpoint's live deployment with its declared
//! configuration and reports divergences as [`Violation`]s. It never submits
//! anything.
//!
//! Per endpoint the state machine is
//! `Pending -> Running -> {Completed, Skipped}`, tracked on a shared
//! [`StatusBoard`]. A running endpoint runs its checks concurrently; each
//! appends to the shared [`ViolationCollector`] and a failing read only
//! records an error for its endpoint.

mod bytecode;
mod status;
mod violation;

pub use bytecode::{
    BytecodeRules, Transform, bytecode_hash, mask_bytes, strip_solidity_metadata,
};
pub use status::{EndpointStatus, StatusBoard};
pub use violation::{Violation, ViolationCategory, ViolationCollector, sub};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use fleet_chain::abi::{contract, read};
use fleet_chain::{Address, EndpointId, FactoryCache, Transport};
use fleet_meta::{
    BytecodeSeverity, EndpointConfig, FleetConfig, ModuleConfig, canonicalize, diff, normalize_at,
    strip_addresses,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::ChainContext;
use crate::error::{Error, Result};
use crate::reader::{ModuleReader, project_opaque};
use crate::state::{DeployedAddressMap, DeployedContract, names};

/// Per-invocation checker options
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    /// Overrides the fleet config's `bytecode_severity`
    pub bytecode_severity: Option<BytecodeSeverity>,
}

/// Outcome of one check run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckReport {
    pub run_id: Uuid,
    pub violations: Vec<Violation>,
    pub endpoints: BTreeMap<EndpointId, EndpointStatus>,
    /// Every status each endpoint passed through, starting at `Pending`
    pub history: BTreeMap<EndpointId, Vec<EndpointStatus>>,
    /// Checks that could not complete, per endpoint
    pub errors: BTreeMap<EndpointId, Vec<String>>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty() && self.errors.is_empty()
    }

    pub fn violations_for<'a>(
        &'a self,
        endpoint: &'a EndpointId,
    ) -> impl Iterator<Item = &'a Violation> {
        self.violations.iter().filter(move |v| &v.endpoint == endpoint)
    }

    pub fn status(&self, endpoint: &EndpointId) -> Option<&EndpointStatus> {
        self.endpoints.get(endpoint)
    }
}

/// Checks a fleet's live deployments against its configuration
pub struct FleetChecker {
    config: FleetConfig,
    transport: Arc<dyn Transport>,
    deployments: BTreeMap<EndpointId, DeployedAddressMap>,
    bytecode: BytecodeRules,
    options: CheckOptions,
    factories: Arc<FactoryCache>,
}

impl FleetChecker {
    pub fn new(
        config: FleetConfig,
        transport: Arc<dyn Transport>,
        deployments: BTreeMap<EndpointId, DeployedAddressMap>,
    ) -> Self {
        Self {
            config,
            transport,
            deployments,
            bytecode: BytecodeRules::default(),
            options: CheckOptions::default(),
            factories: Arc::new(FactoryCache::new()),
        }
    }

    pub fn with_bytecode_rules(mut self, rules: BytecodeRules) -> Self {
        self.bytecode = rules;
        self
    }

    pub fn with_options(mut self, options: CheckOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_factories(mut self, factories: Arc<FactoryCache>) -> Self {
        self.factories = factories;
        self
    }

    fn bytecode_severity(&self) -> BytecodeSeverity {
        self.options
            .bytecode_severity
            .unwrap_or(self.config.settings.bytecode_severity)
    }

    /// Check every configured endpoint
    pub async fn check_all(&self) -> Result<CheckReport> {
        self.check(&self.config.endpoint_ids()).await
    }

    /// Check `endpoints` concurrently
    ///
    /// Fails for endpoints missing from the configuration, for malformed
    /// endpoint configuration and for invariant violations; divergence is
    /// always reported as violations.
    pub async fn check(&self, endpoints: &[EndpointId]) -> Result<CheckReport> {
        let run_id = Uuid::new_v4();
        let endpoints: Vec<EndpointId> = endpoints
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        for id in &endpoints {
            let Some(config) = self.config.endpoint(id) else {
                return Err(Error::UnknownEndpoint { endpoint: id.clone() });
            };
            if !config.remove {
                config.validate(id.as_str())?;
            }
        }
        tracing::info!(%run_id, endpoints = endpoints.len(), "Starting fleet check");

        let board = StatusBoard::new(&endpoints);
        let collector = ViolationCollector::new();
        let outcomes = join_all(
            endpoints
                .iter()
                .map(|id| self.check_endpoint(id, &board, &collector)),
        )
        .await;

        let mut errors = BTreeMap::new();
        for (id, failures) in endpoints.iter().zip(outcomes) {
            let mut messages = Vec::new();
            for failure in failures {
                if failure.is_fatal() {
                    return Err(failure);
                }
                tracing::error!(endpoint = %id, error = %failure, "Check failed");
                messages.push(failure.to_string());
            }
            if !messages.is_empty() {
                errors.insert(id.clone(), messages);
            }
        }

        let violations = collector.into_violations();
        let (statuses, history) = board.into_parts();
        tracing::info!(%run_id, violations = violations.len(), "Fleet check finished");
        Ok(CheckReport {
            run_id,
            violations,
            endpoints: statuses,
            history,
            errors,
        })
    }

    async fn check_endpoint(
        &self,
        id: &EndpointId,
        board: &StatusBoard,
        collector: &ViolationCollector,
    ) -> Vec<Error> {
        let skip = |reason: &str| match board.advance(id, EndpointStatus::Skipped(reason.into())) {
            Ok(()) => Vec::new(),
            Err(e) => vec![e],
        };
        let Some(config) = self.config.endpoint(id) else {
            return skip("not configured");
        };
        if config.remove {
            tracing::info!(endpoint = %id, "Skipping endpoint flagged for removal");
            return skip("flagged for removal");
        }
        let Some(deployed) = self.deployments.get(id).filter(|d| !d.is_empty()) else {
            collector.push(Violation::new(
                id,
                ViolationCategory::NotDeployed,
                "deployed",
                "missing",
            ));
            return skip("not deployed");
        };

        if let Err(e) = board.advance(id, EndpointStatus::Running) {
            return vec![e];
        }
        let ctx = ChainContext::new(
            config.metadata(id.as_str()),
            self.transport.clone(),
            Address::ZERO,
        )
        .with_factories(self.factories.clone())
        .with_retry(self.config.settings.retry_policy());
        let check = EndpointCheck {
            id,
            config,
            deployed,
            ctx: &ctx,
            collector,
        };

        let (proxies, slots, bytecode, owners, modules, announcements) = futures::join!(
            check.proxies(),
            check.mailbox_slots(),
            check.bytecode(&self.bytecode, self.bytecode_severity()),
            check.owners(),
            check.module_consistency(),
            check.announcements(),
        );
        let mut failures: Vec<Error> = [proxies, bytecode, owners, modules]
            .into_iter()
            .flatten()
            .collect();
        failures.extend([slots, announcements].into_iter().filter_map(|r| r.err()));

        if let Err(e) = board.advance(id, EndpointStatus::Completed) {
            failures.push(e);
        }
        failures
    }
}

/// Checks for one running endpoint
///
/// Checks that visit several contracts or slots keep going after a failed
/// read and return every failure.
struct EndpointCheck<'a> {
    id: &'a EndpointId,
    config: &'a EndpointConfig,
    deployed: &'a DeployedAddressMap,
    ctx: &'a ChainContext,
    collector: &'a ViolationCollector,
}

impl EndpointCheck<'_> {
    fn record(&self, violation: Violation) {
        self.collector.push(violation);
    }

    fn address(&self, name: &str) -> Option<Address> {
        self.deployed.get(name).map(|c| c.address)
    }

    async fn read_address(&self, at: Address, function: &str) -> Result<Address> {
        self.ctx.read_json(at, function, vec![]).await
    }

    /// Implementation and admin pointers of every proxy
    async fn proxies(&self) -> Vec<Error> {
        let admin = self.address(names::PROXY_ADMIN);
        let mut failures = Vec::new();
        for (name, deployed) in self.deployed {
            let Some(implementation) = deployed.implementation else {
                continue;
            };
            if let Err(e) = self.proxy(name, deployed.address, implementation, admin).await {
                failures.push(e);
            }
        }
        failures
    }

    async fn proxy(
        &self,
        name: &str,
        proxy: Address,
        implementation: Address,
        admin: Option<Address>,
    ) -> Result<()> {
        let actual = self.read_address(proxy, read::IMPLEMENTATION).await?;
        if actual != implementation {
            self.record(
                Violation::new(self.id, ViolationCategory::Proxy, implementation, actual)
                    .sub(sub::IMPLEMENTATION)
                    .contract(name),
            );
        }
        if let Some(admin) = admin {
            let actual = self.read_address(proxy, read::ADMIN).await?;
            if actual != admin {
                self.record(
                    Violation::new(self.id, ViolationCategory::Proxy, admin, actual)
                        .sub(sub::ADMIN)
                        .contract(name),
                );
            }
        }
        Ok(())
    }

    /// The mailbox's module slots must not be empty
    async fn mailbox_slots(&self) -> Result<()> {
        let Some(mailbox) = self.address(names::MAILBOX) else {
            return Ok(());
        };
        for (slot, sub_category) in [
            (read::DEFAULT_ISM, sub::DEFAULT_MODULE_UNSET),
            (read::REQUIRED_HOOK, sub::REQUIRED_HOOK_UNSET),
        ] {
            let module = self.read_address(mailbox, slot).await?;
            if module.is_zero() {
                self.record(
                    Violation::new(self.id, ViolationCategory::Mailbox, "a deployed module", module)
                        .sub(sub_category)
                        .contract(names::MAILBOX),
                );
            }
        }
        Ok(())
    }

    /// Code hashes against the allow-list; proxies are checked for both
    /// the proxy and its implementation
    async fn bytecode(&self, rules: &BytecodeRules, severity: BytecodeSeverity) -> Vec<Error> {
        if severity == BytecodeSeverity::Ignore {
            return Vec::new();
        }
        let mut failures = Vec::new();
        for (name, deployed) in self.deployed {
            for (kind, address) in code_targets(deployed) {
                if !rules.covers(kind) {
                    continue;
                }
                if let Err(e) = self.code_hash(rules, severity, name, kind, address).await {
                    failures.push(e);
                }
            }
        }
        failures
    }

    async fn code_hash(
        &self,
        rules: &BytecodeRules,
        severity: BytecodeSeverity,
        name: &str,
        kind: &str,
        address: Address,
    ) -> Result<()> {
        let code = self.ctx.code(address).await?;
        if rules.is_known(kind, &code) == Some(false) {
            let violation = Violation::new(
                self.id,
                ViolationCategory::Bytecode,
                rules.known_hashes(kind).join("|"),
                rules.fingerprint(kind, &code),
            )
            .sub(sub::UNKNOWN_HASH)
            .contract(name);
            match severity {
                BytecodeSeverity::Violation => self.record(violation),
                _ => tracing::warn!(violation = %violation, "Unknown bytecode hash"),
            }
        }
        Ok(())
    }

    /// Owners of the core ownable contracts
    async fn owners(&self) -> Vec<Error> {
        let mut failures = Vec::new();
        for name in names::OWNABLE {
            let Some(address) = self.address(name) else {
                continue;
            };
            let expected = self.config.expected_owner(name);
            match self.read_address(address, read::OWNER).await {
                Ok(actual) if actual != expected => self.record(
                    Violation::new(self.id, ViolationCategory::Owner, expected, actual)
                        .contract(name),
                ),
                Ok(_) => {}
                Err(e) => failures.push(e),
            }
        }
        failures
    }

    /// The mailbox's module trees against their declared targets
    async fn module_consistency(&self) -> Vec<Error> {
        let Some(mailbox) = self.address(names::MAILBOX) else {
            return Vec::new();
        };
        let reader = ModuleReader::new(self.ctx.clone());
        let required_hook = self.config.required_hook_config();
        let mut failures = Vec::new();
        for (slot, sub_category, field, target) in [
            (read::DEFAULT_ISM, sub::DEFAULT_ISM, "default_ism", &self.config.default_ism),
            (read::REQUIRED_HOOK, sub::REQUIRED_HOOK, "required_hook", &required_hook),
        ] {
            let prefix = ["endpoints", self.id.as_str(), field].map(String::from);
            let outcome = self
                .module_tree(&reader, mailbox, slot, sub_category, target, &prefix)
                .await;
            if let Err(e) = outcome {
                failures.push(e);
            }
        }
        failures
    }

    async fn module_tree(
        &self,
        reader: &ModuleReader,
        mailbox: Address,
        slot: &str,
        sub_category: &str,
        target: &ModuleConfig,
        prefix: &[String],
    ) -> Result<()> {
        let root = self.read_address(mailbox, slot).await?;
        if root.is_zero() {
            // reported by the slot check
            return Ok(());
        }
        let target = normalize_at(target, prefix)?;
        let derived = reader.derive_lenient(root).await?;
        let current = canonicalize(&project_opaque(&derived, &target));
        if let Some(path) = diff(&current, &target).path() {
            self.record(
                Violation::new(
                    self.id,
                    ViolationCategory::ModuleConsistency,
                    serde_json::to_string(&target)?,
                    serde_json::to_string(&strip_addresses(&current))?,
                )
                .sub(sub_category)
                .contract(names::MAILBOX)
                .at(display_path(path)),
            );
        }
        Ok(())
    }

    /// Expected validators against the endpoint's announcement registry
    async fn announcements(&self) -> Result<()> {
        if self.config.expected_validators.is_empty() {
            return Ok(());
        }
        let Some(registry) = self.address(names::VALIDATOR_ANNOUNCE) else {
            return Ok(());
        };
        let announced: Vec<Address> = self
            .ctx
            .read_json(registry, read::ANNOUNCED_VALIDATORS, vec![])
            .await?;
        for validator in &self.config.expected_validators {
            if !announced.contains(validator) {
                self.record(
                    Violation::new(
                        self.id,
                        ViolationCategory::Announcement,
                        validator,
                        "not announced",
                    )
                    .sub(sub::VALIDATOR_NOT_ANNOUNCED)
                    .contract(names::VALIDATOR_ANNOUNCE),
                );
            }
        }
        Ok(())
    }
}

/// Contract kinds and addresses whose code is hashed
fn code_targets(deployed: &DeployedContract) -> Vec<(&str, Address)> {
    match deployed.implementation {
        Some(implementation) => vec![
            (contract::PROXY, deployed.address),
            (deployed.kind.as_str(), implementation),
        ],
        None => vec![(deployed.kind.as_str(), deployed.address)],
    }
}

fn display_path(path: &[String]) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.join(".")
    }
}

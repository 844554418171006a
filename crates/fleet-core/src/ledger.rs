//! Deployment ledger persistence
//!
//! The ledger records one [`DeploymentState`] per endpoint in a TOML file. It
//! is the resumption checkpoint of the deployer: every completed step is
//! saved before the next one starts.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use fleet_chain::EndpointId;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::state::DeploymentState;

const LEDGER_VERSION: &str = "1.0";

/// Receives a deployment state after every completed step
#[async_trait]
pub trait CheckpointSink: Send + Sync {
    async fn checkpoint(&self, endpoint: &EndpointId, state: &DeploymentState) -> Result<()>;
}

/// Deployment states of a whole fleet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentLedger {
    /// Ledger format version for forward compatibility
    version: String,
    #[serde(default)]
    endpoints: BTreeMap<EndpointId, DeploymentState>,
}

impl Default for DeploymentLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl DeploymentLedger {
    pub fn new() -> Self {
        Self {
            version: LEDGER_VERSION.to_string(),
            endpoints: BTreeMap::new(),
        }
    }

    /// Load a ledger from a TOML file with shared lock
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, locked, or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        file.lock_shared()?;

        // Read through the locked handle
        let mut content = String::new();
        (&file).read_to_string(&mut content)?;
        let ledger: DeploymentLedger = toml::from_str(&content).map_err(|e| Error::Ledger {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(ledger)
    }

    /// Load `path`, or start an empty ledger if it does not exist yet
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }

    /// Save the ledger to a TOML file atomically with exclusive lock
    ///
    /// Uses write-to-temp-then-rename so readers never see a torn file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;

        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        lock_file.lock_exclusive()?;

        let temp_path = path.with_extension("toml.tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, path)?;

        // Lock released when lock_file is dropped
        Ok(())
    }

    pub fn state(&self, endpoint: &EndpointId) -> Option<&DeploymentState> {
        self.endpoints.get(endpoint)
    }

    pub fn set_state(&mut self, endpoint: &EndpointId, state: DeploymentState) {
        self.endpoints.insert(endpoint.clone(), state);
    }

    /// Every recorded state, ready to hand to the deployer as partial state
    pub fn states(&self) -> BTreeMap<EndpointId, DeploymentState> {
        self.endpoints.clone()
    }
}

/// A ledger file that saves itself on every checkpoint
#[derive(Debug)]
pub struct LedgerFile {
    path: PathBuf,
    ledger: Mutex<DeploymentLedger>,
}

impl LedgerFile {
    /// Open `path`, loading it if present
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let ledger = DeploymentLedger::load_or_default(&path)?;
        Ok(Self {
            path,
            ledger: Mutex::new(ledger),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the in-memory ledger
    pub fn snapshot(&self) -> DeploymentLedger {
        self.ledger.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl CheckpointSink for LedgerFile {
    async fn checkpoint(&self, endpoint: &EndpointId, state: &DeploymentState) -> Result<()> {
        let mut ledger = self.ledger.lock().unwrap_or_else(|p| p.into_inner());
        let mut state = state.clone();
        state.updated_at = Some(Utc::now());
        ledger.set_state(endpoint, state);
        ledger.save(&self.path)?;
        tracing::debug!(
            endpoint = %endpoint,
            path = %self.path.display(),
            "Checkpointed deployment"
        );
        Ok(())
    }
}

//! Violation records and the shared collector checks append to

use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

use fleet_chain::EndpointId;
use serde::{Deserialize, Serialize};

/// Broad class of a detected divergence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ViolationCategory {
    /// Endpoint has no live deployment
    NotDeployed,
    Proxy,
    Mailbox,
    Bytecode,
    Owner,
    ModuleConsistency,
    Announcement,
}

impl fmt::Display for ViolationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotDeployed => "NotDeployed",
            Self::Proxy => "Proxy",
            Self::Mailbox => "Mailbox",
            Self::Bytecode => "Bytecode",
            Self::Owner => "Owner",
            Self::ModuleConsistency => "ModuleConsistency",
            Self::Announcement => "Announcement",
        };
        f.write_str(s)
    }
}

/// Sub-categories used with [`ViolationCategory`]
pub mod sub {
    pub const IMPLEMENTATION: &str = "Implementation";
    pub const ADMIN: &str = "Admin";
    pub const DEFAULT_MODULE_UNSET: &str = "DefaultModuleUnset";
    pub const REQUIRED_HOOK_UNSET: &str = "RequiredHookUnset";
    pub const UNKNOWN_HASH: &str = "UnknownHash";
    pub const DEFAULT_ISM: &str = "DefaultIsm";
    pub const REQUIRED_HOOK: &str = "RequiredHook";
    pub const VALIDATOR_NOT_ANNOUNCED: &str = "ValidatorNotAnnounced";
}

/// A divergence between declared and deployed state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub endpoint: EndpointId,
    pub category: ViolationCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<String>,
    pub expected: String,
    pub actual: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_contract: Option<String>,
    /// Where in a module tree the divergence was found
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Violation {
    pub fn new(
        endpoint: &EndpointId,
        category: ViolationCategory,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        Self {
            endpoint: endpoint.clone(),
            category,
            sub_category: None,
            expected: expected.to_string(),
            actual: actual.to_string(),
            related_contract: None,
            path: None,
        }
    }

    pub fn sub(mut self, sub_category: &str) -> Self {
        self.sub_category = Some(sub_category.to_string());
        self
    }

    pub fn contract(mut self, name: &str) -> Self {
        self.related_contract = Some(name.to_string());
        self
    }

    pub fn at(mut self, path: impl ToString) -> Self {
        self.path = Some(path.to_string());
        self
    }

    /// `Category/SubCategory`
    pub fn kind(&self) -> String {
        match &self.sub_category {
            Some(sub) => format!("{}/{sub}", self.category),
            None => self.category.to_string(),
        }
    }

    fn key(&self) -> ViolationKey {
        (
            self.kind(),
            self.endpoint.clone(),
            self.related_contract.clone(),
            self.expected.clone(),
            self.actual.clone(),
        )
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.endpoint, self.kind())?;
        if let Some(contract) = &self.related_contract {
            write!(f, " ({contract})")?;
        }
        write!(f, ": expected {}, actual {}", self.expected, self.actual)
    }
}

type ViolationKey = (String, EndpointId, Option<String>, String, String);

/// Append-only, de-duplicating violation list shared by concurrent checks
#[derive(Debug, Default)]
pub struct ViolationCollector {
    inner: Mutex<CollectorState>,
}

#[derive(Debug, Default)]
struct CollectorState {
    violations: Vec<Violation>,
    seen: HashSet<ViolationKey>,
}

impl ViolationCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a violation
    ///
    /// Returns false if an identical one was already recorded.
    pub fn push(&self, violation: Violation) -> bool {
        let mut state = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if !state.seen.insert(violation.key()) {
            tracing::debug!(violation = %violation, "Suppressed duplicate violation");
            return false;
        }
        tracing::info!(violation = %violation, "Violation");
        state.violations.push(violation);
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_violations(self) -> Vec<Violation> {
        self.inner.into_inner().unwrap_or_else(|p| p.into_inner()).violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner_violation(actual: &str) -> Violation {
        Violation::new(&EndpointId::new("alpha"), ViolationCategory::Owner, "0xaa", actual)
            .contract("mailbox")
    }

    #[test]
    fn identical_violations_are_recorded_once() {
        let collector = ViolationCollector::new();
        assert!(collector.push(owner_violation("0xbb")));
        assert!(!collector.push(owner_violation("0xbb")));
        assert!(collector.push(owner_violation("0xcc")));
        assert_eq!(collector.into_violations().len(), 2);
    }

    #[test]
    fn kind_joins_category_and_sub_category() {
        let alpha = EndpointId::new("alpha");
        let v = Violation::new(&alpha, ViolationCategory::Mailbox, "set", "unset")
            .sub(sub::DEFAULT_MODULE_UNSET);
        assert_eq!(v.kind(), "Mailbox/DefaultModuleUnset");
        assert_eq!(v.to_string(), "[alpha] Mailbox/DefaultModuleUnset: expected set, actual unset");
    }
}

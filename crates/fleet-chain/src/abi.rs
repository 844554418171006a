//! Function, event and contract names shared with every transport
//!
//! These strings are part of the stable interface: persisted deployment state
//! and transport implementations refer to them verbatim.

/// Read-only functions
pub mod read {
    pub const MODULE_KIND: &str = "moduleKind";
    pub const OWNER: &str = "owner";
    pub const VALIDATORS_AND_THRESHOLD: &str = "validatorsAndThreshold";
    pub const VALIDATORS_AND_THRESHOLD_WEIGHT: &str = "validatorsAndThresholdWeight";
    pub const MODULES_AND_THRESHOLD: &str = "modulesAndThreshold";
    pub const DOMAINS: &str = "domains";
    pub const MODULE: &str = "module";
    pub const FALLBACK: &str = "fallback";
    pub const THRESHOLD: &str = "threshold";
    pub const LOWER: &str = "lower";
    pub const UPPER: &str = "upper";
    pub const BENEFICIARY: &str = "beneficiary";
    pub const DESTINATION_GAS_CONFIG: &str = "destinationGasConfig";
    pub const MAX_PROTOCOL_FEE: &str = "maxProtocolFee";
    pub const PROTOCOL_FEE: &str = "protocolFee";
    pub const PAUSED: &str = "paused";
    pub const IMPLEMENTATION: &str = "implementation";
    pub const ADMIN: &str = "admin";
    pub const DEFAULT_ISM: &str = "defaultIsm";
    pub const REQUIRED_HOOK: &str = "requiredHook";
    pub const LOCAL_DOMAIN: &str = "localDomain";
    pub const ANNOUNCED_VALIDATORS: &str = "getAnnouncedValidators";
}

/// State-changing functions
pub mod write {
    pub const TRANSFER_OWNERSHIP: &str = "transferOwnership";
    pub const SET: &str = "set";
    pub const REMOVE: &str = "remove";
    pub const SET_FALLBACK: &str = "setFallback";
    pub const SET_THRESHOLD: &str = "setThreshold";
    pub const SET_LOWER: &str = "setLower";
    pub const SET_UPPER: &str = "setUpper";
    pub const SET_DESTINATION_GAS_CONFIG: &str = "setDestinationGasConfig";
    pub const REMOVE_DESTINATION_GAS_CONFIG: &str = "removeDestinationGasConfig";
    pub const SET_BENEFICIARY: &str = "setBeneficiary";
    pub const SET_PROTOCOL_FEE: &str = "setProtocolFee";
    pub const PAUSE: &str = "pause";
    pub const UNPAUSE: &str = "unpause";
    pub const SET_DEFAULT_ISM: &str = "setDefaultIsm";
    pub const SET_REQUIRED_HOOK: &str = "setRequiredHook";
    pub const REGISTER_MAILBOX: &str = "registerMailbox";
    pub const ANNOUNCE: &str = "announce";
}

/// Deployable contracts that are not declarative modules
pub mod contract {
    pub const PROXY_ADMIN: &str = "proxyAdmin";
    pub const MAILBOX: &str = "mailbox";
    pub const VALIDATOR_ANNOUNCE: &str = "validatorAnnounce";
    pub const PROXY: &str = "transparentUpgradeableProxy";
}

/// Event names
pub mod event {
    pub const DISPATCH: &str = "Dispatch";
}

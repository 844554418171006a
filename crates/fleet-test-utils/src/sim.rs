//! In-memory endpoint simulation
//!
//! [`SimulatedChain`] implements [`Transport`] for any number of endpoints.
//! Each contract is a JSON object of named fields. Deploy arguments become
//! the initial fields; reads of a no-argument function return the field of
//! the same name, and `setX(v)` writes field `x`. A handful of functions
//! with keyed storage are special-cased (`module`, `destinationGasConfig`,
//! `domains`, the composite getters and the announcement registry).
//!
//! Deploying `transparentUpgradeableProxy` with
//! `{implementation, admin, initializer}` creates a contract that behaves
//! like its implementation, seeded with the implementation's fields and the
//! initializer's fields.
//!
//! Contracts with an `owner` field reject mutations from anyone but the
//! simulator's signer.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use fleet_chain::abi;
use fleet_chain::{
    Address, Call, EndpointId, Event, EventFilter, H256, ParsedMessage, Receipt, Transport,
    TransportError,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

/// Account that signs every simulated submission
pub const SIM_SIGNER: Address = Address([0x5e; 20]);

const START_BLOCK: u64 = 100;

/// One simulated contract
#[derive(Debug, Clone, PartialEq)]
pub struct SimContract {
    /// Contract kind it was deployed as; proxies report their implementation's kind
    pub kind: String,
    pub state: Map<String, Value>,
    pub code: Vec<u8>,
}

#[derive(Debug)]
struct EndpointState {
    block: u64,
    contracts: BTreeMap<Address, SimContract>,
    events: Vec<Event>,
    submitted: Vec<Call>,
    event_queries: Vec<(u64, u64)>,
    transient_read_failures: u32,
    failing_deploys: HashSet<String>,
    unavailable: bool,
}

impl Default for EndpointState {
    fn default() -> Self {
        Self {
            block: START_BLOCK,
            contracts: BTreeMap::new(),
            events: Vec::new(),
            submitted: Vec::new(),
            event_queries: Vec::new(),
            transient_read_failures: 0,
            failing_deploys: HashSet::new(),
            unavailable: false,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    endpoints: HashMap<EndpointId, EndpointState>,
    next_address: u64,
    next_tx: u64,
}

impl Inner {
    fn endpoint(&mut self, id: &EndpointId) -> &mut EndpointState {
        self.endpoints.entry(id.clone()).or_default()
    }

    fn fresh_address(&mut self) -> Address {
        self.next_address += 1;
        let mut bytes = [0u8; 20];
        bytes[0] = 0xc0;
        bytes[12..].copy_from_slice(&self.next_address.to_be_bytes());
        Address(bytes)
    }

    fn fresh_tx(&mut self) -> H256 {
        self.next_tx += 1;
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&self.next_tx.to_be_bytes());
        H256(bytes)
    }
}

/// In-memory transport for every endpoint of a test fleet
#[derive(Debug)]
pub struct SimulatedChain {
    signer: Address,
    inner: Mutex<Inner>,
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedChain {
    pub fn new() -> Self {
        Self::with_signer(SIM_SIGNER)
    }

    pub fn with_signer(signer: Address) -> Self {
        Self {
            signer,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn signer(&self) -> Address {
        self.signer
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail the next `count` reads on `endpoint` with a transient error
    pub fn fail_reads(&self, endpoint: &EndpointId, count: u32) {
        self.lock().endpoint(endpoint).transient_read_failures = count;
    }

    /// Reject every deployment of `contract` on `endpoint`
    pub fn fail_deploys_of(&self, endpoint: &EndpointId, contract: &str) {
        self.lock().endpoint(endpoint).failing_deploys.insert(contract.to_string());
    }

    pub fn clear_deploy_failures(&self, endpoint: &EndpointId) {
        self.lock().endpoint(endpoint).failing_deploys.clear();
    }

    /// Make every call on `endpoint` fail transiently
    pub fn set_unavailable(&self, endpoint: &EndpointId, unavailable: bool) {
        self.lock().endpoint(endpoint).unavailable = unavailable;
    }

    pub fn block(&self, endpoint: &EndpointId) -> u64 {
        self.lock().endpoint(endpoint).block
    }

    pub fn contract(&self, endpoint: &EndpointId, address: Address) -> Option<SimContract> {
        self.lock().endpoint(endpoint).contracts.get(&address).cloned()
    }

    /// Addresses of every contract of `kind`, in deployment order
    pub fn contracts_of_kind(&self, endpoint: &EndpointId, kind: &str) -> Vec<Address> {
        self.lock()
            .endpoint(endpoint)
            .contracts
            .iter()
            .filter(|(_, c)| c.kind == kind)
            .map(|(a, _)| *a)
            .collect()
    }

    /// Every successfully submitted call, in order
    pub fn submitted(&self, endpoint: &EndpointId) -> Vec<Call> {
        self.lock().endpoint(endpoint).submitted.clone()
    }

    pub fn deploy_count(&self, endpoint: &EndpointId) -> usize {
        self.submitted(endpoint)
            .iter()
            .filter(|c| matches!(c, Call::Deploy { .. }))
            .count()
    }

    /// Block ranges passed to `query_events`, in call order
    pub fn event_queries(&self, endpoint: &EndpointId) -> Vec<(u64, u64)> {
        self.lock().endpoint(endpoint).event_queries.clone()
    }

    /// Place a contract directly, bypassing deployment
    pub fn install(&self, endpoint: &EndpointId, kind: &str, state: Value) -> Address {
        let mut inner = self.lock();
        let address = inner.fresh_address();
        let contract = SimContract {
            kind: kind.to_string(),
            state: object(state),
            code: default_code(kind),
        };
        inner.endpoint(endpoint).contracts.insert(address, contract);
        address
    }

    /// Overwrite one field of a contract
    pub fn set_state(&self, endpoint: &EndpointId, address: Address, field: &str, value: Value) {
        if let Some(c) = self.lock().endpoint(endpoint).contracts.get_mut(&address) {
            c.state.insert(field.to_string(), value);
        }
    }

    pub fn set_code(&self, endpoint: &EndpointId, address: Address, code: Vec<u8>) {
        if let Some(c) = self.lock().endpoint(endpoint).contracts.get_mut(&address) {
            c.code = code;
        }
    }

    /// Emit a `Dispatch` event for `message` from `mailbox` in a new block
    pub fn dispatch(
        &self,
        endpoint: &EndpointId,
        mailbox: Address,
        message: &ParsedMessage,
    ) -> Event {
        let mut inner = self.lock();
        let state = inner.endpoint(endpoint);
        state.block += 1;
        let event = Event {
            address: mailbox,
            name: abi::event::DISPATCH.to_string(),
            block_number: state.block,
            log_index: 0,
            data: message.to_bytes(),
        };
        state.events.push(event.clone());
        event
    }

    /// Record a validator announcement without going through `submit`
    pub fn announce(&self, endpoint: &EndpointId, validator_announce: Address, validator: Address) {
        if let Some(c) = self
            .lock()
            .endpoint(endpoint)
            .contracts
            .get_mut(&validator_announce)
        {
            push_unique(&mut c.state, "announced", json!(validator));
        }
    }

    fn deploy(
        &self,
        inner: &mut Inner,
        endpoint: &EndpointId,
        contract: &str,
        args: &Value,
    ) -> Result<Address, TransportError> {
        let (kind, state) = if contract == abi::contract::PROXY {
            let implementation: Address = field(args, "implementation")?;
            let admin: Address = field(args, "admin")?;
            let target = inner
                .endpoint(endpoint)
                .contracts
                .get(&implementation)
                .cloned()
                .ok_or_else(|| {
                    TransportError::Reverted(format!("no implementation at {implementation}"))
                })?;
            let mut state = target.state;
            if let Some(Value::Object(init)) = args.get("initializer") {
                state.extend(init.clone());
            }
            state.insert("implementation".into(), json!(implementation));
            state.insert("admin".into(), json!(admin));
            (target.kind, state)
        } else {
            (contract.to_string(), object(args.clone()))
        };

        let address = inner.fresh_address();
        inner.endpoint(endpoint).contracts.insert(
            address,
            SimContract {
                kind,
                state,
                code: default_code(contract),
            },
        );
        Ok(address)
    }
}

fn default_code(contract: &str) -> Vec<u8> {
    format!("fleet-sim:{contract}").into_bytes()
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn field<T: DeserializeOwned>(args: &Value, name: &str) -> Result<T, TransportError> {
    let value = args
        .get(name)
        .cloned()
        .ok_or_else(|| TransportError::Reverted(format!("missing argument {name}")))?;
    serde_json::from_value(value)
        .map_err(|e| TransportError::Reverted(format!("bad argument {name}: {e}")))
}

fn arg(args: &[Value], index: usize) -> Result<&Value, TransportError> {
    args.get(index)
        .ok_or_else(|| TransportError::Reverted(format!("missing argument {index}")))
}

fn key(value: &Value) -> Result<String, TransportError> {
    match value {
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(s.clone()),
        other => Err(TransportError::Reverted(format!("bad domain key {other}"))),
    }
}

fn amount(value: Option<&Value>) -> u128 {
    match value {
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as u128,
        _ => 0,
    }
}

fn keyed<'a>(state: &'a mut Map<String, Value>, name: &str) -> &'a mut Map<String, Value> {
    let slot = state
        .entry(name.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(map) => map,
        _ => unreachable!("slot was just made an object"),
    }
}

fn push_unique(state: &mut Map<String, Value>, name: &str, value: Value) {
    let slot = state.entry(name.to_string()).or_insert_with(|| json!([]));
    if let Value::Array(items) = slot {
        if !items.contains(&value) {
            items.push(value);
        }
    }
}

fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn apply(
    state: &mut Map<String, Value>,
    function: &str,
    args: &[Value],
) -> Result<(), TransportError> {
    use abi::write;

    match function {
        write::SET => {
            let domain = key(arg(args, 0)?)?;
            keyed(state, "routes").insert(domain, arg(args, 1)?.clone());
        }
        write::REMOVE => {
            let domain = key(arg(args, 0)?)?;
            keyed(state, "routes").remove(&domain);
        }
        write::SET_DESTINATION_GAS_CONFIG => {
            let domain = key(arg(args, 0)?)?;
            keyed(state, "gasConfigs").insert(domain, arg(args, 1)?.clone());
        }
        write::REMOVE_DESTINATION_GAS_CONFIG => {
            let domain = key(arg(args, 0)?)?;
            keyed(state, "gasConfigs").remove(&domain);
        }
        write::PAUSE => {
            state.insert("paused".into(), json!(true));
        }
        write::UNPAUSE => {
            state.insert("paused".into(), json!(false));
        }
        write::TRANSFER_OWNERSHIP => {
            state.insert("owner".into(), arg(args, 0)?.clone());
        }
        write::REGISTER_MAILBOX => {
            state.insert("mailbox".into(), arg(args, 0)?.clone());
        }
        write::ANNOUNCE => push_unique(state, "announced", arg(args, 0)?.clone()),
        write::SET_PROTOCOL_FEE => {
            let fee = arg(args, 0)?;
            if amount(Some(fee)) > amount(state.get("maxProtocolFee")) {
                return Err(TransportError::Reverted("fee exceeds max".into()));
            }
            state.insert("protocolFee".into(), fee.clone());
        }
        f if f.starts_with("set") && args.len() == 1 => {
            state.insert(lower_first(&f[3..]), args[0].clone());
        }
        other => return Err(TransportError::Reverted(format!("unknown function {other}"))),
    }
    Ok(())
}

fn view(contract: &SimContract, function: &str, args: &[Value]) -> Result<Value, TransportError> {
    use abi::read;

    let state = &contract.state;
    let get = |name: &str| state.get(name).cloned().unwrap_or(Value::Null);
    let keys = |name: &str| -> Vec<Value> {
        match state.get(name) {
            Some(Value::Object(map)) => map
                .keys()
                .filter_map(|k| k.parse::<u64>().ok())
                .map(Value::from)
                .collect(),
            _ => Vec::new(),
        }
    };

    Ok(match function {
        read::MODULE_KIND => json!(contract.kind),
        read::VALIDATORS_AND_THRESHOLD => {
            json!({ "validators": get("validators"), "threshold": get("threshold") })
        }
        read::VALIDATORS_AND_THRESHOLD_WEIGHT => {
            json!({ "validators": get("validators"), "thresholdWeight": get("thresholdWeight") })
        }
        read::MODULES_AND_THRESHOLD => {
            json!({ "modules": get("modules"), "threshold": get("threshold") })
        }
        read::DOMAINS => {
            let mut domains = keys("routes");
            domains.extend(keys("gasConfigs"));
            Value::Array(domains)
        }
        read::MODULE => {
            let domain = key(arg(args, 0)?)?;
            state
                .get("routes")
                .and_then(|r| r.get(&domain))
                .cloned()
                .ok_or_else(|| TransportError::Reverted(format!("no route for {domain}")))?
        }
        read::DESTINATION_GAS_CONFIG => {
            let domain = key(arg(args, 0)?)?;
            state
                .get("gasConfigs")
                .and_then(|r| r.get(&domain))
                .cloned()
                .unwrap_or(Value::Null)
        }
        read::ANNOUNCED_VALIDATORS => state.get("announced").cloned().unwrap_or_else(|| json!([])),
        other => state
            .get(other)
            .cloned()
            .ok_or_else(|| TransportError::Reverted(format!("unknown function {other}")))?,
    })
}

#[async_trait]
impl Transport for SimulatedChain {
    async fn submit(&self, endpoint: &EndpointId, call: &Call) -> Result<Receipt, TransportError> {
        let mut inner = self.lock();
        let state = inner.endpoint(endpoint);
        if state.unavailable {
            return Err(TransportError::Transient(format!("{endpoint} unreachable")));
        }

        let contract_address = match call {
            Call::Deploy { contract, args } => {
                if state.failing_deploys.contains(contract) {
                    let reason = format!("deployment of {contract} rejected");
                    return Err(TransportError::Permanent(reason));
                }
                Some(self.deploy(&mut inner, endpoint, contract, args)?)
            }
            Call::Function { to, function, args } => {
                let signer = self.signer;
                let contract = state
                    .contracts
                    .get_mut(to)
                    .ok_or_else(|| TransportError::Reverted(format!("no contract at {to}")))?;
                if let Some(owner) = contract.state.get("owner")
                    && function != abi::write::ANNOUNCE
                    && *owner != json!(signer)
                {
                    let reason = format!("{function}: caller is not the owner");
                    return Err(TransportError::Reverted(reason));
                }
                apply(&mut contract.state, function, args)?;
                None
            }
        };

        tracing::trace!(endpoint = %endpoint, call = call.label(), "Simulated submit");
        let transaction_hash = inner.fresh_tx();
        let state = inner.endpoint(endpoint);
        state.block += 1;
        state.submitted.push(call.clone());
        Ok(Receipt {
            block_number: state.block,
            transaction_hash,
            contract_address,
        })
    }

    async fn read(&self, endpoint: &EndpointId, call: &Call) -> Result<Vec<u8>, TransportError> {
        let mut inner = self.lock();
        let state = inner.endpoint(endpoint);
        if state.unavailable {
            return Err(TransportError::Transient(format!("{endpoint} unreachable")));
        }
        if state.transient_read_failures > 0 {
            state.transient_read_failures -= 1;
            return Err(TransportError::Transient("simulated timeout".into()));
        }

        let Call::Function { to, function, args } = call else {
            return Err(TransportError::Permanent("cannot read a deployment".into()));
        };
        let contract = state
            .contracts
            .get(to)
            .ok_or_else(|| TransportError::Reverted(format!("no contract at {to}")))?;
        let value = view(contract, function, args)?;
        serde_json::to_vec(&value).map_err(|e| TransportError::Permanent(e.to_string()))
    }

    async fn query_events(
        &self,
        endpoint: &EndpointId,
        filter: &EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Event>, TransportError> {
        let mut inner = self.lock();
        let state = inner.endpoint(endpoint);
        if state.unavailable {
            return Err(TransportError::Transient(format!("{endpoint} unreachable")));
        }
        state.event_queries.push((from_block, to_block));
        Ok(state
            .events
            .iter()
            .filter(|e| filter.matches(e) && (from_block..=to_block).contains(&e.block_number))
            .cloned()
            .collect())
    }

    async fn block_number(&self, endpoint: &EndpointId) -> Result<u64, TransportError> {
        let mut inner = self.lock();
        let state = inner.endpoint(endpoint);
        if state.unavailable {
            return Err(TransportError::Transient(format!("{endpoint} unreachable")));
        }
        Ok(state.block)
    }

    async fn code(
        &self,
        endpoint: &EndpointId,
        address: &Address,
    ) -> Result<Vec<u8>, TransportError> {
        let mut inner = self.lock();
        let state = inner.endpoint(endpoint);
        if state.unavailable {
            return Err(TransportError::Transient(format!("{endpoint} unreachable")));
        }
        Ok(state
            .contracts
            .get(address)
            .map(|c| c.code.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_writes_replace_a_non_object_field() {
        let mut state = Map::new();
        state.insert("routes".into(), json!("stale"));

        apply(&mut state, abi::write::SET, &[json!(7), json!("0x01")]).unwrap();
        apply(&mut state, abi::write::SET, &[json!(9), json!("0x02")]).unwrap();
        assert_eq!(state["routes"], json!({ "7": "0x01", "9": "0x02" }));

        apply(&mut state, abi::write::REMOVE, &[json!(7)]).unwrap();
        assert_eq!(state["routes"], json!({ "9": "0x02" }));
    }
}

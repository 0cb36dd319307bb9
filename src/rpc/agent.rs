//! Controller-facing state machine
//!
//! `Uninitialized → Attached → ShuttingDown`. `init` attaches and runs
//! discovery; everything else except `enumerate` needs an attached
//! session.

use super::wire::{Request, Response};
use crate::config::Config;
use crate::core::types::{Address, InstanceDescriptor, MemoryError, NativeValue};
use crate::discovery::{DiscoveryError, WalkSummary};
use crate::events::{self, EventReceiver, EventSender};
use crate::host::NativeHost;
use crate::invoke::{CallSpec, InvocationResult, InvokeError, PrimitiveKind, SpecError};
use crate::memory::{MemoryReader, MemoryWriter, MAX_STRING_LEN};
use crate::session::DiscoverySession;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Uninitialized,
    Attached,
    ShuttingDown,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentState::Uninitialized => "uninitialized",
            AgentState::Attached => "attached",
            AgentState::ShuttingDown => "shutting down",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("{method} is not valid while {state}")]
    InvalidState { method: String, state: AgentState },

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("host error: {0}")]
    Memory(#[from] MemoryError),
}

impl From<SpecError> for RpcError {
    fn from(e: SpecError) -> Self {
        RpcError::Invoke(InvokeError::Spec(e))
    }
}

impl RpcError {
    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::InvalidState { .. } => "invalid_state",
            RpcError::UnknownMethod(_) => "unknown_method",
            RpcError::InvalidParams(_) => "invalid_params",
            RpcError::Invoke(e) => e.kind(),
            RpcError::Discovery(DiscoveryError::Invoke(e)) => e.kind(),
            RpcError::Discovery(_) => "discovery",
            RpcError::Memory(_) => "host",
        }
    }
}

#[derive(Deserialize)]
struct InvokeParams {
    symbol: String,
    spec: Value,
    #[serde(default)]
    args: Vec<Value>,
}

#[derive(Deserialize)]
struct AllocParams {
    size: usize,
}

#[derive(Deserialize)]
struct PointerParams {
    pointer: Address,
}

#[derive(Deserialize)]
struct FieldParams {
    pointer: Address,
    offset: usize,
    kind: String,
    #[serde(default)]
    value: Value,
}

#[derive(Deserialize)]
struct CallbackParams {
    id: u64,
}

fn params<T: DeserializeOwned>(value: Value) -> Result<T, RpcError> {
    // methods without required fields accept a missing params object
    let value = if value.is_null() { json!({}) } else { value };
    serde_json::from_value(value).map_err(|e| RpcError::InvalidParams(e.to_string()))
}

fn summary_json(summary: WalkSummary, total: usize) -> Value {
    json!({
        "types_visited": summary.types_visited,
        "candidates_checked": summary.candidates_checked,
        "registered": summary.registered,
        "total": total,
    })
}

/// The agent behind one controller channel
pub struct Agent<H: NativeHost + ?Sized + 'static> {
    host: Arc<H>,
    config: Config,
    events: EventSender,
    state: AgentState,
    session: Option<DiscoverySession<H>>,
}

impl<H: NativeHost + ?Sized + 'static> Agent<H> {
    /// Create an agent and the receiving end of its event channel
    pub fn new(host: Arc<H>, config: Config) -> (Self, EventReceiver) {
        let (tx, rx) = events::channel();
        (Self::with_events(host, config, tx), rx)
    }

    pub fn with_events(host: Arc<H>, config: Config, events: EventSender) -> Self {
        Agent {
            host,
            config,
            events,
            state: AgentState::Uninitialized,
            session: None,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn session(&self) -> Option<&DiscoverySession<H>> {
        self.session.as_ref()
    }

    fn attached(&self, method: &str) -> Result<&DiscoverySession<H>, RpcError> {
        match (&self.session, self.state) {
            (Some(session), AgentState::Attached) => Ok(session),
            _ => Err(RpcError::InvalidState {
                method: method.to_string(),
                state: self.state,
            }),
        }
    }

    /// Attach and run the first discovery pass
    pub fn init(&mut self) -> Result<WalkSummary, RpcError> {
        if self.state != AgentState::Uninitialized {
            return Err(RpcError::InvalidState {
                method: "init".to_string(),
                state: self.state,
            });
        }

        let mut session = DiscoverySession::new(Arc::clone(&self.host), &self.config, self.events.clone());
        let summary = session.attach()?;
        info!(instances = session.registry().len(), "Agent attached");
        self.session = Some(session);
        self.state = AgentState::Attached;
        Ok(summary)
    }

    /// Stop serving; callbacks become no-ops, nothing else is released
    pub fn shutdown(&mut self) -> Result<(), RpcError> {
        let session = self.attached("shutdown")?;
        session.callbacks().deactivate_all();
        self.state = AgentState::ShuttingDown;
        info!("Agent shutting down");
        Ok(())
    }

    pub fn invoke(&self, symbol: &str, spec: &CallSpec, args: &[Value]) -> Result<InvocationResult, RpcError> {
        Ok(self.attached("invoke")?.invoke(symbol, spec, args)?)
    }

    /// Discovered instances; empty until `init` has run
    pub fn enumerate(&self) -> Result<Vec<InstanceDescriptor>, RpcError> {
        match self.state {
            AgentState::Uninitialized => Ok(Vec::new()),
            _ => Ok(self.attached("enumerate")?.enumerate()),
        }
    }

    pub fn rescan(&mut self) -> Result<WalkSummary, RpcError> {
        self.attached("rescan")?;
        let session = self.session.as_mut().ok_or(RpcError::InvalidState {
            method: "rescan".to_string(),
            state: self.state,
        })?;
        Ok(session.rescan()?)
    }

    pub fn alloc(&self, size: usize) -> Result<Address, RpcError> {
        if size == 0 {
            return Err(RpcError::InvalidParams("size must be greater than 0".to_string()));
        }
        Ok(self.attached("alloc")?.host().allocate(size)?)
    }

    pub fn free(&self, pointer: Address) -> Result<(), RpcError> {
        Ok(self.attached("free")?.host().free(pointer)?)
    }

    /// Read a field; `string` dereferences a `char *` field
    pub fn get_field(&self, pointer: Address, offset: usize, kind: &str) -> Result<Value, RpcError> {
        let session = self.attached("get_field")?;
        let address = field_address(pointer, offset)?;
        let reader = MemoryReader::new(session.host());

        if kind == "string" {
            let target = reader.read_pointer(address)?;
            if target.is_null() {
                return Ok(Value::Null);
            }
            return Ok(Value::String(reader.read_c_string(target, MAX_STRING_LEN)?));
        }
        let kind = field_kind(kind)?;
        Ok(reader.read_value(address, kind.native_type())?.to_json())
    }

    pub fn set_field(&self, pointer: Address, offset: usize, kind: &str, value: &Value) -> Result<(), RpcError> {
        let session = self.attached("set_field")?;
        let address = field_address(pointer, offset)?;
        let kind = field_kind(kind)?;
        let native = NativeValue::from_json(value, kind.native_type())
            .ok_or_else(|| RpcError::InvalidParams(format!("{value} is not a valid {kind}")))?;
        MemoryWriter::new(session.host()).write_value(address, native)?;
        Ok(())
    }

    pub fn release_callback(&self, id: u64) -> Result<(), RpcError> {
        Ok(self.attached("release_callback")?.callbacks().release(id)?)
    }

    /// Dispatch one request; every failure becomes an error response
    pub fn handle(&mut self, request: Request) -> Response {
        let Request { id, method, params } = request;
        debug!(id, %method, "Request");
        match self.dispatch(&method, params) {
            Ok(result) => Response::success(id, result),
            Err(e) => {
                warn!(id, %method, error = %e, "Request failed");
                Response::failure(Some(id), e.kind(), e.to_string())
            }
        }
    }

    fn dispatch(&mut self, method: &str, raw: Value) -> Result<Value, RpcError> {
        match method {
            "init" => {
                let summary = self.init()?;
                Ok(summary_json(summary, self.session.as_ref().map_or(0, |s| s.registry().len())))
            }
            "shutdown" => {
                self.shutdown()?;
                Ok(Value::Null)
            }
            "enumerate" => Ok(serde_json::to_value(self.enumerate()?).unwrap_or_default()),
            "invoke" => {
                let p: InvokeParams = params(raw)?;
                let spec = CallSpec::from_json(p.spec)?;
                let result = self.invoke(&p.symbol, &spec, &p.args)?;
                Ok(serde_json::to_value(result).unwrap_or_default())
            }
            "rescan" => {
                let summary = self.rescan()?;
                Ok(summary_json(summary, self.session.as_ref().map_or(0, |s| s.registry().len())))
            }
            "alloc" => {
                let p: AllocParams = params(raw)?;
                Ok(Value::String(self.alloc(p.size)?.to_hex()))
            }
            "free" => {
                let p: PointerParams = params(raw)?;
                self.free(p.pointer)?;
                Ok(Value::Null)
            }
            "get_field" => {
                let p: FieldParams = params(raw)?;
                self.get_field(p.pointer, p.offset, &p.kind)
            }
            "set_field" => {
                let p: FieldParams = params(raw)?;
                self.set_field(p.pointer, p.offset, &p.kind, &p.value)?;
                Ok(Value::Null)
            }
            "release_callback" => {
                let p: CallbackParams = params(raw)?;
                self.release_callback(p.id)?;
                Ok(Value::Null)
            }
            other => Err(RpcError::UnknownMethod(other.to_string())),
        }
    }
}

fn field_address(pointer: Address, offset: usize) -> Result<Address, RpcError> {
    if pointer.is_null() {
        return Err(RpcError::InvalidParams("null pointer".to_string()));
    }
    pointer
        .checked_add(offset)
        .ok_or_else(|| RpcError::InvalidParams(format!("offset {offset} overflows {pointer}")))
}

fn field_kind(kind: &str) -> Result<PrimitiveKind, RpcError> {
    match kind.parse::<PrimitiveKind>() {
        Ok(PrimitiveKind::Void) | Err(_) => Err(InvokeError::UnsupportedType(format!("{kind} field")).into()),
        Ok(primitive) => Ok(primitive),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config;
    use crate::host::SimulatedHost;

    #[test]
    fn test_error_kinds() {
        let state = RpcError::InvalidState {
            method: "invoke".to_string(),
            state: AgentState::ShuttingDown,
        };
        assert_eq!(state.kind(), "invalid_state");
        assert_eq!(state.to_string(), "invoke is not valid while shutting down");

        let nested = RpcError::Discovery(DiscoveryError::Invoke(InvokeError::UnresolvedSymbol("x".to_string())));
        assert_eq!(nested.kind(), "unresolved_symbol");
        assert_eq!(RpcError::from(SpecError::MissingSubtype("cb".to_string())).kind(), "invalid_spec");
    }

    #[test]
    fn test_field_address_checks() {
        assert!(matches!(field_address(Address::null(), 8), Err(RpcError::InvalidParams(_))));
        assert!(field_address(Address::new(usize::MAX), 1).is_err());
        assert_eq!(field_address(Address::new(0x1000), 8).unwrap(), Address::new(0x1008));
        assert!(matches!(field_kind("void"), Err(RpcError::Invoke(InvokeError::UnsupportedType(_)))));
        assert_eq!(field_kind("double").unwrap(), PrimitiveKind::Double);
    }

    #[test]
    fn test_missing_params_are_invalid() {
        let (mut agent, _rx) = Agent::new(std::sync::Arc::new(SimulatedHost::new()), default_config());
        let response = agent.handle(Request::new(1, "release_callback", Value::Null));
        assert_eq!(response.error.map(|e| e.kind), Some("invalid_params".to_string()));
    }
}

//! Asynchronous events sent to the controller

use crate::core::types::InstanceDescriptor;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// A trampoline firing: registration id plus named argument values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallbackEvent {
    pub id: u64,
    pub data: Map<String, Value>,
}

/// Wire form: `{ "kind": "...", "data": { ... } }`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "kebab-case")]
pub enum AgentEvent {
    Callback(CallbackEvent),
    InstanceFound(InstanceDescriptor),
}

pub type EventSender = UnboundedSender<AgentEvent>;
pub type EventReceiver = UnboundedReceiver<AgentEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

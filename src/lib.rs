//! gstaudit-agent: heap discovery and native invocation for GStreamer targets
//!
//! The agent locates live `GstPipeline` (and subclass) instances by
//! scanning writable memory, and lets a remote controller call arbitrary
//! exported functions from JSON call descriptions. Everything it needs
//! from the environment goes through the [`host`] traits.

pub mod config;
pub mod core;
pub mod discovery;
pub mod events;
pub mod host;
pub mod invoke;
pub mod memory;
pub mod rpc;
pub mod session;

pub use crate::core::types::{
    Address, InstanceDescriptor, MemoryError, MemoryResult, ModuleInfo, NativeType, NativeValue, TypeId,
};
pub use crate::core::{AUTHORS, VERSION};
pub use discovery::{AbiProfile, InstanceRegistry, TypeHierarchyWalker, TypeSystem};
pub use events::AgentEvent;
pub use host::{MemoryHost, NativeHost, SimulatedHost};
pub use invoke::{CallSpec, CallbackBridge, NativeInvoker};
pub use rpc::{Agent, AgentState};
pub use session::DiscoverySession;

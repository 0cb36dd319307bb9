//! Core type definitions shared by every layer of the agent

mod address;
mod error;
mod instance;
mod module_info;
mod value;

pub use address::{parse_address, Address};
pub use error::{MemoryError, MemoryResult};
pub use instance::{InstanceDescriptor, TypeId};
pub use module_info::ModuleInfo;
pub use value::{NativeType, NativeValue};

/// Target process id
pub type ProcessId = u32;

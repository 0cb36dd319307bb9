//! Core module containing fundamental types for the agent
//!
//! This module provides the foundational building blocks used throughout
//! the crate: addresses, native values, discovery descriptors and the
//! memory-layer error type.

pub mod types;

// Re-export commonly used types for convenience
pub use types::{
    Address,
    InstanceDescriptor,
    MemoryError,
    MemoryResult,
    ModuleInfo,
    NativeType,
    NativeValue,
    TypeId,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

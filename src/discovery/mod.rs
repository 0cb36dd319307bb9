//! Heuristic heap discovery
//!
//! Discovery never asks the target to enumerate its objects. It scans for
//! the type id inside class structures, scans again for instances pointing
//! at those structures, and keeps only candidates whose state and name
//! fields look right for the configured [`AbiProfile`]. Results are
//! best-effort.

pub mod gtype;
pub mod hierarchy;
pub mod locator;
pub mod registry;
pub mod validator;

pub use gtype::GTypeSystem;
pub use hierarchy::{StaticTypeTree, TypeHierarchyWalker, TypeSystem, WalkSummary};
pub use locator::{ClassPointerLocator, TypeValueLocator};
pub use registry::InstanceRegistry;
pub use validator::{AbiProfile, InstanceValidator};

use crate::core::types::MemoryError;
use crate::invoke::InvokeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("type system call failed: {0}")]
    Invoke(#[from] InvokeError),

    #[error("type query failed: {0}")]
    TypeQuery(String),
}

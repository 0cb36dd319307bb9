//! Discovery result types

use super::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle the target's type system uses for a class (a `GType`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeId(pub u64);

impl TypeId {
    /// Pointer-width byte pattern of the id, as it sits in class structures
    pub fn to_pattern(&self, pointer_size: usize) -> Vec<u8> {
        Address::new(self.0 as usize).to_ne_bytes(pointer_size)
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl From<u64> for TypeId {
    fn from(value: u64) -> Self {
        TypeId(value)
    }
}

/// A validated, discovered object in target memory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub pointer: Address,
    pub name: String,
}

impl InstanceDescriptor {
    pub fn new(pointer: Address, name: impl Into<String>) -> Self {
        InstanceDescriptor {
            pointer,
            name: name.into(),
        }
    }
}

//! Loaded module information

use super::Address;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A module (shared object or main executable) loaded in the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub base_address: Address,
    pub size: usize,
    pub path: Option<PathBuf>,
}

impl ModuleInfo {
    /// Creates a new ModuleInfo without a path
    pub fn new(name: impl Into<String>, base_address: Address, size: usize) -> Self {
        ModuleInfo {
            name: name.into(),
            base_address,
            size,
            path: None,
        }
    }

    /// Checks if an address falls within this module
    pub fn contains_address(&self, address: Address) -> bool {
        address >= self.base_address
            && address.as_usize() < self.base_address.as_usize().saturating_add(self.size)
    }
}

//! Memory range descriptions and selection
//!
//! Ranges are queried fresh from the host for every scan and never cached.

pub mod filter;
pub mod protection;

pub use filter::RangeFilter;
pub use protection::Protection;

use crate::core::types::Address;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A contiguous, uniformly protected range of the target's address space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRange {
    pub base: Address,
    pub size: usize,
    pub protection: Protection,
    /// Backing file for mapped images, if any
    pub file: Option<PathBuf>,
}

impl MemoryRange {
    pub fn new(base: Address, size: usize, protection: Protection) -> Self {
        MemoryRange {
            base,
            size,
            protection,
            file: None,
        }
    }

    /// Get the end address of the range (exclusive)
    pub fn end(&self) -> Address {
        Address::new(self.base.as_usize().saturating_add(self.size))
    }

    /// Check if an address is within this range
    pub fn contains(&self, address: Address) -> bool {
        address >= self.base && address < self.end()
    }

    /// Check if `[address, address + len)` lies entirely within this range
    pub fn contains_span(&self, address: Address, len: usize) -> bool {
        match address.checked_add(len) {
            Some(end) => address >= self.base && end <= self.end(),
            None => false,
        }
    }
}

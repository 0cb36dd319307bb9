//! Per-session store of discovered instances

use crate::core::types::{Address, InstanceDescriptor};
use std::collections::HashSet;

/// Append-only, pointer-deduplicated list of validated instances
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    entries: Vec<InstanceDescriptor>,
    seen: HashSet<Address>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `descriptor`; returns false if its pointer was already known
    pub fn register(&mut self, descriptor: InstanceDescriptor) -> bool {
        if !self.seen.insert(descriptor.pointer) {
            return false;
        }
        self.entries.push(descriptor);
        true
    }

    pub fn contains(&self, pointer: Address) -> bool {
        self.seen.contains(&pointer)
    }

    /// Snapshot in discovery order
    pub fn enumerate(&self) -> Vec<InstanceDescriptor> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry() {
        let registry = InstanceRegistry::new();
        assert!(registry.enumerate().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dedup_by_pointer() {
        let mut registry = InstanceRegistry::new();
        assert!(registry.register(InstanceDescriptor::new(Address::new(0x10), "a")));
        assert!(registry.register(InstanceDescriptor::new(Address::new(0x20), "b")));
        // same pointer, renamed in between
        assert!(!registry.register(InstanceDescriptor::new(Address::new(0x10), "a2")));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains(Address::new(0x20)));
        assert_eq!(registry.enumerate()[0].name, "a");
    }
}

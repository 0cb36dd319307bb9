//! Candidate locators
//!
//! Both locators encode a value as a pointer-width, native-endian byte
//! pattern and scan every writable range for it. Chained, they go from a
//! type id to the class structures holding it, then to the instances whose
//! class pointer refers to one of those structures.

use crate::core::types::{Address, MemoryResult, TypeId};
use crate::host::MemoryHost;
use crate::memory::{MemoryRangeScanner, ScanOptions, ScanPattern, ScanProgress};
use tracing::debug;

/// Finds raw occurrences of a type id
pub struct TypeValueLocator<'a, H: MemoryHost + ?Sized> {
    scanner: MemoryRangeScanner<'a, H>,
    pointer_size: usize,
}

impl<'a, H: MemoryHost + ?Sized> TypeValueLocator<'a, H> {
    pub fn new(host: &'a H, options: ScanOptions) -> Self {
        TypeValueLocator {
            scanner: MemoryRangeScanner::new(host, options),
            pointer_size: host.pointer_size(),
        }
    }

    /// Encode patterns for a target whose pointers are `pointer_size` bytes
    pub fn with_pointer_size(mut self, pointer_size: usize) -> Self {
        self.pointer_size = pointer_size;
        self
    }

    pub fn with_progress(mut self, observer: &'a dyn Fn(ScanProgress)) -> Self {
        self.scanner = self.scanner.with_progress(observer);
        self
    }

    /// Addresses in writable memory holding `type_id`
    pub fn locate_type_value(&self, type_id: TypeId) -> MemoryResult<Vec<Address>> {
        let pattern = ScanPattern::new(type_id.to_pattern(self.pointer_size))?;
        let found = self.scanner.scan_writable(&pattern)?;
        debug!(%type_id, hits = found.len(), "Located type id");
        Ok(found)
    }
}

/// Finds pointers to a given address
pub struct ClassPointerLocator<'a, H: MemoryHost + ?Sized> {
    scanner: MemoryRangeScanner<'a, H>,
    pointer_size: usize,
}

impl<'a, H: MemoryHost + ?Sized> ClassPointerLocator<'a, H> {
    pub fn new(host: &'a H, options: ScanOptions) -> Self {
        ClassPointerLocator {
            scanner: MemoryRangeScanner::new(host, options),
            pointer_size: host.pointer_size(),
        }
    }

    /// Encode patterns for a target whose pointers are `pointer_size` bytes
    pub fn with_pointer_size(mut self, pointer_size: usize) -> Self {
        self.pointer_size = pointer_size;
        self
    }

    pub fn with_progress(mut self, observer: &'a dyn Fn(ScanProgress)) -> Self {
        self.scanner = self.scanner.with_progress(observer);
        self
    }

    /// Addresses in writable memory holding a pointer to `target`
    pub fn locate_pointers_to(&self, target: Address) -> MemoryResult<Vec<Address>> {
        let pattern = ScanPattern::pointer(target, self.pointer_size);
        let found = self.scanner.scan_writable(&pattern)?;
        debug!(target = %target.to_hex(), hits = found.len(), "Located pointers");
        Ok(found)
    }
}

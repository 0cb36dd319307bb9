//! Deterministic in-memory host
//!
//! `SimulatedHost` models a target process: mapped ranges (optionally
//! faulting), loaded modules with export tables, native functions written
//! as Rust closures, trampolines that can be fired from any thread, and a
//! scratch heap. Tests, benches and dry runs drive the agent through it.

use super::{MemoryHost, NativeFunction, NativeHost, NativeSignature, TrampolineHandler};
use crate::config::DiscoveryConfig;
use crate::core::types::{Address, MemoryError, MemoryResult, ModuleInfo, NativeValue};
use crate::memory::regions::{MemoryRange, Protection};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A native function implemented in Rust
pub type SimFunction = Arc<dyn Fn(&SimulatedHost, &[NativeValue]) -> NativeValue + Send + Sync>;

const CODE_BASE: usize = 0x0040_0000;
const HEAP_BASE: usize = 0x1000_0000;
const HEAP_ALIGN: usize = 16;

// dry-run process layout; all below 4 GiB so 32-bit profiles work too
const DRY_RUN_TYPE: usize = 0x5a17_0000;
const DRY_RUN_CLASS: usize = 0x2000_0000;
const DRY_RUN_INSTANCE: usize = 0x3000_0000;
const DRY_RUN_NAME: usize = 0x3000_1000;

struct Mapping {
    range: MemoryRange,
    data: Vec<u8>,
    faulting: bool,
}

struct SimModule {
    info: ModuleInfo,
    exports: HashMap<String, Address>,
}

/// In-memory implementation of [`NativeHost`]
pub struct SimulatedHost {
    pointer_size: usize,
    mappings: RwLock<BTreeMap<usize, Mapping>>,
    modules: RwLock<Vec<SimModule>>,
    functions: RwLock<HashMap<Address, SimFunction>>,
    trampolines: RwLock<HashMap<Address, (NativeSignature, TrampolineHandler)>>,
    allocations: Mutex<HashMap<Address, usize>>,
    calls: Mutex<Vec<(Address, Vec<NativeValue>)>>,
    next_code: AtomicUsize,
    next_heap: AtomicUsize,
    module_enumerations: AtomicUsize,
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHost {
    /// Create an empty host with the build's pointer width
    pub fn new() -> Self {
        Self::with_pointer_size(std::mem::size_of::<usize>())
    }

    /// Create an empty host emulating a target with the given pointer width
    pub fn with_pointer_size(pointer_size: usize) -> Self {
        SimulatedHost {
            pointer_size,
            mappings: RwLock::new(BTreeMap::new()),
            modules: RwLock::new(Vec::new()),
            functions: RwLock::new(HashMap::new()),
            trampolines: RwLock::new(HashMap::new()),
            allocations: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            next_code: AtomicUsize::new(CODE_BASE),
            next_heap: AtomicUsize::new(HEAP_BASE),
            module_enumerations: AtomicUsize::new(0),
        }
    }

    /// A stand-in GStreamer process for dry runs
    ///
    /// Exports the symbols `discovery` names and holds one live instance of
    /// the tracked class, `pipeline0`, laid out as its profile describes.
    /// Child type queries report no children.
    pub fn dry_run(discovery: &DiscoveryConfig) -> Self {
        let profile = &discovery.profile;
        let width = profile.pointer_size;
        let host = Self::with_pointer_size(width);

        let gobject = host.add_module("libgobject-2.0.so.0");
        let gst = host.add_module("libgstreamer-1.0.so.0");
        host.add_export(gst, &discovery.type_query_symbol, |_, _| {
            NativeValue::Pointer(Address::new(DRY_RUN_TYPE))
        });
        host.add_export(gst, &discovery.constructor_symbol, |_, _| NativeValue::Pointer(Address::null()));
        host.add_export(gobject, &discovery.children_symbol, |host, args| {
            if let Some(count) = args.get(1).and_then(NativeValue::as_address) {
                let _ = host.poke(count, &0u32.to_ne_bytes());
            }
            NativeValue::Pointer(Address::null())
        });
        host.add_export(gobject, &discovery.free_symbol, |_, _| NativeValue::Void);

        let mut class = vec![0u8; 0x40];
        class[..width].copy_from_slice(&Address::new(DRY_RUN_TYPE).to_ne_bytes(width));
        host.map(Address::new(DRY_RUN_CLASS), class, Protection::READ_WRITE);

        let size = (profile.name_offset + width).max(profile.state_offset + 4);
        let mut instance = vec![0u8; size.div_ceil(HEAP_ALIGN) * HEAP_ALIGN];
        instance[..width].copy_from_slice(&Address::new(DRY_RUN_CLASS).to_ne_bytes(width));
        instance[profile.name_offset..profile.name_offset + width]
            .copy_from_slice(&Address::new(DRY_RUN_NAME).to_ne_bytes(width));
        let state = profile.state_min.max(0) as u32;
        instance[profile.state_offset..profile.state_offset + 4].copy_from_slice(&state.to_ne_bytes());
        host.map(Address::new(DRY_RUN_INSTANCE), instance, Protection::READ_WRITE);
        host.map(Address::new(DRY_RUN_NAME), b"pipeline0\0".to_vec(), Protection::READ);

        host
    }

    /// Map `data` at `base`, replacing any mapping at the same base
    pub fn map(&self, base: Address, data: Vec<u8>, protection: Protection) -> MemoryRange {
        let range = MemoryRange::new(base, data.len(), protection);
        self.mappings.write().insert(
            base.as_usize(),
            Mapping {
                range: range.clone(),
                data,
                faulting: false,
            },
        );
        range
    }

    /// Map a range that is reported by enumeration but faults on every read
    pub fn map_faulting(&self, base: Address, size: usize, protection: Protection) -> MemoryRange {
        let range = MemoryRange::new(base, size, protection);
        self.mappings.write().insert(
            base.as_usize(),
            Mapping {
                range: range.clone(),
                data: Vec::new(),
                faulting: true,
            },
        );
        range
    }

    /// Remove the mapping starting at `base`
    pub fn unmap(&self, base: Address) -> bool {
        self.mappings.write().remove(&base.as_usize()).is_some()
    }

    /// Write bytes regardless of protection, for setting up fixtures
    pub fn poke(&self, address: Address, bytes: &[u8]) -> MemoryResult<()> {
        self.with_mapping_mut(address, bytes.len(), |data| data.copy_from_slice(bytes))
    }

    /// Write a pointer-width value regardless of protection
    pub fn poke_pointer(&self, address: Address, value: Address) -> MemoryResult<()> {
        self.poke(address, &value.to_ne_bytes(self.pointer_size))
    }

    /// Register a loaded module and return its index
    pub fn add_module(&self, name: &str) -> usize {
        let mut modules = self.modules.write();
        let base = CODE_BASE + 0x0100_0000 * (modules.len() + 1);
        modules.push(SimModule {
            info: ModuleInfo::new(name, Address::new(base), 0x0100_0000),
            exports: HashMap::new(),
        });
        modules.len() - 1
    }

    /// Register a native function without exporting it
    pub fn add_function<F>(&self, function: F) -> Address
    where
        F: Fn(&SimulatedHost, &[NativeValue]) -> NativeValue + Send + Sync + 'static,
    {
        let address = Address::new(self.next_code.fetch_add(0x10, Ordering::Relaxed));
        self.functions.write().insert(address, Arc::new(function));
        address
    }

    /// Register a native function and export it from `module` under `name`
    pub fn add_export<F>(&self, module: usize, name: &str, function: F) -> Address
    where
        F: Fn(&SimulatedHost, &[NativeValue]) -> NativeValue + Send + Sync + 'static,
    {
        let address = self.add_function(function);
        if let Some(m) = self.modules.write().get_mut(module) {
            m.exports.insert(name.to_string(), address);
        }
        address
    }

    /// Simulate native code entering a trampoline, possibly from another thread
    pub fn fire_trampoline(&self, trampoline: Address, args: &[NativeValue]) -> MemoryResult<NativeValue> {
        let handler = self
            .trampolines
            .read()
            .get(&trampoline)
            .map(|(_, handler)| handler.clone())
            .ok_or_else(|| MemoryError::CallFailed(format!("no trampoline at {}", trampoline.to_hex())))?;
        Ok(handler(args))
    }

    /// Number of live trampolines
    pub fn trampoline_count(&self) -> usize {
        self.trampolines.read().len()
    }

    /// Number of live scratch allocations
    pub fn live_allocations(&self) -> usize {
        self.allocations.lock().len()
    }

    /// How many times modules were enumerated
    pub fn module_enumerations(&self) -> usize {
        self.module_enumerations.load(Ordering::Relaxed)
    }

    /// Every native call made so far, in order
    pub fn call_log(&self) -> Vec<(Address, Vec<NativeValue>)> {
        self.calls.lock().clone()
    }

    fn with_mapping_mut<R>(
        &self,
        address: Address,
        len: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> MemoryResult<R> {
        let mut mappings = self.mappings.write();
        let mapping = mappings
            .range_mut(..=address.as_usize())
            .next_back()
            .map(|(_, m)| m)
            .filter(|m| !m.faulting && m.range.contains_span(address, len))
            .ok_or_else(|| MemoryError::access_fault(address, "unmapped"))?;
        let start = address.as_usize() - mapping.range.base.as_usize();
        Ok(f(&mut mapping.data[start..start + len]))
    }
}

impl MemoryHost for SimulatedHost {
    fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    fn enumerate_ranges(&self) -> MemoryResult<Vec<MemoryRange>> {
        Ok(self
            .mappings
            .read()
            .values()
            .map(|m| m.range.clone())
            .collect())
    }

    fn read_bytes(&self, address: Address, len: usize) -> MemoryResult<Vec<u8>> {
        let mappings = self.mappings.read();
        let (_, mapping) = mappings
            .range(..=address.as_usize())
            .next_back()
            .ok_or_else(|| MemoryError::access_fault(address, "unmapped"))?;

        if mapping.faulting {
            return Err(MemoryError::access_fault(address, "simulated fault"));
        }
        if !mapping.range.contains_span(address, len) {
            return Err(MemoryError::access_fault(address, "unmapped"));
        }
        if !mapping.range.protection.is_readable() {
            return Err(MemoryError::access_fault(address, "not readable"));
        }

        let start = address.as_usize() - mapping.range.base.as_usize();
        Ok(mapping.data[start..start + len].to_vec())
    }
}

impl NativeHost for SimulatedHost {
    fn enumerate_modules(&self) -> MemoryResult<Vec<ModuleInfo>> {
        self.module_enumerations.fetch_add(1, Ordering::Relaxed);
        Ok(self.modules.read().iter().map(|m| m.info.clone()).collect())
    }

    fn find_export(&self, module: &ModuleInfo, name: &str) -> Option<Address> {
        self.modules
            .read()
            .iter()
            .find(|m| m.info == *module)
            .and_then(|m| m.exports.get(name).copied())
    }

    fn call(&self, function: &NativeFunction, args: &[NativeValue]) -> MemoryResult<NativeValue> {
        if args.len() != function.signature.arguments.len() {
            return Err(MemoryError::CallFailed(format!(
                "{} expects {} arguments, got {}",
                function.address.to_hex(),
                function.signature.arguments.len(),
                args.len()
            )));
        }
        self.calls.lock().push((function.address, args.to_vec()));

        let target = self.functions.read().get(&function.address).cloned();
        match target {
            Some(f) => Ok(f(self, args)),
            None => self.fire_trampoline(function.address, args),
        }
    }

    fn make_trampoline(
        &self,
        signature: &NativeSignature,
        handler: TrampolineHandler,
    ) -> MemoryResult<Address> {
        let address = Address::new(self.next_code.fetch_add(0x10, Ordering::Relaxed));
        self.trampolines
            .write()
            .insert(address, (signature.clone(), handler));
        Ok(address)
    }

    fn release_trampoline(&self, trampoline: Address) -> MemoryResult<()> {
        self.trampolines
            .write()
            .remove(&trampoline)
            .map(|_| ())
            .ok_or_else(|| MemoryError::InvalidAddress(trampoline.to_hex()))
    }

    fn allocate(&self, size: usize) -> MemoryResult<Address> {
        let rounded = size.max(1).div_ceil(HEAP_ALIGN) * HEAP_ALIGN;
        let base = self.next_heap.fetch_add(rounded, Ordering::Relaxed);
        if self.pointer_size == 4 && base + rounded > u32::MAX as usize {
            return Err(MemoryError::allocation_failed(size, "simulated heap exhausted"));
        }
        let address = Address::new(base);
        self.map(address, vec![0u8; rounded], Protection::READ_WRITE);
        self.allocations.lock().insert(address, rounded);
        Ok(address)
    }

    fn free(&self, address: Address) -> MemoryResult<()> {
        if self.allocations.lock().remove(&address).is_none() {
            return Err(MemoryError::InvalidAddress(format!(
                "{} was not allocated",
                address.to_hex()
            )));
        }
        self.unmap(address);
        Ok(())
    }

    fn write_bytes(&self, address: Address, bytes: &[u8]) -> MemoryResult<()> {
        let mappings = self.mappings.read();
        let writable = mappings
            .range(..=address.as_usize())
            .next_back()
            .is_some_and(|(_, m)| m.range.protection.is_writable());
        drop(mappings);
        if !writable {
            return Err(MemoryError::write_failed(address, "not writable"));
        }
        self.poke(address, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::NativeType;

    #[test]
    fn test_map_and_read() {
        let host = SimulatedHost::new();
        host.map(Address::new(0x1000), vec![1, 2, 3, 4], Protection::READ);
        assert_eq!(host.read_bytes(Address::new(0x1001), 2).unwrap(), vec![2, 3]);
        assert!(host.read_bytes(Address::new(0x1003), 2).is_err());
        assert!(host.read_bytes(Address::new(0x0FFF), 1).is_err());
        assert!(host.write_bytes(Address::new(0x1000), &[9]).is_err());
    }

    #[test]
    fn test_faulting_range() {
        let host = SimulatedHost::new();
        let range = host.map_faulting(Address::new(0x2000), 0x100, Protection::READ_WRITE);
        assert_eq!(host.enumerate_ranges().unwrap(), vec![range]);
        let err = host.read_bytes(Address::new(0x2000), 4).unwrap_err();
        assert!(err.is_fault());
    }

    #[test]
    fn test_exports_and_calls() {
        let host = SimulatedHost::new();
        let module = host.add_module("libgstreamer-1.0.so.0");
        let address = host.add_export(module, "gst_version_major", |_, _| NativeValue::U32(1));

        let modules = host.enumerate_modules().unwrap();
        assert_eq!(host.find_export(&modules[0], "gst_version_major"), Some(address));
        assert_eq!(host.find_export(&modules[0], "missing"), None);
        assert_eq!(host.module_enumerations(), 1);

        let function = host
            .make_function(address, NativeSignature::new(NativeType::U32, vec![]))
            .unwrap();
        assert_eq!(host.call(&function, &[]).unwrap(), NativeValue::U32(1));
        assert!(host.call(&function, &[NativeValue::U32(0)]).is_err());
        assert_eq!(host.call_log().len(), 1);
    }

    #[test]
    fn test_allocation_lifecycle() {
        let host = SimulatedHost::new();
        let address = host.allocate(5).unwrap();
        assert!(address.is_aligned(HEAP_ALIGN));
        assert_eq!(host.live_allocations(), 1);
        host.write_bytes(address, b"abc").unwrap();
        assert_eq!(host.read_bytes(address, 3).unwrap(), b"abc".to_vec());

        host.free(address).unwrap();
        assert_eq!(host.live_allocations(), 0);
        assert!(host.read_bytes(address, 1).is_err());
        assert!(host.free(address).is_err());
    }

    #[test]
    fn test_trampolines() {
        let host = SimulatedHost::new();
        let handler: TrampolineHandler = Arc::new(|args| args[0]);
        let signature = NativeSignature::new(NativeType::I32, vec![NativeType::I32]);
        let trampoline = host.make_trampoline(&signature, handler).unwrap();

        assert_eq!(
            host.fire_trampoline(trampoline, &[NativeValue::I32(5)]).unwrap(),
            NativeValue::I32(5)
        );
        assert_eq!(host.trampoline_count(), 1);
        host.release_trampoline(trampoline).unwrap();
        assert_eq!(host.trampoline_count(), 0);
        assert!(host.fire_trampoline(trampoline, &[NativeValue::I32(5)]).is_err());
    }
}

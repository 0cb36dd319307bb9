//! Host environment seam
//!
//! The agent never touches the target directly. Everything it needs from
//! the environment it runs in (range enumeration, reads, symbol lookup,
//! native calls, trampolines, scratch memory) goes through these traits.
//!
//! - [`MemoryHost`] is enough for scanning and validation.
//! - [`NativeHost`] adds what invocation and callbacks need.
//!
//! Implementations must be fault-safe: reading unmapped or protected
//! memory returns [`MemoryError::AccessFault`], it never raises a signal.

#[cfg(target_os = "linux")]
pub mod process;
pub mod sim;

#[cfg(target_os = "linux")]
pub use process::ProcessMemory;
pub use sim::SimulatedHost;

use crate::core::types::{Address, MemoryError, MemoryResult, ModuleInfo, NativeType, NativeValue};
use crate::memory::regions::MemoryRange;
use std::fmt;
use std::sync::Arc;

/// Read access to the target's address space
pub trait MemoryHost: Send + Sync {
    /// Pointer width of the target in bytes
    fn pointer_size(&self) -> usize {
        std::mem::size_of::<usize>()
    }

    /// Enumerates the target's mapped ranges, queried fresh on every call
    fn enumerate_ranges(&self) -> MemoryResult<Vec<MemoryRange>>;

    /// Reads `len` bytes at `address`
    ///
    /// Fails with `AccessFault` if any byte is unreadable.
    fn read_bytes(&self, address: Address, len: usize) -> MemoryResult<Vec<u8>>;
}

/// ABI-level signature of a native function or trampoline
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NativeSignature {
    pub returns: NativeType,
    pub arguments: Vec<NativeType>,
}

impl NativeSignature {
    pub fn new(returns: NativeType, arguments: Vec<NativeType>) -> Self {
        NativeSignature { returns, arguments }
    }
}

impl fmt::Display for NativeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, arg) in self.arguments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ") -> {}", self.returns)
    }
}

/// A callable handle: an entry point bound to a signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeFunction {
    pub address: Address,
    pub signature: NativeSignature,
}

/// Handler run when native code enters a trampoline
///
/// Runs synchronously on whatever thread made the call.
pub type TrampolineHandler = Arc<dyn Fn(&[NativeValue]) -> NativeValue + Send + Sync>;

/// Native runtime primitives needed for invocation and callbacks
pub trait NativeHost: MemoryHost {
    /// Enumerates loaded modules
    fn enumerate_modules(&self) -> MemoryResult<Vec<ModuleInfo>>;

    /// Looks up an exported symbol in one module
    fn find_export(&self, module: &ModuleInfo, name: &str) -> Option<Address>;

    /// Binds an entry point to a signature
    fn make_function(
        &self,
        address: Address,
        signature: NativeSignature,
    ) -> MemoryResult<NativeFunction> {
        if address.is_null() {
            return Err(MemoryError::InvalidAddress(
                "cannot bind a null entry point".to_string(),
            ));
        }
        Ok(NativeFunction { address, signature })
    }

    /// Calls a native function with already-marshaled arguments
    fn call(&self, function: &NativeFunction, args: &[NativeValue]) -> MemoryResult<NativeValue>;

    /// Builds a native-callable entry point that forwards to `handler`
    fn make_trampoline(
        &self,
        signature: &NativeSignature,
        handler: TrampolineHandler,
    ) -> MemoryResult<Address>;

    /// Releases a trampoline; native code must no longer call it
    fn release_trampoline(&self, trampoline: Address) -> MemoryResult<()>;

    /// Allocates zeroed scratch memory in the target
    fn allocate(&self, size: usize) -> MemoryResult<Address>;

    /// Frees memory returned by [`NativeHost::allocate`]
    fn free(&self, address: Address) -> MemoryResult<()>;

    /// Writes bytes into target memory
    fn write_bytes(&self, address: Address, bytes: &[u8]) -> MemoryResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_display() {
        let sig = NativeSignature::new(
            NativeType::Pointer,
            vec![NativeType::U64, NativeType::Pointer],
        );
        assert_eq!(sig.to_string(), "(u64, pointer) -> pointer");
    }
}

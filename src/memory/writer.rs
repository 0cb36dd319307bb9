//! Typed writes and string allocation over a [`NativeHost`]

use crate::core::types::{Address, MemoryError, MemoryResult, NativeValue};
use crate::host::NativeHost;

/// Memory writer bound to a host
pub struct MemoryWriter<'a, H: NativeHost + ?Sized> {
    host: &'a H,
}

impl<'a, H: NativeHost + ?Sized> MemoryWriter<'a, H> {
    pub fn new(host: &'a H) -> Self {
        MemoryWriter { host }
    }

    /// Write a value at `address` using its native encoding
    pub fn write_value(&self, address: Address, value: NativeValue) -> MemoryResult<()> {
        if matches!(value, NativeValue::Void) {
            return Err(MemoryError::UnsupportedOperation(
                "cannot write a void value".to_string(),
            ));
        }
        self.host
            .write_bytes(address, &value.to_bytes(self.host.pointer_size()))
    }

    /// Allocate a NUL-terminated copy of `text` in target memory
    pub fn alloc_utf8(&self, text: &str) -> MemoryResult<Address> {
        if text.as_bytes().contains(&0) {
            return Err(MemoryError::InvalidAddress(
                "string contains an interior NUL".to_string(),
            ));
        }
        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(0);

        let address = self.host.allocate(bytes.len())?;
        if let Err(e) = self.host.write_bytes(address, &bytes) {
            let _ = self.host.free(address);
            return Err(e);
        }
        Ok(address)
    }
}

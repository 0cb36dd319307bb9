//! Typed, fault-contained reads over a [`MemoryHost`]

use crate::core::types::{Address, MemoryError, MemoryResult, NativeType, NativeValue};
use crate::host::MemoryHost;

/// Strings are read in blocks that never straddle a block boundary, so a
/// terminated string at the end of a mapping never faults on the next page.
const STRING_BLOCK: usize = 64;

/// Upper bound for strings read back from native calls
pub const MAX_STRING_LEN: usize = 64 * 1024;

/// Memory reader bound to a host
pub struct MemoryReader<'a, H: MemoryHost + ?Sized> {
    host: &'a H,
    pointer_size: usize,
}

impl<'a, H: MemoryHost + ?Sized> MemoryReader<'a, H> {
    pub fn new(host: &'a H) -> Self {
        Self::with_pointer_size(host, host.pointer_size())
    }

    /// Reader decoding pointers as `pointer_size` bytes, whatever the host reports
    pub fn with_pointer_size(host: &'a H, pointer_size: usize) -> Self {
        MemoryReader { host, pointer_size }
    }

    pub fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    /// Read raw bytes from memory
    pub fn read_bytes(&self, address: Address, len: usize) -> MemoryResult<Vec<u8>> {
        self.host.read_bytes(address, len)
    }

    /// Read a value of the given ABI class
    pub fn read_value(&self, address: Address, ty: NativeType) -> MemoryResult<NativeValue> {
        let pointer_size = self.pointer_size();
        let size = ty.size(pointer_size).ok_or_else(|| {
            MemoryError::UnsupportedOperation(format!("cannot read a value of type {ty}"))
        })?;
        let bytes = self.host.read_bytes(address, size)?;
        NativeValue::from_bytes(&bytes, ty, pointer_size)
            .ok_or_else(|| MemoryError::access_fault(address, "short read"))
    }

    pub fn read_u32(&self, address: Address) -> MemoryResult<u32> {
        let bytes = self.host.read_bytes(address, 4)?;
        let raw: [u8; 4] = bytes
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| MemoryError::access_fault(address, "short read"))?;
        Ok(u32::from_ne_bytes(raw))
    }

    /// Read a pointer-width value
    pub fn read_pointer(&self, address: Address) -> MemoryResult<Address> {
        let width = self.pointer_size();
        let bytes = self.host.read_bytes(address, width)?;
        Address::from_ne_bytes(&bytes, width)
            .ok_or_else(|| MemoryError::access_fault(address, "short read"))
    }

    /// Read the bytes of a NUL-terminated string, without the terminator
    ///
    /// Returns `Ok(None)` when no terminator occurs within `max_len` bytes.
    pub fn read_c_bytes(&self, address: Address, max_len: usize) -> MemoryResult<Option<Vec<u8>>> {
        if address.is_null() {
            return Err(MemoryError::access_fault(address, "null string pointer"));
        }

        let mut out = Vec::new();
        let mut cursor = address;
        while out.len() <= max_len {
            let to_boundary = STRING_BLOCK - cursor.as_usize() % STRING_BLOCK;
            let block = match self.host.read_bytes(cursor, to_boundary) {
                Ok(block) => block,
                // the mapping may end inside the block
                Err(e) if e.is_fault() => self.read_block_bytewise(cursor, to_boundary)?,
                Err(e) => return Err(e),
            };
            if let Some(nul) = memchr::memchr(0, &block) {
                out.extend_from_slice(&block[..nul]);
                return Ok((out.len() <= max_len).then_some(out));
            }
            out.extend_from_slice(&block);
            cursor = cursor
                .checked_add(to_boundary)
                .ok_or_else(|| MemoryError::access_fault(cursor, "address space exhausted"))?;
        }
        Ok(None)
    }

    /// Read up to `len` bytes one at a time, stopping after a NUL; faults
    /// only if the terminator is not reached before unreadable memory
    fn read_block_bytewise(&self, start: Address, len: usize) -> MemoryResult<Vec<u8>> {
        let mut block = Vec::with_capacity(len);
        for i in 0..len {
            let byte = self.host.read_bytes(start.offset(i as isize), 1)?;
            block.extend_from_slice(&byte);
            if byte.first() == Some(&0) {
                break;
            }
        }
        Ok(block)
    }

    /// Read a NUL-terminated UTF-8 string
    pub fn read_c_string(&self, address: Address, max_len: usize) -> MemoryResult<String> {
        let bytes = self.read_c_bytes(address, max_len)?.ok_or_else(|| {
            MemoryError::access_fault(address, format!("no terminator within {max_len} bytes"))
        })?;
        Ok(String::from_utf8(bytes)?)
    }
}

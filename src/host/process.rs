//! Cross-process memory access on Linux
//!
//! Ranges come from `/proc/<pid>/maps`, reads go through
//! `process_vm_readv`. This is enough for discovery (scanning and instance
//! validation) against a live GStreamer process; it cannot call into the
//! target, so it only implements [`MemoryHost`].

use super::MemoryHost;
use crate::core::types::{Address, MemoryError, MemoryResult, ModuleInfo, ProcessId};
use crate::memory::regions::{MemoryRange, Protection};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Read-only view of another process's address space
#[derive(Debug, Clone)]
pub struct ProcessMemory {
    pid: ProcessId,
    pointer_size: usize,
}

impl ProcessMemory {
    /// Attach to `pid`; fails if the process does not exist
    pub fn attach(pid: ProcessId) -> MemoryResult<Self> {
        if !Path::new(&format!("/proc/{pid}")).exists() {
            return Err(MemoryError::ProcessNotFound(format!("PID {pid}")));
        }
        debug!(pid, "Attached to process");
        Ok(ProcessMemory {
            pid,
            pointer_size: std::mem::size_of::<usize>(),
        })
    }

    /// View of the calling process
    pub fn current() -> Self {
        ProcessMemory {
            pid: std::process::id(),
            pointer_size: std::mem::size_of::<usize>(),
        }
    }

    /// Treat the target as having `pointer_size`-byte pointers (a 32-bit
    /// process under a 64-bit agent)
    pub fn with_pointer_size(mut self, pointer_size: usize) -> Self {
        self.pointer_size = pointer_size;
        self
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Modules backing file mappings, one entry per distinct path
    pub fn modules(&self) -> MemoryResult<Vec<ModuleInfo>> {
        let mut spans: BTreeMap<PathBuf, (usize, usize)> = BTreeMap::new();
        for range in self.enumerate_ranges()? {
            let (start, end) = (range.base.as_usize(), range.end().as_usize());
            let Some(path) = range.file else { continue };
            let entry = spans.entry(path).or_insert((start, end));
            entry.0 = entry.0.min(start);
            entry.1 = entry.1.max(end);
        }

        let mut modules: Vec<ModuleInfo> = spans
            .into_iter()
            .map(|(path, (start, end))| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let mut module = ModuleInfo::new(name, Address::new(start), end - start);
                module.path = Some(path);
                module
            })
            .collect();
        modules.sort_by_key(|m| m.base_address);
        Ok(modules)
    }
}

/// Parse the contents of a `/proc/<pid>/maps` file
pub fn parse_maps(contents: &str) -> Vec<MemoryRange> {
    let mut ranges = Vec::new();

    for line in contents.lines() {
        let mut parts = line.split_whitespace();
        let (Some(span), Some(perms)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Some((start, end)) = span.split_once('-') else {
            continue;
        };
        let (Ok(start), Ok(end)) = (
            usize::from_str_radix(start, 16),
            usize::from_str_radix(end, 16),
        ) else {
            continue;
        };
        if end <= start {
            continue;
        }

        // offset, dev, inode, then the optional path
        let path = parts.nth(3).filter(|p| p.starts_with('/')).map(PathBuf::from);

        let mut range = MemoryRange::new(Address::new(start), end - start, Protection::from_perms(perms));
        range.file = path;
        ranges.push(range);
    }

    ranges
}

impl MemoryHost for ProcessMemory {
    fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    fn enumerate_ranges(&self) -> MemoryResult<Vec<MemoryRange>> {
        let contents = fs::read_to_string(format!("/proc/{}/maps", self.pid))?;
        Ok(parse_maps(&contents))
    }

    fn read_bytes(&self, address: Address, len: usize) -> MemoryResult<Vec<u8>> {
        if address.is_null() {
            return Err(MemoryError::access_fault(address, "null address"));
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut buffer = vec![0u8; len];
        let local = libc::iovec {
            iov_base: buffer.as_mut_ptr().cast(),
            iov_len: len,
        };
        let remote = libc::iovec {
            iov_base: address.as_usize() as *mut libc::c_void,
            iov_len: len,
        };

        // SAFETY: `local` points at `buffer`, which is valid for `len` bytes
        // and outlives the call. The remote iovec is only dereferenced by the
        // kernel, which reports unmapped memory as an error.
        let read = unsafe { libc::process_vm_readv(self.pid as libc::pid_t, &local, 1, &remote, 1, 0) };

        if read < 0 {
            let err = std::io::Error::last_os_error();
            return Err(MemoryError::access_fault(address, err.to_string()));
        }
        if read as usize != len {
            return Err(MemoryError::access_fault(
                address,
                format!("partial read: {read} of {len} bytes"),
            ));
        }
        Ok(buffer)
    }
}

//! Byte-pattern scanning across memory ranges
//!
//! A fault while scanning one range is logged and the scan moves on to the
//! next range; it never aborts the whole operation. Scanning only reads.

use crate::core::types::{Address, MemoryError, MemoryResult};
use crate::host::MemoryHost;
use crate::memory::regions::{MemoryRange, RangeFilter};
use memchr::memmem;
use tracing::{debug, trace, warn};

/// Exact byte pattern to search for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPattern {
    bytes: Vec<u8>,
}

impl ScanPattern {
    /// Create a pattern from raw bytes; an empty pattern is rejected
    pub fn new(bytes: Vec<u8>) -> MemoryResult<Self> {
        if bytes.is_empty() {
            return Err(MemoryError::InvalidPattern("Empty pattern".to_string()));
        }
        Ok(ScanPattern { bytes })
    }

    /// Create pattern from hex string (e.g., "48 8B 05 ff")
    pub fn from_hex_string(pattern: &str) -> MemoryResult<Self> {
        let compact: String = pattern.split_whitespace().collect();
        if compact.is_empty() {
            return Err(MemoryError::InvalidPattern("Empty pattern".to_string()));
        }
        let bytes = hex::decode(&compact)
            .map_err(|e| MemoryError::InvalidPattern(format!("{pattern}: {e}")))?;
        Self::new(bytes)
    }

    /// Pattern matching a pointer-width encoding of `address`
    pub fn pointer(address: Address, pointer_size: usize) -> Self {
        ScanPattern {
            bytes: address.to_ne_bytes(pointer_size),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Options for memory scanning
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Bytes read from the host per request
    pub chunk_size: usize,
    /// Only report matches at addresses aligned to this boundary (1 = any)
    pub alignment: usize,
    /// Stop after this many matches in total
    pub max_results: Option<usize>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            chunk_size: 64 * 1024,
            alignment: 1,
            max_results: None,
        }
    }
}

/// Progress snapshot passed to a scan observer after each range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    pub ranges_done: usize,
    pub ranges_total: usize,
    pub bytes_scanned: usize,
}

/// Matches found in one range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeMatches {
    pub range: MemoryRange,
    pub addresses: Vec<Address>,
    /// Set when the range faulted part way; `addresses` holds what was
    /// found before the fault
    pub faulted: bool,
}

/// Memory scanner for pattern matching
pub struct MemoryRangeScanner<'a, H: MemoryHost + ?Sized> {
    host: &'a H,
    options: ScanOptions,
    observer: Option<&'a dyn Fn(ScanProgress)>,
}

impl<'a, H: MemoryHost + ?Sized> MemoryRangeScanner<'a, H> {
    /// Create a new memory scanner
    pub fn new(host: &'a H, options: ScanOptions) -> Self {
        MemoryRangeScanner {
            host,
            options,
            observer: None,
        }
    }

    /// Report progress after every range
    pub fn with_progress(mut self, observer: &'a dyn Fn(ScanProgress)) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn host(&self) -> &'a H {
        self.host
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Scan every range for `pattern`, one result entry per range
    pub fn scan(&self, pattern: &ScanPattern, ranges: &[MemoryRange]) -> Vec<RangeMatches> {
        let mut results = Vec::with_capacity(ranges.len());
        let mut bytes_scanned = 0usize;
        let mut total_matches = 0usize;

        debug!(
            pattern = %hex::encode(pattern.as_bytes()),
            ranges = ranges.len(),
            "Scanning memory ranges"
        );

        for (index, range) in ranges.iter().enumerate() {
            let budget = self
                .options
                .max_results
                .map(|max| max.saturating_sub(total_matches));
            if budget == Some(0) {
                break;
            }

            let mut addresses = Vec::new();
            let outcome = self.scan_range_into(pattern, range, budget, &mut addresses);
            let faulted = match outcome {
                Ok(scanned) => {
                    bytes_scanned += scanned;
                    false
                }
                Err(e) => {
                    warn!(base = %range.base.to_hex(), size = range.size, error = %e, "Range faulted during scan, skipping");
                    true
                }
            };

            total_matches += addresses.len();
            results.push(RangeMatches {
                range: range.clone(),
                addresses,
                faulted,
            });

            if let Some(observer) = self.observer {
                observer(ScanProgress {
                    ranges_done: index + 1,
                    ranges_total: ranges.len(),
                    bytes_scanned,
                });
            }
        }

        results
    }

    /// Scan a single range, propagating the first fault
    pub fn scan_range(&self, pattern: &ScanPattern, range: &MemoryRange) -> MemoryResult<Vec<Address>> {
        let mut addresses = Vec::new();
        self.scan_range_into(pattern, range, self.options.max_results, &mut addresses)?;
        Ok(addresses)
    }

    /// Enumerate ranges matching `filter` and scan them, flattening matches
    pub fn scan_filtered(&self, pattern: &ScanPattern, filter: RangeFilter) -> MemoryResult<Vec<Address>> {
        let ranges = filter.apply(self.host.enumerate_ranges()?);
        Ok(self
            .scan(pattern, &ranges)
            .into_iter()
            .flat_map(|r| r.addresses)
            .collect())
    }

    /// Scan all writable ranges for `pattern`
    pub fn scan_writable(&self, pattern: &ScanPattern) -> MemoryResult<Vec<Address>> {
        self.scan_filtered(pattern, RangeFilter::writable())
    }

    /// Chunked scan of one range; returns the number of bytes scanned
    fn scan_range_into(
        &self,
        pattern: &ScanPattern,
        range: &MemoryRange,
        budget: Option<usize>,
        out: &mut Vec<Address>,
    ) -> MemoryResult<usize> {
        let needle = pattern.as_bytes();
        if needle.is_empty() || range.size < needle.len() {
            return Ok(0);
        }

        let finder = memmem::Finder::new(needle);
        let chunk_size = self.options.chunk_size.max(1);
        let overlap = needle.len() - 1;
        let alignment = self.options.alignment.max(1);
        let mut offset = 0usize;

        while offset < range.size {
            let read_len = (chunk_size + overlap).min(range.size - offset);
            if read_len < needle.len() {
                break;
            }
            let chunk_base = range.base.offset(offset as isize);
            let buffer = self.host.read_bytes(chunk_base, read_len)?;
            trace!(base = %chunk_base.to_hex(), len = read_len, "Scanning chunk");

            // find_iter skips overlapping hits, so restart one byte past each match
            let mut start = 0usize;
            while let Some(found) = finder.find(&buffer[start..]) {
                let position = start + found;
                // Matches starting in the overlap belong to the next chunk
                if position >= chunk_size {
                    break;
                }
                start = position + 1;
                let address = chunk_base.offset(position as isize);
                if !address.is_aligned(alignment) {
                    continue;
                }
                out.push(address);
                if budget.is_some_and(|max| out.len() >= max) {
                    return Ok(offset + read_len);
                }
            }

            offset += chunk_size;
        }

        Ok(range.size)
    }
}

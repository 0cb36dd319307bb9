//! Memory operations over a host: reading, writing and scanning
//!
//! This module provides:
//! - Typed, fault-contained reads (pointers, integers, C strings)
//! - Typed writes and string allocation for invocation scratch memory
//! - Range description and selection
//! - Chunked pattern scanning that survives per-range faults

pub mod reader;
pub mod regions;
pub mod scanner;
pub mod writer;

pub use reader::{MemoryReader, MAX_STRING_LEN};
pub use regions::{MemoryRange, Protection, RangeFilter};
pub use scanner::{MemoryRangeScanner, RangeMatches, ScanOptions, ScanPattern, ScanProgress};
pub use writer::MemoryWriter;

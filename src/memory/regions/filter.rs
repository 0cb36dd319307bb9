//! Memory range filtering

use super::{MemoryRange, Protection};

/// Criteria for selecting ranges to scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeFilter {
    /// Protection bits every selected range must carry
    pub required: Protection,
    /// Skip ranges smaller than this many bytes
    pub min_size: usize,
}

impl RangeFilter {
    /// Ranges that are both readable and writable (`rw-`)
    pub fn writable() -> Self {
        RangeFilter {
            required: Protection::READ_WRITE,
            min_size: 0,
        }
    }

    /// Ranges that are at least readable
    pub fn readable() -> Self {
        RangeFilter {
            required: Protection::READ,
            min_size: 0,
        }
    }

    pub fn with_min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// Check if a range matches the filter
    pub fn matches(&self, range: &MemoryRange) -> bool {
        range.protection.contains(self.required) && range.size >= self.min_size && range.size > 0
    }

    /// Apply the filter to a list of ranges
    pub fn apply(&self, ranges: Vec<MemoryRange>) -> Vec<MemoryRange> {
        ranges.into_iter().filter(|r| self.matches(r)).collect()
    }
}

impl Default for RangeFilter {
    fn default() -> Self {
        RangeFilter::writable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Address;

    fn range(base: usize, size: usize, protection: Protection) -> MemoryRange {
        MemoryRange::new(Address::new(base), size, protection)
    }

    #[test]
    fn test_writable_filter() {
        let filter = RangeFilter::writable();
        assert!(filter.matches(&range(0x1000, 0x1000, Protection::READ_WRITE)));
        assert!(filter.matches(&range(0x1000, 0x1000, Protection::all())));
        assert!(!filter.matches(&range(0x1000, 0x1000, Protection::READ)));
        assert!(!filter.matches(&range(0x1000, 0, Protection::READ_WRITE)));
    }

    #[test]
    fn test_apply_with_min_size() {
        let filter = RangeFilter::readable().with_min_size(0x2000);
        let ranges = vec![
            range(0x1000, 0x1000, Protection::READ),
            range(0x4000, 0x2000, Protection::READ),
            range(0x8000, 0x4000, Protection::WRITE),
        ];
        let selected = filter.apply(ranges);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].base, Address::new(0x4000));
    }
}

//! Chunk-boundary properties of the range scanner

use gstaudit_agent::memory::{MemoryRangeScanner, Protection, ScanOptions, ScanPattern};
use gstaudit_agent::{Address, MemoryHost, SimulatedHost};
use proptest::prelude::*;

const BASE: usize = 0x10_0000;

fn naive_find(haystack: &[u8], needle: &[u8], alignment: usize) -> Vec<Address> {
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(|(i, window)| *window == needle && (BASE + i) % alignment == 0)
        .map(|(i, _)| Address::new(BASE + i))
        .collect()
}

proptest! {
    #[test]
    fn scan_matches_naive_search(
        data in proptest::collection::vec(0u8..4, 64..2048),
        needle in proptest::collection::vec(0u8..4, 1..9),
        plants in proptest::collection::vec(any::<prop::sample::Index>(), 0..6),
        chunk_size in 1usize..300,
        alignment in prop::sample::select(vec![1usize, 2, 4, 8]),
    ) {
        let mut data = data;
        for plant in plants {
            let at = plant.index(data.len() - needle.len());
            data[at..at + needle.len()].copy_from_slice(&needle);
        }
        let expected = naive_find(&data, &needle, alignment);

        let host = SimulatedHost::new();
        host.map(Address::new(BASE), data, Protection::READ_WRITE);
        let ranges = host.enumerate_ranges().unwrap();
        let options = ScanOptions { chunk_size, alignment, max_results: None };
        let scanner = MemoryRangeScanner::new(&host, options);
        let pattern = ScanPattern::new(needle).unwrap();

        let found: Vec<Address> = scanner
            .scan(&pattern, &ranges)
            .into_iter()
            .flat_map(|r| r.addresses)
            .collect();
        prop_assert_eq!(found, expected);
    }

    #[test]
    fn max_results_caps_in_address_order(
        count in 1usize..40,
        cap in 1usize..20,
        chunk_size in 8usize..128,
    ) {
        let mut data = vec![0u8; count * 16];
        for i in 0..count {
            data[i * 16] = 0xEE;
        }
        let host = SimulatedHost::new();
        host.map(Address::new(BASE), data, Protection::READ_WRITE);
        let options = ScanOptions { chunk_size, alignment: 1, max_results: Some(cap) };
        let scanner = MemoryRangeScanner::new(&host, options);

        let found = scanner.scan_writable(&ScanPattern::new(vec![0xEE]).unwrap()).unwrap();
        let expected: Vec<Address> = (0..count.min(cap)).map(|i| Address::new(BASE + i * 16)).collect();
        prop_assert_eq!(found, expected);
    }
}

#[test]
fn test_faulting_range_between_good_ones() {
    let host = SimulatedHost::new();
    host.map(Address::new(0x1000), vec![7u8; 0x100], Protection::READ_WRITE);
    host.map_faulting(Address::new(0x2000), 0x100, Protection::READ_WRITE);
    host.map(Address::new(0x3000), vec![7u8; 0x100], Protection::READ_WRITE);
    let ranges = host.enumerate_ranges().unwrap();

    let scanner = MemoryRangeScanner::new(&host, ScanOptions { alignment: 0x100, ..ScanOptions::default() });
    let results = scanner.scan(&ScanPattern::new(vec![7, 7]).unwrap(), &ranges);

    assert_eq!(results.len(), 3);
    assert!(results[1].faulted);
    assert!(results[1].addresses.is_empty());
    assert_eq!(results[0].addresses, vec![Address::new(0x1000)]);
    assert_eq!(results[2].addresses, vec![Address::new(0x3000)]);
}

//! End-to-end discovery against a simulated GStreamer process

mod common;

use common::*;
use gstaudit_agent::config::default_config;
use gstaudit_agent::discovery::{
    AbiProfile, InstanceRegistry, StaticTypeTree, TypeHierarchyWalker, TypeValueLocator,
};
use gstaudit_agent::events::{self, AgentEvent};
use gstaudit_agent::memory::{MemoryRangeScanner, Protection, ScanOptions, ScanPattern};
use gstaudit_agent::{Address, DiscoverySession, InstanceDescriptor, TypeId};
use pretty_assertions::assert_eq;

fn options() -> ScanOptions {
    ScanOptions {
        alignment: 8,
        ..ScanOptions::default()
    }
}

#[test]
fn test_instance_found_under_first_child() {
    let host = gst_host(&[(PIPELINE_TYPE, &[BIN_SUBTYPE, OTHER_SUBTYPE])]);
    let class = place_class(&host, 0, BIN_SUBTYPE);
    let instance = place_instance(&host, 0, class, b"pipeline0", 4);

    let (tx, mut rx) = events::channel();
    let mut session = DiscoverySession::new(host.clone(), &default_config(), tx);
    let summary = session.attach().unwrap();

    assert_eq!(session.root_type(), Some(TypeId(PIPELINE_TYPE)));
    assert_eq!(summary.types_visited, 3);
    assert_eq!(summary.registered, 1);
    assert_eq!(
        session.enumerate(),
        vec![InstanceDescriptor::new(instance, "pipeline0")]
    );
    assert_eq!(
        rx.try_recv().unwrap(),
        AgentEvent::InstanceFound(InstanceDescriptor::new(instance, "pipeline0"))
    );
    assert!(rx.try_recv().is_err());
    // child arrays and scratch buffers were all released
    assert_eq!(host.live_allocations(), 0);
}

#[test]
fn test_repeated_walks_do_not_duplicate() {
    let host = gst_host(&[(PIPELINE_TYPE, &[BIN_SUBTYPE])]);
    let root_class = place_class(&host, 0, PIPELINE_TYPE);
    let bin_class = place_class(&host, 1, BIN_SUBTYPE);
    place_instance(&host, 0, root_class, b"pipeline0", 1);
    place_instance(&host, 1, bin_class, b"bin0", 2);

    let (tx, _rx) = events::channel();
    let mut session = DiscoverySession::new(host.clone(), &default_config(), tx);
    assert_eq!(session.attach().unwrap().registered, 2);

    let again = session.rescan().unwrap();
    assert_eq!(again.registered, 0);
    assert_eq!(again.types_visited, 2);
    assert_eq!(session.registry().len(), 2);
}

#[test]
fn test_faulting_ranges_are_contained() {
    let host = gst_host(&[]);
    host.map_faulting(Address::new(0x4000_0000), 0x1000, Protection::READ_WRITE);
    let class = place_class(&host, 0, PIPELINE_TYPE);
    host.map_faulting(Address::new(0x4800_0000), 0x1000, Protection::READ_WRITE);
    let good = place_instance(&host, 0, class, b"pipeline0", 0);

    // name pointer into a faulting range: rejected, not an error
    let bad = place_instance(&host, 1, class, b"", 0);
    host.poke_pointer(bad.offset(0x20), Address::new(0x4800_0010)).unwrap();

    let (tx, _rx) = events::channel();
    let mut session = DiscoverySession::new(host.clone(), &default_config(), tx);
    let summary = session.attach().unwrap();

    assert_eq!(summary.candidates_checked, 2);
    assert_eq!(session.enumerate(), vec![InstanceDescriptor::new(good, "pipeline0")]);
}

#[test]
fn test_implausible_candidates_are_rejected() {
    let host = gst_host(&[]);
    let class = place_class(&host, 0, PIPELINE_TYPE);
    place_instance(&host, 0, class, b"pipeline0", 5);
    place_instance(&host, 1, class, b"pipe\x01line", 1);
    place_instance(&host, 2, class, b"", 1);
    let ok = place_instance(&host, 3, class, b"playbin", 3);

    let profile = AbiProfile::default();
    let walker = TypeHierarchyWalker::new(&*host, options(), &profile);
    let (found, checked) = walker.discover_type(TypeId(PIPELINE_TYPE));
    assert_eq!(checked, 4);
    assert_eq!(found, vec![InstanceDescriptor::new(ok, "playbin")]);
}

#[test]
fn test_failed_child_query_is_not_fatal() {
    // no g_type_children export: the walk covers the root only
    let host = std::sync::Arc::new(gstaudit_agent::SimulatedHost::with_pointer_size(8));
    let module = host.add_module("libgstreamer-1.0.so.0");
    host.add_export(module, "gst_pipeline_get_type", |_, _| {
        gstaudit_agent::NativeValue::Pointer(Address::new(PIPELINE_TYPE as usize))
    });
    host.add_export(module, "gst_pipeline_new", |_, _| {
        gstaudit_agent::NativeValue::Pointer(Address::null())
    });
    let class = place_class(&host, 0, PIPELINE_TYPE);
    place_instance(&host, 0, class, b"pipeline0", 2);

    let (tx, _rx) = events::channel();
    let mut session = DiscoverySession::new(host, &default_config(), tx);
    let summary = session.attach().unwrap();
    assert_eq!(summary.types_visited, 1);
    assert_eq!(session.registry().len(), 1);
}

#[test]
fn test_missing_constructor_fails_attach() {
    let host = std::sync::Arc::new(gstaudit_agent::SimulatedHost::with_pointer_size(8));
    host.add_module("libgstreamer-1.0.so.0");
    let (tx, _rx) = events::channel();
    let mut session = DiscoverySession::new(host, &default_config(), tx);
    assert!(session.attach().is_err());
    assert!(session.enumerate().is_empty());
    assert_eq!(session.root_type(), None);
}

#[test]
fn test_static_tree_walk() {
    let host = gst_host(&[]);
    let child_class = place_class(&host, 0, OTHER_SUBTYPE);
    let instance = place_instance(&host, 0, child_class, b"decodebin0", 2);

    let tree = StaticTypeTree::new().with_children(TypeId(PIPELINE_TYPE), [TypeId(OTHER_SUBTYPE)]);
    let profile = AbiProfile::default();
    let walker = TypeHierarchyWalker::new(&*host, options(), &profile);
    let mut registry = InstanceRegistry::new();
    let mut seen = Vec::new();
    let summary = walker.walk_and_discover(TypeId(PIPELINE_TYPE), &tree, &mut registry, |d| {
        seen.push(d.pointer)
    });

    assert_eq!(summary.types_visited, 2);
    assert_eq!(seen, vec![instance]);
    assert!(registry.contains(instance));
}

#[test]
fn test_type_values_in_read_only_memory_are_ignored() {
    let host = gst_host(&[]);
    let class = place_class(&host, 0, PIPELINE_TYPE);
    host.map(
        Address::new(0x5000_0000),
        PIPELINE_TYPE.to_ne_bytes().to_vec(),
        Protection::READ,
    );

    let locator = TypeValueLocator::new(&*host, options());
    assert_eq!(locator.locate_type_value(TypeId(PIPELINE_TYPE)).unwrap(), vec![class]);

    // a full scan still sees both
    let scanner = MemoryRangeScanner::new(&*host, options());
    let pattern = ScanPattern::new(PIPELINE_TYPE.to_ne_bytes().to_vec()).unwrap();
    let ranges = gstaudit_agent::MemoryHost::enumerate_ranges(&*host).unwrap();
    let total: usize = scanner.scan(&pattern, &ranges).iter().map(|m| m.addresses.len()).sum();
    assert_eq!(total, 2);
}

#[test]
fn test_session_discover_with_static_tree() {
    let host = gst_host(&[]);
    let class = place_class(&host, 0, BIN_SUBTYPE);
    let instance = place_instance(&host, 0, class, b"bin0", 1);

    let (tx, mut rx) = events::channel();
    let mut session = DiscoverySession::new(host, &default_config(), tx);
    let tree = StaticTypeTree::new().with_children(TypeId(PIPELINE_TYPE), [TypeId(BIN_SUBTYPE)]);
    let summary = session.discover(TypeId(PIPELINE_TYPE), &tree);

    assert_eq!(summary.registered, 1);
    assert!(session.registry().contains(instance));
    assert!(matches!(rx.try_recv(), Ok(AgentEvent::InstanceFound(_))));
}

//! A simulated GStreamer process for integration tests
#![allow(dead_code)]

use gstaudit_agent::host::{NativeHost, SimulatedHost};
use gstaudit_agent::memory::{MemoryWriter, Protection};
use gstaudit_agent::{Address, NativeValue};
use std::collections::HashMap;
use std::sync::Arc;

pub const PIPELINE_TYPE: u64 = 0x5a17_0000_0100;
pub const BIN_SUBTYPE: u64 = 0x5a17_0000_0200;
pub const OTHER_SUBTYPE: u64 = 0x5a17_0000_0300;

pub const CLASS_BASE: usize = 0x2000_0000;
pub const INSTANCE_BASE: usize = 0x3000_0000;

/// Host exporting `gst_pipeline_get_type`, `gst_pipeline_new`,
/// `g_type_children` and `g_free`, with `children` as the type tree
pub fn gst_host(children: &[(u64, &[u64])]) -> Arc<SimulatedHost> {
    let tree: HashMap<u64, Vec<u64>> = children.iter().map(|(p, c)| (*p, c.to_vec())).collect();
    let host = Arc::new(SimulatedHost::with_pointer_size(8));

    let gobject = host.add_module("libgobject-2.0.so.0");
    let gst = host.add_module("libgstreamer-1.0.so.0");

    host.add_export(gst, "gst_pipeline_get_type", |_, _| {
        NativeValue::Pointer(Address::new(PIPELINE_TYPE as usize))
    });
    host.add_export(gst, "gst_pipeline_new", |_, _| NativeValue::Pointer(Address::null()));
    host.add_export(gobject, "g_type_children", move |host, args| {
        let parent = args[0].as_address().unwrap_or_default().as_usize() as u64;
        let out = args[1].as_address().unwrap_or_default();
        let children = tree.get(&parent).cloned().unwrap_or_default();

        let writer = MemoryWriter::new(host);
        writer.write_value(out, NativeValue::U32(children.len() as u32)).unwrap();
        let array = host.allocate(8 * (children.len() + 1)).unwrap();
        for (i, child) in children.iter().enumerate() {
            writer
                .write_value(array.offset(8 * i as isize), NativeValue::Pointer(Address::new(*child as usize)))
                .unwrap();
        }
        NativeValue::Pointer(array)
    });
    host.add_export(gobject, "g_free", |host, args| {
        if let Some(p) = args[0].as_address().filter(|p| !p.is_null()) {
            host.free(p).unwrap();
        }
        NativeValue::Void
    });
    host
}

/// Map a class structure whose first field is `type_id`
pub fn place_class(host: &SimulatedHost, slot: usize, type_id: u64) -> Address {
    let base = Address::new(CLASS_BASE + slot * 0x1000);
    let mut block = vec![0u8; 0x40];
    block[..8].copy_from_slice(&type_id.to_ne_bytes());
    host.map(base, block, Protection::READ_WRITE);
    base
}

/// Map an instance pointing at `class`, with its name stored in the same block
pub fn place_instance(host: &SimulatedHost, slot: usize, class: Address, name: &[u8], state: u32) -> Address {
    let base = Address::new(INSTANCE_BASE + slot * 0x1000);
    let name_at = base.as_usize() + 0xC0;
    let mut block = vec![0u8; 0x100];
    block[..8].copy_from_slice(&(class.as_usize() as u64).to_ne_bytes());
    block[0x20..0x28].copy_from_slice(&(name_at as u64).to_ne_bytes());
    block[0x80..0x84].copy_from_slice(&state.to_ne_bytes());
    block[0xC0..0xC0 + name.len()].copy_from_slice(name);
    host.map(base, block, Protection::READ_WRITE);
    base
}

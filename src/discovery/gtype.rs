//! Type queries against the target's own GObject type system

use super::hierarchy::TypeSystem;
use super::DiscoveryError;
use crate::core::types::{Address, NativeType, NativeValue, TypeId};
use crate::host::NativeHost;
use crate::invoke::{CallSpec, NativeInvoker, PrimitiveKind, TypeDescriptor, TypeKind};
use crate::memory::MemoryReader;
use serde_json::Value;
use tracing::{debug, warn};

/// Upper bound on children accepted from one `g_type_children` call
const MAX_CHILDREN: u32 = 4096;

/// Lists child types by calling `g_type_children` in the target
pub struct GTypeSystem<'a, H: NativeHost + ?Sized + 'static> {
    invoker: &'a NativeInvoker<H>,
    children_symbol: &'a str,
    free_symbol: &'a str,
}

impl<'a, H: NativeHost + ?Sized + 'static> GTypeSystem<'a, H> {
    pub fn new(invoker: &'a NativeInvoker<H>, children_symbol: &'a str, free_symbol: &'a str) -> Self {
        GTypeSystem {
            invoker,
            children_symbol,
            free_symbol,
        }
    }

    /// Call a `GType <name>_get_type (void)` function
    pub fn query_type(&self, symbol: &str) -> Result<TypeId, DiscoveryError> {
        let spec = CallSpec::new(TypeKind::Primitive(PrimitiveKind::Pointer), Vec::new());
        let result = self.invoker.invoke(symbol, &spec, &[])?;
        let type_id = pointer_value(&result.return_value)
            .filter(|t| *t != 0)
            .ok_or_else(|| DiscoveryError::TypeQuery(format!("{symbol} returned {}", result.return_value)))?;
        let type_id = TypeId(type_id);
        debug!(symbol, %type_id, "Queried type");
        Ok(type_id)
    }

    /// `GType *g_type_children (GType type, guint *n_children)`
    fn children_spec() -> CallSpec {
        CallSpec::new(
            TypeKind::Primitive(PrimitiveKind::Pointer),
            vec![
                TypeDescriptor::input("type", TypeKind::Primitive(PrimitiveKind::Pointer)),
                TypeDescriptor::output("n_children", TypeKind::Primitive(PrimitiveKind::UInt32)),
            ],
        )
    }

    fn free_spec() -> CallSpec {
        CallSpec::new(
            TypeKind::Primitive(PrimitiveKind::Void),
            vec![TypeDescriptor::input("mem", TypeKind::Primitive(PrimitiveKind::Pointer))],
        )
    }
}

impl<H: NativeHost + ?Sized + 'static> TypeSystem for GTypeSystem<'_, H> {
    fn children(&self, parent: TypeId) -> Result<Vec<TypeId>, DiscoveryError> {
        let parent_arg = Value::from(format!("0x{:x}", parent.0));
        let result = self
            .invoker
            .invoke(self.children_symbol, &Self::children_spec(), &[parent_arg])?;

        let array = pointer_value(&result.return_value)
            .map(|p| Address::new(p as usize))
            .unwrap_or_default();
        let count = result
            .outputs
            .get("n_children")
            .and_then(Value::as_u64)
            .unwrap_or(0)
            .min(MAX_CHILDREN as u64) as usize;
        if array.is_null() {
            return Ok(Vec::new());
        }

        let reader = MemoryReader::new(self.invoker.host());
        let width = reader.pointer_size();
        let read = (0..count)
            .map(|i| {
                reader
                    .read_pointer(array.offset((i * width) as isize))
                    .map(|t| TypeId(t.as_usize() as u64))
            })
            .collect::<Result<Vec<_>, _>>();

        let free_arg = Value::from(array.to_hex());
        if let Err(e) = self.invoker.invoke(self.free_symbol, &Self::free_spec(), &[free_arg]) {
            warn!(error = %e, "Failed to free child type array");
        }

        Ok(read?)
    }
}

fn pointer_value(value: &Value) -> Option<u64> {
    NativeValue::from_json(value, NativeType::Pointer)?.as_u64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use crate::host::{MemoryHost, SimulatedHost};
    use crate::invoke::CallbackBridge;
    use crate::memory::MemoryWriter;
    use std::sync::Arc;

    fn gobject_host() -> Arc<SimulatedHost> {
        let host = Arc::new(SimulatedHost::with_pointer_size(8));
        let module = host.add_module("libgobject-2.0.so.0");
        host.add_export(module, "gst_pipeline_get_type", |_, _| {
            NativeValue::Pointer(Address::new(0x100))
        });
        host.add_export(module, "g_type_children", |host, args| {
            let parent = args[0].as_address().unwrap_or_default();
            let out = args[1].as_address().unwrap_or_default();
            let children: &[u64] = if parent.as_usize() == 0x100 { &[0x200, 0x300] } else { &[] };
            let writer = MemoryWriter::new(host);
            writer
                .write_value(out, NativeValue::U32(children.len() as u32))
                .unwrap();
            let array = host.allocate(8 * (children.len() + 1)).unwrap();
            for (i, child) in children.iter().enumerate() {
                writer
                    .write_value(array.offset(8 * i as isize), NativeValue::Pointer(Address::new(*child as usize)))
                    .unwrap();
            }
            NativeValue::Pointer(array)
        });
        host.add_export(module, "g_free", |host, args| {
            if let Some(p) = args[0].as_address() {
                host.free(p).unwrap();
            }
            NativeValue::Void
        });
        host
    }

    #[test]
    fn test_query_and_children() {
        let host = gobject_host();
        let (tx, _rx) = events::channel();
        let invoker = NativeInvoker::new(Arc::clone(&host), CallbackBridge::new(Arc::clone(&host), tx));
        let types = GTypeSystem::new(&invoker, "g_type_children", "g_free");

        let root = types.query_type("gst_pipeline_get_type").unwrap();
        assert_eq!(root, TypeId(0x100));
        assert_eq!(types.children(root).unwrap(), vec![TypeId(0x200), TypeId(0x300)]);
        assert!(types.children(TypeId(0x200)).unwrap().is_empty());
        // arrays and scratch buffers were all released
        assert_eq!(host.live_allocations(), 0);
        assert_eq!(host.pointer_size(), 8);
    }

    #[test]
    fn test_missing_type_query() {
        let host = gobject_host();
        let (tx, _rx) = events::channel();
        let invoker = NativeInvoker::new(Arc::clone(&host), CallbackBridge::new(Arc::clone(&host), tx));
        let types = GTypeSystem::new(&invoker, "g_type_children", "g_free");
        assert!(matches!(
            types.query_type("gst_missing_get_type"),
            Err(DiscoveryError::Invoke(_))
        ));
    }
}

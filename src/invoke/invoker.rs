//! Signature-driven native calls

use super::callback::CallbackBridge;
use super::spec::{CallSpec, PrimitiveKind, Transfer, TypeDescriptor, TypeKind};
use super::InvokeError;
use crate::core::types::{Address, NativeValue};
use crate::host::NativeHost;
use crate::memory::{MemoryReader, MemoryWriter, MAX_STRING_LEN};
use parking_lot::Mutex;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// A native entry point resolved by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSymbol {
    pub name: String,
    pub address: Address,
    pub module: String,
}

/// Outcome of one call
///
/// Serializes flat: `{ "return": v, <out name>: v, <callback name>: id }`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InvocationResult {
    pub return_value: Value,
    pub outputs: BTreeMap<String, Value>,
    pub callbacks: BTreeMap<String, u64>,
}

impl Serialize for InvocationResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1 + self.outputs.len() + self.callbacks.len()))?;
        map.serialize_entry("return", &self.return_value)?;
        for (name, value) in &self.outputs {
            map.serialize_entry(name, value)?;
        }
        for (name, id) in &self.callbacks {
            map.serialize_entry(name, id)?;
        }
        map.end()
    }
}

/// Memory allocated by one invocation, freed on drop
///
/// `owned` is always freed. `to_callee` survives once the call went
/// through, `to_caller` once the whole invocation succeeded; until then a
/// failure frees them too.
struct ScratchArena<'h, H: NativeHost + ?Sized> {
    host: &'h H,
    owned: Vec<Address>,
    to_callee: Vec<Address>,
    to_caller: Vec<Address>,
}

impl<'h, H: NativeHost + ?Sized> ScratchArena<'h, H> {
    fn new(host: &'h H) -> Self {
        ScratchArena {
            host,
            owned: Vec::new(),
            to_callee: Vec::new(),
            to_caller: Vec::new(),
        }
    }

    fn allocate(&mut self, size: usize) -> Result<Address, InvokeError> {
        let address = self.host.allocate(size)?;
        self.owned.push(address);
        Ok(address)
    }

    /// Allocate memory that belongs to the controller if the call succeeds
    fn allocate_for_caller(&mut self, size: usize) -> Result<Address, InvokeError> {
        let address = self.host.allocate(size)?;
        self.to_caller.push(address);
        Ok(address)
    }

    fn adopt(&mut self, address: Address) {
        self.owned.push(address);
    }

    /// Memory the callee takes ownership of once it is called
    fn transfer_to_callee(&mut self, address: Address) {
        self.to_callee.push(address);
    }

    fn called(&mut self) {
        self.to_callee.clear();
    }

    fn finished(&mut self) {
        self.to_caller.clear();
    }
}

impl<H: NativeHost + ?Sized> Drop for ScratchArena<'_, H> {
    fn drop(&mut self) {
        let owned = self.owned.drain(..);
        let unclaimed = self.to_callee.drain(..).chain(self.to_caller.drain(..));
        for address in owned.chain(unclaimed) {
            if let Err(e) = self.host.free(address) {
                warn!(address = %address.to_hex(), error = %e, "Failed to free scratch memory");
            }
        }
    }
}

/// An OUT argument waiting to be read back after the call
struct PendingOutput<'s> {
    descriptor: &'s TypeDescriptor,
    buffer: Address,
}

/// Resolves symbols and marshals calls from a [`CallSpec`]
pub struct NativeInvoker<H: NativeHost + ?Sized + 'static> {
    host: Arc<H>,
    symbols: Mutex<HashMap<String, Arc<ResolvedSymbol>>>,
    callbacks: CallbackBridge<H>,
}

impl<H: NativeHost + ?Sized + 'static> NativeInvoker<H> {
    pub fn new(host: Arc<H>, callbacks: CallbackBridge<H>) -> Self {
        NativeInvoker {
            host,
            symbols: Mutex::new(HashMap::new()),
            callbacks,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn callbacks(&self) -> &CallbackBridge<H> {
        &self.callbacks
    }

    /// Resolve `name` to an export, caching hits for the session
    ///
    /// Misses are not cached and not retried.
    pub fn resolve(&self, name: &str) -> Result<Arc<ResolvedSymbol>, InvokeError> {
        if let Some(symbol) = self.symbols.lock().get(name) {
            return Ok(Arc::clone(symbol));
        }

        let modules = self.host.enumerate_modules()?;
        let symbol = modules
            .iter()
            .find_map(|module| {
                self.host.find_export(module, name).map(|address| ResolvedSymbol {
                    name: name.to_string(),
                    address,
                    module: module.name.clone(),
                })
            })
            .ok_or_else(|| InvokeError::UnresolvedSymbol(name.to_string()))?;

        debug!(symbol = name, address = %symbol.address.to_hex(), module = %symbol.module, "Resolved symbol");
        let symbol = Arc::new(symbol);
        self.symbols
            .lock()
            .insert(name.to_string(), Arc::clone(&symbol));
        Ok(symbol)
    }

    /// Number of cached symbols
    pub fn cached_symbols(&self) -> usize {
        self.symbols.lock().len()
    }

    /// Call `symbol` with `args` consumed positionally as `spec` dictates
    ///
    /// On any failure every buffer and callback the call set up is released.
    pub fn invoke(&self, symbol: &str, spec: &CallSpec, args: &[Value]) -> Result<InvocationResult, InvokeError> {
        let resolved = self.resolve(symbol)?;
        let mut arena = ScratchArena::new(&*self.host);
        let mut registered = Vec::new();

        let outcome = self.invoke_resolved(&resolved, spec, args, &mut arena, &mut registered);
        if outcome.is_err() {
            for id in registered {
                if let Err(e) = self.callbacks.release(id) {
                    warn!(id, error = %e, "Failed to release callback of a failed call");
                }
            }
        }
        outcome
    }

    fn invoke_resolved(
        &self,
        resolved: &ResolvedSymbol,
        spec: &CallSpec,
        args: &[Value],
        arena: &mut ScratchArena<'_, H>,
        registered: &mut Vec<u64>,
    ) -> Result<InvocationResult, InvokeError> {
        let host: &H = &self.host;
        let (native_args, pending, callbacks) = self.marshal(spec, args, arena, registered)?;

        let function = host.make_function(resolved.address, spec.native_signature())?;
        debug!(symbol = %resolved.name, signature = %function.signature, "Invoking");
        let ret = host.call(&function, &native_args)?;
        arena.called();

        let mut result = InvocationResult {
            return_value: self.return_to_json(&spec.returns, ret)?,
            outputs: BTreeMap::new(),
            callbacks,
        };
        for output in pending {
            let value = self.read_output(output.descriptor, output.buffer)?;
            result.outputs.insert(output.descriptor.name.clone(), value);
        }
        arena.finished();
        Ok(result)
    }

    fn marshal<'s>(
        &self,
        spec: &'s CallSpec,
        args: &[Value],
        arena: &mut ScratchArena<'_, H>,
        registered: &mut Vec<u64>,
    ) -> Result<(Vec<NativeValue>, Vec<PendingOutput<'s>>, BTreeMap<String, u64>), InvokeError> {
        let host: &H = &self.host;
        let writer = MemoryWriter::new(host);
        let mut positional = args.iter();
        let mut next_value = |name: &str| {
            positional.next().ok_or_else(|| InvokeError::InvalidArgument {
                name: name.to_string(),
                reason: "missing positional value".to_string(),
            })
        };

        let mut native_args = Vec::with_capacity(spec.arguments.len());
        let mut pending = Vec::new();
        let mut callbacks = BTreeMap::new();

        for arg in &spec.arguments {
            if arg.is_destroy || arg.is_closure {
                native_args.push(NativeValue::Pointer(Address::null()));
                continue;
            }

            if arg.is_out() {
                let width = output_width(arg, host.pointer_size())?;
                let buffer = arena.allocate(width)?;
                if arg.is_in() {
                    let value = next_value(&arg.name)?;
                    let initial = self.marshal_value(arg, value, arena)?;
                    writer.write_value(buffer, initial)?;
                }
                pending.push(PendingOutput {
                    descriptor: arg,
                    buffer,
                });
                native_args.push(NativeValue::Pointer(buffer));
                continue;
            }

            match &arg.kind {
                TypeKind::String => {
                    let value = next_value(&arg.name)?;
                    native_args.push(self.marshal_value(arg, value, arena)?);
                }
                TypeKind::Callback(subtype) => {
                    let (id, trampoline) = self.callbacks.make_trampoline(subtype)?;
                    registered.push(id);
                    callbacks.insert(arg.name.clone(), id);
                    native_args.push(NativeValue::Pointer(trampoline));
                }
                _ if arg.skipped => native_args.push(NativeValue::Pointer(Address::null())),
                TypeKind::Primitive(PrimitiveKind::Struct) => {
                    let value = next_value(&arg.name)?;
                    native_args.push(self.marshal_struct(arg, value, &mut pending, arena)?);
                }
                TypeKind::Primitive(_) => {
                    let value = next_value(&arg.name)?;
                    native_args.push(self.marshal_value(arg, value, arena)?);
                }
            }
        }

        Ok((native_args, pending, callbacks))
    }

    /// Convert one controller value to the argument's declared kind
    fn marshal_value(
        &self,
        arg: &TypeDescriptor,
        value: &Value,
        arena: &mut ScratchArena<'_, H>,
    ) -> Result<NativeValue, InvokeError> {
        match &arg.kind {
            TypeKind::String => match value {
                Value::Null => Ok(NativeValue::Pointer(Address::null())),
                Value::String(text) => {
                    let copy = MemoryWriter::new(&*self.host)
                        .alloc_utf8(text)
                        .map_err(|e| invalid(arg, e.to_string()))?;
                    if arg.transfer == Transfer::Full {
                        arena.transfer_to_callee(copy);
                    } else {
                        arena.adopt(copy);
                    }
                    Ok(NativeValue::Pointer(copy))
                }
                other => Err(invalid(arg, format!("expected a string, got {other}"))),
            },
            TypeKind::Callback(_) => Err(InvokeError::UnsupportedType(format!(
                "callback value for argument {}",
                arg.name
            ))),
            TypeKind::Primitive(PrimitiveKind::Void) => Err(InvokeError::UnsupportedType(
                format!("void argument {}", arg.name),
            )),
            TypeKind::Primitive(kind) => NativeValue::from_json(value, kind.native_type())
                .ok_or_else(|| invalid(arg, format!("{value} is not a valid {kind}"))),
        }
    }

    /// A struct passed by pointer; null with a known size means the caller
    /// allocates it, and the buffer is handed back as an output
    fn marshal_struct<'s>(
        &self,
        arg: &'s TypeDescriptor,
        value: &Value,
        pending: &mut Vec<PendingOutput<'s>>,
        arena: &mut ScratchArena<'_, H>,
    ) -> Result<NativeValue, InvokeError> {
        match (value, arg.struct_size) {
            (Value::Null, Some(size)) if size > 0 => {
                let buffer = arena.allocate_for_caller(size)?;
                pending.push(PendingOutput {
                    descriptor: arg,
                    buffer,
                });
                Ok(NativeValue::Pointer(buffer))
            }
            _ => self.marshal_value(arg, value, arena),
        }
    }

    fn return_to_json(&self, kind: &TypeKind, value: NativeValue) -> Result<Value, InvokeError> {
        match kind {
            TypeKind::Primitive(PrimitiveKind::Void) => Ok(Value::Null),
            TypeKind::String => self.read_string(value.as_address()),
            _ => Ok(value.to_json()),
        }
    }

    fn read_output(&self, arg: &TypeDescriptor, buffer: Address) -> Result<Value, InvokeError> {
        // caller-allocated struct: the buffer itself is the result
        if !arg.is_out() {
            return Ok(NativeValue::Pointer(buffer).to_json());
        }
        let reader = MemoryReader::new(&*self.host);
        match &arg.kind {
            TypeKind::String => {
                let pointer = reader.read_pointer(buffer)?;
                self.read_string(Some(pointer))
            }
            kind => Ok(reader.read_value(buffer, kind.native_type())?.to_json()),
        }
    }

    fn read_string(&self, pointer: Option<Address>) -> Result<Value, InvokeError> {
        match pointer {
            Some(p) if !p.is_null() => Ok(Value::String(
                MemoryReader::new(&*self.host).read_c_string(p, MAX_STRING_LEN)?,
            )),
            _ => Ok(Value::Null),
        }
    }
}

/// Byte width of the scratch buffer for an OUT argument
fn output_width(arg: &TypeDescriptor, pointer_size: usize) -> Result<usize, InvokeError> {
    match &arg.kind {
        TypeKind::Callback(_) => Err(InvokeError::UnsupportedType(format!(
            "callback output {}",
            arg.name
        ))),
        kind => kind.native_type().size(pointer_size).ok_or_else(|| {
            InvokeError::UnsupportedType(format!("{} output {}", kind, arg.name))
        }),
    }
}

fn invalid(arg: &TypeDescriptor, reason: String) -> InvokeError {
    InvokeError::InvalidArgument {
        name: arg.name.clone(),
        reason,
    }
}

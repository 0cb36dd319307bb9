//! Callback trampolines
//!
//! Each callback argument gets its own registration: a sequential id, the
//! callback's signature and a host trampoline. When native code enters the
//! trampoline (on any thread) the handler converts the arguments, queues a
//! `callback` event and returns the zero value of the declared return kind.
//! It never blocks on the controller.

use super::spec::{CallSpec, TypeKind};
use super::InvokeError;
use crate::core::types::{Address, NativeValue};
use crate::events::{AgentEvent, CallbackEvent, EventSender};
use crate::host::{NativeHost, TrampolineHandler};
use crate::memory::{MemoryReader, MAX_STRING_LEN};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// One live trampoline
#[derive(Debug)]
pub struct CallbackRegistration {
    pub id: u64,
    pub spec: Arc<CallSpec>,
    pub trampoline: Address,
    active: Arc<AtomicBool>,
}

impl CallbackRegistration {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Owns every trampoline created during a session
pub struct CallbackBridge<H: NativeHost + ?Sized + 'static> {
    host: Arc<H>,
    events: EventSender,
    next_id: AtomicU64,
    registrations: Mutex<HashMap<u64, CallbackRegistration>>,
}

impl<H: NativeHost + ?Sized + 'static> CallbackBridge<H> {
    pub fn new(host: Arc<H>, events: EventSender) -> Self {
        CallbackBridge {
            host,
            events,
            next_id: AtomicU64::new(1),
            registrations: Mutex::new(HashMap::new()),
        }
    }

    /// Register a trampoline for a callback with signature `subtype`
    pub fn make_trampoline(&self, subtype: &CallSpec) -> Result<(u64, Address), InvokeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let spec = Arc::new(subtype.clone());
        let active = Arc::new(AtomicBool::new(true));

        let handler: TrampolineHandler = {
            let host = Arc::clone(&self.host);
            let events = self.events.clone();
            let spec = Arc::clone(&spec);
            let active = Arc::clone(&active);
            Arc::new(move |args: &[NativeValue]| {
                let ret = NativeValue::zero(spec.returns.native_type());
                if !active.load(Ordering::Acquire) {
                    trace!(id, "Inactive callback fired");
                    return ret;
                }
                let data = convert_arguments(&*host, &spec, args);
                if events.send(AgentEvent::Callback(CallbackEvent { id, data })).is_err() {
                    trace!(id, "Controller gone, dropping callback event");
                }
                ret
            })
        };

        let trampoline = self
            .host
            .make_trampoline(&subtype.native_signature(), handler)?;
        debug!(id, trampoline = %trampoline.to_hex(), "Callback registered");

        self.registrations.lock().insert(
            id,
            CallbackRegistration {
                id,
                spec,
                trampoline,
                active,
            },
        );
        Ok((id, trampoline))
    }

    /// Unregister `id` and release its trampoline
    pub fn release(&self, id: u64) -> Result<(), InvokeError> {
        let registration = self
            .registrations
            .lock()
            .remove(&id)
            .ok_or(InvokeError::UnknownCallback(id))?;
        registration.active.store(false, Ordering::Release);
        self.host.release_trampoline(registration.trampoline)?;
        debug!(id, "Callback released");
        Ok(())
    }

    /// Turn every handler into a no-op; trampolines stay callable
    pub fn deactivate_all(&self) {
        for registration in self.registrations.lock().values() {
            registration.active.store(false, Ordering::Release);
        }
    }

    pub fn is_active(&self, id: u64) -> bool {
        self.registrations
            .lock()
            .get(&id)
            .is_some_and(CallbackRegistration::is_active)
    }

    pub fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.registrations.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.registrations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.lock().is_empty()
    }
}

impl<H: NativeHost + ?Sized + 'static> Drop for CallbackBridge<H> {
    fn drop(&mut self) {
        for (id, registration) in self.registrations.get_mut().drain() {
            registration.active.store(false, Ordering::Release);
            if let Err(e) = self.host.release_trampoline(registration.trampoline) {
                warn!(id, error = %e, "Failed to release trampoline");
            }
        }
    }
}

/// Name each argument; strings are read eagerly, everything else is raw
fn convert_arguments<H: NativeHost + ?Sized>(
    host: &H,
    spec: &CallSpec,
    args: &[NativeValue],
) -> Map<String, Value> {
    let reader = MemoryReader::new(host);
    spec.arguments
        .iter()
        .zip(args)
        .map(|(descriptor, value)| {
            let converted = match (&descriptor.kind, value.as_address()) {
                (TypeKind::String, Some(ptr)) if !ptr.is_null() => reader
                    .read_c_string(ptr, MAX_STRING_LEN)
                    .map(Value::String)
                    .unwrap_or_else(|e| {
                        debug!(arg = %descriptor.name, error = %e, "Unreadable callback string");
                        Value::Null
                    }),
                (TypeKind::String, _) => Value::Null,
                _ => value.to_json(),
            };
            (descriptor.name.clone(), converted)
        })
        .collect()
}

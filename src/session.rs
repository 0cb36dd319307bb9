//! One attach: everything that lives from `init` until the agent goes away
//!
//! The symbol cache, callback table and instance registry are fields of
//! the session rather than process-wide statics, so sessions are isolated
//! from each other.

use crate::config::{Config, DiscoveryConfig, ScannerConfig};
use crate::core::types::{InstanceDescriptor, TypeId};
use crate::discovery::{
    DiscoveryError, GTypeSystem, InstanceRegistry, TypeHierarchyWalker, TypeSystem, WalkSummary,
};
use crate::events::{AgentEvent, EventSender};
use crate::host::NativeHost;
use crate::invoke::{CallSpec, CallbackBridge, InvocationResult, InvokeError, NativeInvoker};
use crate::memory::ScanProgress;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Discovery and invocation state for one target
pub struct DiscoverySession<H: NativeHost + ?Sized + 'static> {
    host: Arc<H>,
    discovery: DiscoveryConfig,
    scanner: ScannerConfig,
    registry: InstanceRegistry,
    invoker: NativeInvoker<H>,
    events: EventSender,
    root: Option<TypeId>,
}

impl<H: NativeHost + ?Sized + 'static> DiscoverySession<H> {
    pub fn new(host: Arc<H>, config: &Config, events: EventSender) -> Self {
        let callbacks = CallbackBridge::new(Arc::clone(&host), events.clone());
        DiscoverySession {
            invoker: NativeInvoker::new(Arc::clone(&host), callbacks),
            host,
            discovery: config.discovery.clone(),
            scanner: config.scanner.clone(),
            registry: InstanceRegistry::new(),
            events,
            root: None,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn invoker(&self) -> &NativeInvoker<H> {
        &self.invoker
    }

    pub fn callbacks(&self) -> &CallbackBridge<H> {
        self.invoker.callbacks()
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// Root type found by [`DiscoverySession::attach`]
    pub fn root_type(&self) -> Option<TypeId> {
        self.root
    }

    /// Snapshot of discovered instances; empty before any discovery
    pub fn enumerate(&self) -> Vec<InstanceDescriptor> {
        self.registry.enumerate()
    }

    /// Resolve the tracked class's symbols, then walk its hierarchy
    pub fn attach(&mut self) -> Result<WalkSummary, DiscoveryError> {
        let constructor = self.invoker.resolve(&self.discovery.constructor_symbol)?;
        debug!(symbol = %constructor.name, address = %constructor.address.to_hex(), "Constructor present");

        let types = GTypeSystem::new(
            &self.invoker,
            &self.discovery.children_symbol,
            &self.discovery.free_symbol,
        );
        let root = types.query_type(&self.discovery.type_query_symbol)?;
        info!(class = %self.discovery.class_name, %root, "Tracking type");
        self.root = Some(root);
        Ok(self.walk_from(root))
    }

    /// Walk again from the root found at attach
    pub fn rescan(&mut self) -> Result<WalkSummary, DiscoveryError> {
        let root = self
            .root
            .ok_or_else(|| DiscoveryError::TypeQuery("no root type; attach first".to_string()))?;
        Ok(self.walk_from(root))
    }

    /// Walk `root` using the target's own type system
    fn walk_from(&mut self, root: TypeId) -> WalkSummary {
        let types = GTypeSystem::new(
            &self.invoker,
            &self.discovery.children_symbol,
            &self.discovery.free_symbol,
        );
        walk(
            &*self.host,
            &self.scanner,
            &self.discovery,
            &self.events,
            root,
            &types,
            &mut self.registry,
        )
    }

    /// Walk `root` with an explicit type system
    pub fn discover<T: TypeSystem + ?Sized>(&mut self, root: TypeId, types: &T) -> WalkSummary {
        walk(
            &*self.host,
            &self.scanner,
            &self.discovery,
            &self.events,
            root,
            types,
            &mut self.registry,
        )
    }

    pub fn invoke(&self, symbol: &str, spec: &CallSpec, args: &[Value]) -> Result<InvocationResult, InvokeError> {
        self.invoker.invoke(symbol, spec, args)
    }
}

fn walk<H: NativeHost + ?Sized, T: TypeSystem + ?Sized>(
    host: &H,
    scanner: &ScannerConfig,
    discovery: &DiscoveryConfig,
    events: &EventSender,
    root: TypeId,
    types: &T,
    registry: &mut InstanceRegistry,
) -> WalkSummary {
    let observer = |p: ScanProgress| {
        debug!(
            ranges_done = p.ranges_done,
            ranges_total = p.ranges_total,
            bytes = p.bytes_scanned,
            "Scan progress"
        )
    };
    let options = scanner.scan_options(discovery.profile.pointer_size);
    let mut walker = TypeHierarchyWalker::new(host, options, &discovery.profile);
    if scanner.report_progress {
        walker = walker.with_progress(&observer);
    }

    let summary = walker.walk_and_discover(root, types, registry, |descriptor| {
        let _ = events.send(AgentEvent::InstanceFound(descriptor.clone()));
    });
    info!(
        types = summary.types_visited,
        candidates = summary.candidates_checked,
        new = summary.registered,
        total = registry.len(),
        "Discovery pass complete"
    );
    summary
}

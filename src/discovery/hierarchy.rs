//! Type hierarchy traversal
//!
//! The walk runs locate→validate for a root type and then for every
//! descendant reported by a [`TypeSystem`], using an explicit LIFO work
//! queue so deep hierarchies never grow the call stack.

use super::locator::{ClassPointerLocator, TypeValueLocator};
use super::registry::InstanceRegistry;
use super::validator::{AbiProfile, InstanceValidator};
use super::DiscoveryError;
use crate::core::types::{InstanceDescriptor, TypeId};
use crate::host::MemoryHost;
use crate::memory::{ScanOptions, ScanProgress};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// Source of a type's direct children
pub trait TypeSystem {
    fn children(&self, parent: TypeId) -> Result<Vec<TypeId>, DiscoveryError>;
}

/// Fixed parent → children map
#[derive(Debug, Clone, Default)]
pub struct StaticTypeTree {
    children: BTreeMap<TypeId, Vec<TypeId>>,
}

impl StaticTypeTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `children` under `parent`
    pub fn insert(&mut self, parent: TypeId, children: impl IntoIterator<Item = TypeId>) {
        self.children.entry(parent).or_default().extend(children);
    }

    pub fn with_children(mut self, parent: TypeId, children: impl IntoIterator<Item = TypeId>) -> Self {
        self.insert(parent, children);
        self
    }
}

impl TypeSystem for StaticTypeTree {
    fn children(&self, parent: TypeId) -> Result<Vec<TypeId>, DiscoveryError> {
        Ok(self.children.get(&parent).cloned().unwrap_or_default())
    }
}

/// Counters for one walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkSummary {
    pub types_visited: usize,
    pub candidates_checked: usize,
    pub registered: usize,
}

/// Runs the discovery chain over a type hierarchy
pub struct TypeHierarchyWalker<'a, H: MemoryHost + ?Sized> {
    host: &'a H,
    options: ScanOptions,
    profile: &'a AbiProfile,
    progress: Option<&'a dyn Fn(ScanProgress)>,
}

impl<'a, H: MemoryHost + ?Sized> TypeHierarchyWalker<'a, H> {
    pub fn new(host: &'a H, options: ScanOptions, profile: &'a AbiProfile) -> Self {
        TypeHierarchyWalker {
            host,
            options,
            profile,
            progress: None,
        }
    }

    /// Report scan progress for every locator pass
    pub fn with_progress(mut self, observer: &'a dyn Fn(ScanProgress)) -> Self {
        self.progress = Some(observer);
        self
    }

    /// Locate and validate instances of exactly `type_id`
    ///
    /// Returns the validated descriptors and the number of candidates
    /// checked. Faults are logged and skipped.
    pub fn discover_type(&self, type_id: TypeId) -> (Vec<InstanceDescriptor>, usize) {
        let width = self.profile.pointer_size;
        let mut types = TypeValueLocator::new(self.host, self.options.clone()).with_pointer_size(width);
        let mut pointers = ClassPointerLocator::new(self.host, self.options.clone()).with_pointer_size(width);
        if let Some(observer) = self.progress {
            types = types.with_progress(observer);
            pointers = pointers.with_progress(observer);
        }
        let validator = InstanceValidator::new(self.host, self.profile);

        let classes = match types.locate_type_value(type_id) {
            Ok(classes) => classes,
            Err(e) => {
                warn!(%type_id, error = %e, "Type id scan failed");
                return (Vec::new(), 0);
            }
        };

        let mut found = Vec::new();
        let mut checked = HashSet::new();
        for class in classes {
            let candidates = match pointers.locate_pointers_to(class) {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(class = %class.to_hex(), error = %e, "Class pointer scan failed");
                    continue;
                }
            };
            for candidate in candidates {
                if !checked.insert(candidate) {
                    continue;
                }
                debug!(candidate = %candidate.to_hex(), %type_id, "Validating candidate");
                if let Some(descriptor) = validator.validate(candidate) {
                    found.push(descriptor);
                }
            }
        }
        (found, checked.len())
    }

    /// Walk `root` and its descendants, registering every validated instance
    ///
    /// `on_new` runs once for each descriptor the registry did not know yet.
    pub fn walk_and_discover<T, F>(
        &self,
        root: TypeId,
        types: &T,
        registry: &mut InstanceRegistry,
        mut on_new: F,
    ) -> WalkSummary
    where
        T: TypeSystem + ?Sized,
        F: FnMut(&InstanceDescriptor),
    {
        let mut summary = WalkSummary::default();
        let mut queue = vec![root];
        let mut visited = HashSet::new();

        while let Some(type_id) = queue.pop() {
            if !visited.insert(type_id) {
                continue;
            }
            summary.types_visited += 1;

            let (found, checked) = self.discover_type(type_id);
            summary.candidates_checked += checked;
            for descriptor in found {
                if registry.register(descriptor.clone()) {
                    info!(pointer = %descriptor.pointer.to_hex(), name = %descriptor.name, "Instance found");
                    summary.registered += 1;
                    on_new(&descriptor);
                }
            }

            let children = types.children(type_id).unwrap_or_else(|e| {
                warn!(%type_id, error = %e, "Listing child types failed");
                Vec::new()
            });
            debug!(%type_id, children = children.len(), "Queued child types");
            queue.extend(children.into_iter().rev());
        }

        summary
    }
}

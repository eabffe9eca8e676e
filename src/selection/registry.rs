//! Registry of all configured selection descriptors.
//!
//! The registry owns every [`SelectionDescriptor`]. It is filled once during initialization
//! and only read afterwards, so it can be shared by reference between any number of
//! exploration paths. Paths never hold descriptors themselves, only [`DescriptorId`]s issued
//! here.

use std::sync::atomic::{AtomicUsize, Ordering};

use rustc_hash::FxHashMap;

use crate::{
    runtime::{ModuleCatalog, ModuleInstance},
    selection::{ConfigSource, DescriptorId, SelectionDescriptor},
    Error, Result,
};

/// Owner of all configured selection descriptors.
///
/// # Example
///
/// ```rust
/// use codesel::{
///     runtime::{ModuleInstance, StaticCatalog},
///     selection::{DescriptorRegistry, MemoryConfig},
/// };
///
/// let catalog = StaticCatalog::new().with_module("app.exe", 0x1000, 0x100);
/// let config = MemoryConfig::new().with_selection("main", "app.exe", None, &[(0, 0x10)], &[]);
///
/// let mut registry = DescriptorRegistry::new();
/// assert!(registry.initialize("main", &config, &catalog));
/// assert!(!registry.initialize("missing", &config, &catalog));
///
/// let module = ModuleInstance::new("app.exe", "pid-1", 0x1000, 0x100);
/// assert!(registry.resolve(&module).is_some());
/// ```
#[derive(Debug, Default)]
pub struct DescriptorRegistry {
    descriptors: Vec<SelectionDescriptor>,
    by_id: FxHashMap<String, DescriptorId>,
    by_module: FxHashMap<String, Vec<DescriptorId>>,
    scans: AtomicUsize,
}

impl DescriptorRegistry {
    /// Creates an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a compiled descriptor.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateDescriptor`] if a descriptor with the same id is already
    /// registered; the registry is left unchanged.
    pub fn register(&mut self, descriptor: SelectionDescriptor) -> Result<DescriptorId> {
        if self.by_id.contains_key(descriptor.id()) {
            return Err(Error::DuplicateDescriptor(descriptor.id().to_string()));
        }

        let id = DescriptorId(self.descriptors.len());
        self.by_id.insert(descriptor.id().to_string(), id);
        self.by_module
            .entry(descriptor.module_id().to_string())
            .or_default()
            .push(id);
        self.descriptors.push(descriptor);

        Ok(id)
    }

    /// Read, compile and register one configuration entry.
    ///
    /// Failures are logged and reported through the return value; they never affect
    /// descriptors that were, or will be, registered from other entries.
    ///
    /// # Arguments
    /// * `entry` - The configuration section of the entry
    /// * `config` - The configuration store
    /// * `catalog` - Resolves the module to its native base and size
    pub fn initialize(
        &mut self,
        entry: &str,
        config: &dyn ConfigSource,
        catalog: &dyn ModuleCatalog,
    ) -> bool {
        let result = SelectionDescriptor::from_config(entry, config, catalog);
        self.accept(entry, result)
    }

    /// Register the outcome of compiling `entry`, logging any failure.
    pub(crate) fn accept(&mut self, entry: &str, result: Result<SelectionDescriptor>) -> bool {
        match result.and_then(|descriptor| self.register(descriptor)) {
            Ok(id) => {
                log::debug!("Registered code selection '{}' as {}", entry, id);
                true
            }
            Err(error) => {
                log::warn!("Skipping code selection '{}': {}", entry, error);
                false
            }
        }
    }

    /// Access a descriptor by id
    #[must_use]
    pub fn get(&self, id: DescriptorId) -> Option<&SelectionDescriptor> {
        self.descriptors.get(id.0)
    }

    /// Find a descriptor by its configured id
    #[must_use]
    pub fn find(&self, id: &str) -> Option<DescriptorId> {
        self.by_id.get(id).copied()
    }

    /// Enumerate all configured descriptors in registration order
    pub fn descriptors(&self) -> impl Iterator<Item = &SelectionDescriptor> + '_ {
        self.descriptors.iter()
    }

    /// Ids of the descriptors targeting `module_id`, in registration order
    #[must_use]
    pub fn for_module(&self, module_id: &str) -> &[DescriptorId] {
        self.by_module
            .get(module_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Module ids that at least one descriptor targets
    pub fn modules(&self) -> impl Iterator<Item = &str> + '_ {
        self.by_module.keys().map(String::as_str)
    }

    /// Number of registered descriptors
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns `true` if no descriptor is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Find the descriptor governing a module instance.
    ///
    /// A descriptor naming the instance's context exactly wins over a wildcard descriptor for
    /// the same module; among equally specific descriptors the first registered one wins.
    /// `None` means the instance runs natively.
    #[must_use]
    pub fn resolve(&self, module: &ModuleInstance) -> Option<DescriptorId> {
        self.scans.fetch_add(1, Ordering::Relaxed);

        let candidates = self.for_module(&module.module_id);
        let applies = |id: &&DescriptorId| {
            self.get(**id)
                .is_some_and(|d| d.applies_to(&module.module_id, &module.context_id))
        };

        candidates
            .iter()
            .filter(applies)
            .find(|id| self.get(**id).is_some_and(|d| !d.context_id().is_any()))
            .or_else(|| candidates.iter().find(applies))
            .copied()
    }

    /// How many times [`resolve`](Self::resolve) scanned the registry
    #[must_use]
    pub fn resolution_scans(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }
}

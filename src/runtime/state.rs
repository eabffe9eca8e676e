//! Per-path selection state.
//!
//! Every exploration path owns one [`PathState`]. It remembers which module instance the path
//! is currently executing, which descriptor governs it, and every instance-to-descriptor
//! association resolved so far on this path, so that returning into a module never needs a
//! second registry scan.
//!
//! # Forking
//!
//! When a path forks, each side gets its own state via [`PathState::fork`]. The association
//! map is an `imbl::HashMap`, so the fork is O(1) through structural sharing while all later
//! updates stay private to the side that makes them.
//!
//! # Descriptor References
//!
//! The state holds [`DescriptorId`]s, never descriptors. Every query that needs a bitmap takes
//! the [`DescriptorRegistry`] that issued the ids.

use imbl::HashMap as ImHashMap;

use crate::{
    runtime::ModuleInstance,
    selection::{DescriptorId, DescriptorRegistry},
};

/// Selection state of one exploration path.
///
/// # Example
///
/// ```rust
/// use codesel::{
///     runtime::{ModuleInstance, PathState, StaticCatalog},
///     selection::{DescriptorRegistry, MemoryConfig},
/// };
///
/// let catalog = StaticCatalog::new().with_module("M", 0x1000, 0x100);
/// let config = MemoryConfig::new().with_selection("m", "M", None, &[(0x0, 0x10)], &[(0x8, 0x10)]);
/// let mut registry = DescriptorRegistry::new();
/// registry.initialize("m", &config, &catalog);
///
/// let module = ModuleInstance::new("M", "pid-1", 0x1000, 0x100);
/// let mut path = PathState::new();
/// path.enter(&registry, &module);
///
/// let fork = path.fork();
/// path.leave_all();
///
/// assert!(!path.is_symbolic(&registry, 0x1005));
/// assert!(fork.is_symbolic(&registry, 0x1005));
/// ```
#[derive(Debug, Clone, Default)]
pub struct PathState {
    /// `None` while execution is outside every selectable module
    current_module: Option<ModuleInstance>,
    /// Every instance resolved on this path, including those without a descriptor
    active_modules: ImHashMap<ModuleInstance, Option<DescriptorId>>,
    /// The most recently activated pair
    active: Option<(ModuleInstance, Option<DescriptorId>)>,
}

impl PathState {
    /// State of a fresh path, outside any module.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve and record the descriptor governing `module` on this path.
    ///
    /// Repeated calls for the instance that is already active return the cached result
    /// without touching the association map or the registry. A miss in the association map
    /// scans the registry once; the outcome is recorded even when no descriptor matched.
    ///
    /// # Arguments
    /// * `registry` - The registry that issued all ids held by this state
    /// * `module` - The module instance to activate
    pub fn activate_module(
        &mut self,
        registry: &DescriptorRegistry,
        module: &ModuleInstance,
    ) -> Option<DescriptorId> {
        if let Some((active, descriptor)) = &self.active {
            if active == module {
                return *descriptor;
            }
        }

        let descriptor = match self.active_modules.get(module) {
            Some(descriptor) => *descriptor,
            None => {
                let descriptor = registry.resolve(module);
                self.active_modules.insert(module.clone(), descriptor);
                descriptor
            }
        };

        self.active = Some((module.clone(), descriptor));
        descriptor
    }

    /// Make `module` the current module of this path and activate its descriptor.
    pub fn enter(
        &mut self,
        registry: &DescriptorRegistry,
        module: &ModuleInstance,
    ) -> Option<DescriptorId> {
        let descriptor = self.activate_module(registry, module);
        self.current_module = Some(module.clone());
        descriptor
    }

    /// Record that execution left every selectable module.
    ///
    /// Associations resolved so far are kept for when execution comes back.
    pub fn leave_all(&mut self) {
        self.current_module = None;
    }

    /// Check whether the instruction at `absolute_pc` needs instrumentation right now.
    ///
    /// Answers from the descriptor governing the current module, without going through the
    /// transition machinery. `false` whenever the path is outside every module, the current
    /// module has no descriptor, or the address lies outside the module.
    #[must_use]
    pub fn is_symbolic(&self, registry: &DescriptorRegistry, absolute_pc: u64) -> bool {
        let Some(module) = &self.current_module else {
            return false;
        };

        let Some(descriptor) = self
            .descriptor_of(module)
            .and_then(|id| registry.get(id))
        else {
            return false;
        };

        module
            .offset_of(absolute_pc)
            .and_then(|offset| descriptor.lookup(offset))
            .unwrap_or(false)
    }

    /// The module currently executing on this path
    #[must_use]
    pub fn current_module(&self) -> Option<&ModuleInstance> {
        self.current_module.as_ref()
    }

    /// The most recently activated module instance
    #[must_use]
    pub fn active_module(&self) -> Option<&ModuleInstance> {
        self.active.as_ref().map(|(module, _)| module)
    }

    /// The descriptor of the most recently activated module instance
    #[must_use]
    pub fn active_descriptor(&self) -> Option<DescriptorId> {
        self.active.as_ref().and_then(|(_, descriptor)| *descriptor)
    }

    /// The recorded association for `module`: `None` if never resolved on this path,
    /// `Some(None)` if resolved to "no descriptor".
    #[must_use]
    pub fn cached(&self, module: &ModuleInstance) -> Option<Option<DescriptorId>> {
        self.active_modules.get(module).copied()
    }

    /// Number of module instances resolved on this path
    #[must_use]
    pub fn known_modules(&self) -> usize {
        self.active_modules.len()
    }

    /// Create an independent copy for a forked path.
    ///
    /// Descriptor ids are copied, descriptors are not; both states keep referring to the same
    /// registry.
    #[must_use]
    pub fn fork(&self) -> Self {
        self.clone()
    }

    fn descriptor_of(&self, module: &ModuleInstance) -> Option<DescriptorId> {
        match &self.active {
            Some((active, descriptor)) if active == module => *descriptor,
            _ => self.cached(module).flatten(),
        }
    }
}

//! Module identities as reported by the module-execution detector.
//!
//! A [`ModuleInstance`] is one mapping of a module into one execution context. The same
//! module may be mapped into many contexts (processes), each yielding its own instance;
//! instances are the keys under which paths remember which descriptor governs them.
//!
//! A [`ModuleCatalog`] answers the static question "what are the native base and size of
//! module X", which range validation needs before any code runs.

use std::fmt;

use rustc_hash::FxHashMap;

/// Native base and mapped size of a module image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleLayout {
    /// Address the module's ranges are written against
    pub native_base: u64,
    /// Mapped size in units
    pub size: u64,
}

/// One module mapped into one execution context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleInstance {
    /// Logical module name, matched against a descriptor's module id
    pub module_id: String,
    /// Identity of the execution context (process) the module is mapped into
    pub context_id: String,
    /// Address the module's ranges are written against
    pub native_base: u64,
    /// Address the module is actually mapped at in this context
    pub load_base: u64,
    /// Mapped size in units
    pub size: u64,
}

impl ModuleInstance {
    /// Creates an instance mapped at its native base.
    #[must_use]
    pub fn new(
        module_id: impl Into<String>,
        context_id: impl Into<String>,
        native_base: u64,
        size: u64,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            context_id: context_id.into(),
            native_base,
            load_base: native_base,
            size,
        }
    }

    /// Relocate the instance to a different load base.
    #[must_use]
    pub fn with_load_base(mut self, load_base: u64) -> Self {
        self.load_base = load_base;
        self
    }

    /// Offset of a runtime address from the start of the module, if the address is not
    /// below the load base.
    ///
    /// The result is not checked against the module size; callers compare it with the size
    /// of the bitmap they are about to index.
    #[must_use]
    pub fn offset_of(&self, pc: u64) -> Option<u64> {
        pc.checked_sub(self.load_base)
    }

    /// Translate a runtime address into the module's native address space.
    #[must_use]
    pub fn to_native(&self, pc: u64) -> Option<u64> {
        self.offset_of(pc)
            .and_then(|offset| self.native_base.checked_add(offset))
    }

    /// Check whether a runtime address lies within the mapped image.
    #[must_use]
    pub fn contains(&self, pc: u64) -> bool {
        self.offset_of(pc).is_some_and(|offset| offset < self.size)
    }

    /// Native base and size of this instance
    #[must_use]
    pub fn layout(&self) -> ModuleLayout {
        ModuleLayout {
            native_base: self.native_base,
            size: self.size,
        }
    }
}

impl fmt::Display for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} [{:#x}+{:#x}]",
            self.module_id, self.context_id, self.load_base, self.size
        )
    }
}

/// Static module information provided by the module-detection collaborator.
pub trait ModuleCatalog: Sync {
    /// Native base and size of the named module, or `None` if it is unknown.
    fn layout(&self, module_id: &str) -> Option<ModuleLayout>;
}

/// A [`ModuleCatalog`] backed by a fixed table.
///
/// # Example
///
/// ```rust
/// use codesel::runtime::{ModuleCatalog, StaticCatalog};
///
/// let catalog = StaticCatalog::new().with_module("app.exe", 0x40_0000, 0x2000);
/// assert_eq!(catalog.layout("app.exe").map(|l| l.size), Some(0x2000));
/// assert!(catalog.layout("other.dll").is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    modules: FxHashMap<String, ModuleLayout>,
}

impl StaticCatalog {
    /// Creates an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module
    pub fn insert(&mut self, module_id: impl Into<String>, native_base: u64, size: u64) {
        self.modules
            .insert(module_id.into(), ModuleLayout { native_base, size });
    }

    /// Register a module, builder style
    #[must_use]
    pub fn with_module(
        mut self,
        module_id: impl Into<String>,
        native_base: u64,
        size: u64,
    ) -> Self {
        self.insert(module_id, native_base, size);
        self
    }
}

impl ModuleCatalog for StaticCatalog {
    fn layout(&self, module_id: &str) -> Option<ModuleLayout> {
        self.modules.get(module_id).copied()
    }
}

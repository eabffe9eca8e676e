//! Selection descriptors: one compiled configuration entry.
//!
//! A [`SelectionDescriptor`] binds a module id and a context id to the bitmap compiled from
//! the entry's range lists. Descriptors are created once while the selector is initialized
//! and are read-only afterwards; paths refer to them through [`DescriptorId`]s.

use std::fmt;

use crate::{
    runtime::ModuleCatalog,
    selection::{
        build_bitmap, compile_ranges,
        config::{key, ConfigSource, KEY_CONTEXT, KEY_EXCLUDE, KEY_ID, KEY_INCLUDE, KEY_MODULE},
        InstrumentationMap,
    },
    Error, Result,
};

/// Context id value that matches any execution context.
pub const WILDCARD_CONTEXT: &str = "*";

/// Index of a descriptor inside its [`DescriptorRegistry`](crate::selection::DescriptorRegistry).
///
/// Ids are only meaningful for the registry that issued them, which outlives every path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorId(pub(crate) usize);

impl DescriptorId {
    /// Position of the descriptor in registration order
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The execution context a descriptor applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContextId {
    /// Applies in every context the module is mapped into
    Any,
    /// Applies only in the named context
    Named(String),
}

impl ContextId {
    /// Interpret a configured context value; absent or `"*"` means any context.
    #[must_use]
    pub fn from_config(value: Option<String>) -> Self {
        match value {
            None => ContextId::Any,
            Some(value) if value == WILDCARD_CONTEXT => ContextId::Any,
            Some(value) => ContextId::Named(value),
        }
    }

    /// Check whether this context id applies to `context`.
    #[must_use]
    pub fn matches(&self, context: &str) -> bool {
        match self {
            ContextId::Any => true,
            ContextId::Named(name) => name == context,
        }
    }

    /// Returns `true` for the wildcard
    #[must_use]
    pub fn is_any(&self) -> bool {
        matches!(self, ContextId::Any)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextId::Any => f.write_str(WILDCARD_CONTEXT),
            ContextId::Named(name) => f.write_str(name),
        }
    }
}

/// One compiled module-selection entry.
///
/// The bitmap always holds exactly `module_size` units. Two descriptors are equal iff their
/// ids are equal.
#[derive(Debug, Clone)]
pub struct SelectionDescriptor {
    id: String,
    module_id: String,
    context_id: ContextId,
    native_base: u64,
    module_size: u64,
    bitmap: InstrumentationMap,
}

impl SelectionDescriptor {
    /// Compile a descriptor from raw range lists.
    ///
    /// # Arguments
    /// * `id` - Unique id of the configuration entry
    /// * `module_id` - The module the entry targets
    /// * `context_id` - The execution context the entry targets
    /// * `native_base` - The module's native base, as reported by the module catalog
    /// * `module_size` - The module's mapped size, as reported by the module catalog
    /// * `include` - Include ranges, relative to the native base
    /// * `exclude` - Exclude ranges, relative to the native base
    ///
    /// # Errors
    /// Returns [`Error::InvalidRange`] or [`Error::RangeOutOfBounds`] if any range fails
    /// validation, and [`Error::Config`] if the module does not fit in memory.
    pub fn new(
        id: impl Into<String>,
        module_id: impl Into<String>,
        context_id: ContextId,
        native_base: u64,
        module_size: u64,
        include: &[(u64, u64)],
        exclude: &[(u64, u64)],
    ) -> Result<Self> {
        let id = id.into();
        let units = usize::try_from(module_size)
            .map_err(|_| config_error!("Module size {:#x} of '{}' is too large", module_size, id))?;

        let include = compile_ranges(include, native_base, module_size)?;
        let exclude = compile_ranges(exclude, native_base, module_size)?;
        let bitmap = build_bitmap(&include, &exclude, native_base, units);

        Ok(SelectionDescriptor {
            id,
            module_id: module_id.into(),
            context_id,
            native_base,
            module_size,
            bitmap,
        })
    }

    /// Read one configuration entry and compile it.
    ///
    /// # Arguments
    /// * `entry` - The configuration section of the entry
    /// * `config` - The configuration store
    /// * `catalog` - Resolves the module to its native base and size
    ///
    /// # Errors
    /// Returns [`Error::MissingKey`] without a module key, [`Error::UnknownModule`] if the
    /// catalog does not know the module, and any range validation error.
    pub fn from_config(
        entry: &str,
        config: &dyn ConfigSource,
        catalog: &dyn ModuleCatalog,
    ) -> Result<Self> {
        let module_key = key(entry, KEY_MODULE);
        let module_id = config
            .get_string(&module_key)
            .ok_or(Error::MissingKey(module_key))?;
        if module_id.is_empty() {
            return Err(config_error!("Entry '{}' names an empty module", entry));
        }

        let id = config
            .get_string(&key(entry, KEY_ID))
            .unwrap_or_else(|| entry.to_string());
        let context_id = ContextId::from_config(config.get_string(&key(entry, KEY_CONTEXT)));

        let layout = catalog
            .layout(&module_id)
            .ok_or_else(|| Error::UnknownModule(module_id.clone()))?;

        let include = config
            .get_ranges(&key(entry, KEY_INCLUDE))
            .unwrap_or_default();
        let exclude = config
            .get_ranges(&key(entry, KEY_EXCLUDE))
            .unwrap_or_default();

        SelectionDescriptor::new(
            id,
            module_id,
            context_id,
            layout.native_base,
            layout.size,
            &include,
            &exclude,
        )
    }

    /// Unique id of the configuration entry
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The module this descriptor targets
    #[must_use]
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// The execution context this descriptor targets
    #[must_use]
    pub fn context_id(&self) -> &ContextId {
        &self.context_id
    }

    /// Native base the ranges were compiled against
    #[must_use]
    pub fn native_base(&self) -> u64 {
        self.native_base
    }

    /// Size of the module, and of the bitmap
    #[must_use]
    pub fn module_size(&self) -> u64 {
        self.module_size
    }

    /// The compiled bitmap
    #[must_use]
    pub fn bitmap(&self) -> &InstrumentationMap {
        &self.bitmap
    }

    /// Check whether the descriptor applies to a module mapped in `context`.
    #[must_use]
    pub fn applies_to(&self, module_id: &str, context: &str) -> bool {
        self.module_id == module_id && self.context_id.matches(context)
    }

    /// Look up a module offset; `None` if the offset lies outside the module.
    #[must_use]
    pub fn lookup(&self, offset: u64) -> Option<bool> {
        if offset >= self.module_size {
            return None;
        }
        usize::try_from(offset).ok().map(|unit| self.bitmap.get(unit))
    }

    /// Number of units selected for instrumentation
    #[must_use]
    pub fn instrumented_units(&self) -> usize {
        self.bitmap.count()
    }
}

impl PartialEq for SelectionDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SelectionDescriptor {}

impl std::hash::Hash for SelectionDescriptor {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for SelectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}@{} ({}/{} units)",
            self.id,
            self.module_id,
            self.context_id,
            self.instrumented_units(),
            self.module_size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{catalog, scenario_config};

    #[test]
    fn bitmap_matches_module_size() {
        let desc = SelectionDescriptor::new(
            "m",
            "M",
            ContextId::Any,
            0x1000,
            0x100,
            &[(0x0, 0x10)],
            &[(0x8, 0x10)],
        )
        .unwrap();

        assert_eq!(desc.bitmap().len() as u64, desc.module_size());
        assert_eq!(desc.instrumented_units(), 8);
        assert_eq!(desc.lookup(0x7), Some(true));
        assert_eq!(desc.lookup(0x8), Some(false));
        assert_eq!(desc.lookup(0x100), None);
    }

    #[test]
    fn out_of_module_range_produces_no_descriptor() {
        let result = SelectionDescriptor::new(
            "m",
            "M",
            ContextId::Any,
            0x1000,
            0x100,
            &[(0x0, 0x200)],
            &[],
        );

        assert!(matches!(result, Err(Error::RangeOutOfBounds { .. })));
    }

    #[test]
    fn equality_by_id() {
        let a = SelectionDescriptor::new("same", "A", ContextId::Any, 0, 0x10, &[], &[]).unwrap();
        let b = SelectionDescriptor::new(
            "same",
            "B",
            ContextId::Named("7".into()),
            0,
            0x20,
            &[(0, 1)],
            &[],
        )
        .unwrap();
        let c = SelectionDescriptor::new("other", "A", ContextId::Any, 0, 0x10, &[], &[]).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn context_matching() {
        assert!(ContextId::Any.matches("anything"));
        assert!(ContextId::Named("a".into()).matches("a"));
        assert!(!ContextId::Named("a".into()).matches("b"));
        assert_eq!(ContextId::from_config(Some("*".into())), ContextId::Any);
        assert_eq!(ContextId::from_config(None), ContextId::Any);
        assert_eq!(
            ContextId::from_config(Some("pid-1".into())),
            ContextId::Named("pid-1".into())
        );
    }

    #[test]
    fn from_config() {
        let desc =
            SelectionDescriptor::from_config("m_entry", &scenario_config(), &catalog()).unwrap();

        assert_eq!(desc.id(), "m_entry");
        assert_eq!(desc.module_id(), "M");
        assert!(desc.context_id().is_any());
        assert_eq!(desc.native_base(), 0x1000);
        assert_eq!(desc.instrumented_units(), 8);
    }

    #[test]
    fn from_config_missing_module() {
        let result = SelectionDescriptor::from_config("nothing", &scenario_config(), &catalog());
        assert_eq!(result, Err(Error::MissingKey("nothing.module".into())));
    }

    #[test]
    fn from_config_unknown_module() {
        let config = crate::selection::MemoryConfig::new().with_selection(
            "ghost",
            "ghost.dll",
            None,
            &[],
            &[],
        );
        let result = SelectionDescriptor::from_config("ghost", &config, &catalog());
        assert_eq!(result, Err(Error::UnknownModule("ghost.dll".into())));
    }
}

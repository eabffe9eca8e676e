//! Static side of code selection: configuration, range compilation and lookup structures.
//!
//! Everything in this module is built once, before any code is translated, and is read-only
//! afterwards.
//!
//! # Key Components
//!
//! - [`compile_ranges`] / [`build_bitmap`] - validate raw ranges and compile them to a bitmap
//! - [`InstrumentationMap`] - the dense bit-per-unit map itself
//! - [`SelectionDescriptor`] - one compiled configuration entry
//! - [`DescriptorRegistry`] - owner of all descriptors, resolves module instances to them
//! - [`AggregationIndex`] - per-module union of all descriptor bitmaps
//! - [`CodeSelector`] - registry and index bundled, as built from configuration
//!
//! # Example
//!
//! ```rust
//! use codesel::{
//!     runtime::StaticCatalog,
//!     selection::{CodeSelector, MemoryConfig, SelectorConfig},
//! };
//!
//! let catalog = StaticCatalog::new()
//!     .with_module("libc", 0x7000, 0x1000);
//! let config = MemoryConfig::new()
//!     .with_selection("libc-a", "libc", Some("A"), &[(0x000, 0x010)], &[])
//!     .with_selection("libc-b", "libc", Some("B"), &[(0x800, 0x810)], &[]);
//!
//! let selector = CodeSelector::initialize(&config, &catalog, SelectorConfig::default());
//!
//! assert_eq!(selector.descriptors().count(), 2);
//! assert_eq!(selector.index().lookup("libc").map(|a| a.bitmap().count()), Some(0x20));
//! ```

mod aggregate;
mod bitmap;
mod config;
mod descriptor;
mod range;
mod registry;

pub use aggregate::{AggregatedBitmap, AggregationIndex};
pub use bitmap::InstrumentationMap;
pub use config::{
    key, ConfigSource, MemoryConfig, SelectorConfig, DEFAULT_ROOT, KEY_CONTEXT, KEY_EXCLUDE,
    KEY_ID, KEY_INCLUDE, KEY_MODULE, KEY_SELECTIONS,
};
pub use descriptor::{ContextId, DescriptorId, SelectionDescriptor, WILDCARD_CONTEXT};
pub use range::{build_bitmap, compile_ranges, AddressRange, RawRange};
pub use registry::DescriptorRegistry;

use rayon::prelude::*;

use crate::{runtime::ModuleCatalog, Result};

/// The complete, immutable selection state: every descriptor plus the aggregation index.
///
/// Build it once and share it (for example behind an `Arc`) with every
/// [`Dispatcher`](crate::runtime::Dispatcher) and path.
#[derive(Debug)]
pub struct CodeSelector {
    registry: DescriptorRegistry,
    index: AggregationIndex,
    settings: SelectorConfig,
}

impl CodeSelector {
    /// Load every entry listed under `<settings.root>.selections` and build the index.
    ///
    /// Entries that fail to load are logged and skipped; the selector then operates with
    /// whatever did validate. A missing entry list yields an empty selector that never
    /// instruments anything.
    ///
    /// # Arguments
    /// * `config` - The configuration store
    /// * `catalog` - Resolves module ids to native base and size
    /// * `settings` - Behavioral settings
    #[must_use]
    pub fn initialize(
        config: &dyn ConfigSource,
        catalog: &dyn ModuleCatalog,
        settings: SelectorConfig,
    ) -> Self {
        let list_key = key(&settings.root, KEY_SELECTIONS);
        let entries = config.get_list(&list_key).unwrap_or_else(|| {
            log::warn!("No code selections configured under '{}'", list_key);
            Vec::new()
        });

        let compiled: Vec<(String, Result<SelectionDescriptor>)> = if settings.parallel_compile {
            entries
                .into_par_iter()
                .map(|entry| {
                    let result = SelectionDescriptor::from_config(&entry, config, catalog);
                    (entry, result)
                })
                .collect()
        } else {
            entries
                .into_iter()
                .map(|entry| {
                    let result = SelectionDescriptor::from_config(&entry, config, catalog);
                    (entry, result)
                })
                .collect()
        };

        let total = compiled.len();
        let mut registry = DescriptorRegistry::new();
        for (entry, result) in compiled {
            registry.accept(&entry, result);
        }

        let selector = CodeSelector::from_registry(registry, settings);
        log::info!(
            "Code selection ready: {}/{} entries loaded, {} modules indexed",
            selector.registry.len(),
            total,
            selector.index.len()
        );
        selector
    }

    /// Wrap an already populated registry and build its aggregation index.
    #[must_use]
    pub fn from_registry(registry: DescriptorRegistry, settings: SelectorConfig) -> Self {
        let index = AggregationIndex::build(&registry);
        CodeSelector {
            registry,
            index,
            settings,
        }
    }

    /// All descriptors
    #[must_use]
    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    /// The aggregation index
    #[must_use]
    pub fn index(&self) -> &AggregationIndex {
        &self.index
    }

    /// Behavioral settings
    #[must_use]
    pub fn settings(&self) -> &SelectorConfig {
        &self.settings
    }

    /// Enumerate all configured descriptors, for diagnostics
    pub fn descriptors(&self) -> impl Iterator<Item = &SelectionDescriptor> + '_ {
        self.registry.descriptors()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{catalog, scenario_config};

    #[test]
    fn initialize_all_entries() {
        for settings in [SelectorConfig::default(), SelectorConfig::sequential()] {
            let selector = CodeSelector::initialize(&scenario_config(), &catalog(), settings);

            let ids: Vec<_> = selector.descriptors().map(|d| d.id().to_string()).collect();
            assert_eq!(ids, vec!["m_entry", "libc_a", "libc_b"]);
            assert_eq!(selector.index().len(), 2);
        }
    }

    #[test]
    fn invalid_entries_are_skipped() {
        let config = scenario_config()
            .with_selection("broken", "M", None, &[(0x0, 0x101)], &[])
            .with_selection("ghost", "ghost.dll", None, &[], &[])
            .with_selection("m_entry", "M", None, &[], &[]);

        let selector = CodeSelector::initialize(&config, &catalog(), SelectorConfig::default());

        assert_eq!(selector.registry().len(), 3);
        assert!(selector.registry().find("broken").is_none());
        assert!(selector.registry().find("ghost").is_none());
    }

    #[test]
    fn missing_entry_list() {
        let selector = CodeSelector::initialize(
            &MemoryConfig::new(),
            &catalog(),
            SelectorConfig::default(),
        );

        assert!(selector.registry().is_empty());
        assert!(selector.index().is_empty());
    }

    #[test]
    fn custom_root() {
        let mut config = scenario_config();
        config.set_list("plugins.selections", vec!["libc_a".to_string()]);

        let selector = CodeSelector::initialize(
            &config,
            &catalog(),
            SelectorConfig::default().with_root("plugins"),
        );

        assert_eq!(selector.registry().len(), 1);
        assert_eq!(selector.settings().root, "plugins");
    }
}

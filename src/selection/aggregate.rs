//! Per-module union of all descriptor bitmaps.
//!
//! The same code may be mapped into several contexts that are selected differently. The
//! [`AggregationIndex`] answers the context-free question "could this code need
//! instrumentation anywhere", which decides whether a translated block gets per-instruction
//! hooks at all. Whether it needs instrumentation *now, on this path* is decided later, at
//! runtime, against the descriptor active for the path's context.

use rustc_hash::FxHashMap;

use crate::selection::{DescriptorRegistry, InstrumentationMap};

/// Union of every descriptor bitmap configured for one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedBitmap {
    bitmap: InstrumentationMap,
    size: u64,
}

impl AggregatedBitmap {
    /// The merged bitmap
    #[must_use]
    pub fn bitmap(&self) -> &InstrumentationMap {
        &self.bitmap
    }

    /// Size of the module, and of the bitmap
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Check whether any descriptor selects the unit at `offset`
    #[must_use]
    pub fn get(&self, offset: u64) -> bool {
        usize::try_from(offset).is_ok_and(|unit| self.bitmap.get(unit))
    }
}

/// Module name to [`AggregatedBitmap`], built once from a complete registry.
#[derive(Debug, Clone, Default)]
pub struct AggregationIndex {
    modules: FxHashMap<String, AggregatedBitmap>,
}

impl AggregationIndex {
    /// OR together the bitmaps of all descriptors per module id, regardless of context.
    ///
    /// Should descriptors of one module disagree on its size, the union covers the largest.
    #[must_use]
    pub fn build(registry: &DescriptorRegistry) -> Self {
        let mut modules = FxHashMap::default();

        for module_id in registry.modules() {
            let descriptors: Vec<_> = registry
                .for_module(module_id)
                .iter()
                .filter_map(|id| registry.get(*id))
                .collect();

            let Some(size) = descriptors.iter().map(|d| d.module_size()).max() else {
                continue;
            };

            let units = descriptors
                .iter()
                .map(|d| d.bitmap().len())
                .max()
                .unwrap_or_default();

            let mut bitmap = InstrumentationMap::new(units);
            for descriptor in &descriptors {
                bitmap.union_with(descriptor.bitmap());
            }

            modules.insert(module_id.to_string(), AggregatedBitmap { bitmap, size });
        }

        AggregationIndex { modules }
    }

    /// The merged bitmap of a module; `None` means no descriptor targets it and its code is
    /// never instrumented.
    #[must_use]
    pub fn lookup(&self, module_id: &str) -> Option<&AggregatedBitmap> {
        self.modules.get(module_id)
    }

    /// Check whether any descriptor selects at least one unit of `module_id`.
    #[must_use]
    pub fn is_selected(&self, module_id: &str) -> bool {
        self.lookup(module_id).is_some_and(|agg| agg.bitmap.any())
    }

    /// Number of indexed modules
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns `true` if no module is indexed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

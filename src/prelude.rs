//! # codesel Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the codesel library.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all codesel operations
pub use crate::Error;

/// The result type used throughout codesel
pub use crate::Result;

// ================================================================================================
// Selection - built once from configuration
// ================================================================================================

/// Registry and aggregation index, as built from configuration
pub use crate::selection::CodeSelector;

/// Behavioral settings of the selector
pub use crate::selection::SelectorConfig;

/// Configuration store access and the in-memory store
pub use crate::selection::{ConfigSource, MemoryConfig};

/// Descriptors and their identities
pub use crate::selection::{ContextId, DescriptorId, DescriptorRegistry, SelectionDescriptor};

/// Lookup structures
pub use crate::selection::{AggregatedBitmap, AggregationIndex, InstrumentationMap};

// ================================================================================================
// Runtime - used while translating
// ================================================================================================

/// Hook logic
pub use crate::runtime::Dispatcher;

/// Per-path state
pub use crate::runtime::PathState;

/// Module identities and the module catalog
pub use crate::runtime::{ModuleCatalog, ModuleInstance, ModuleLayout, StaticCatalog};

/// Signal channel towards the execution engine
pub use crate::runtime::{
    BlockId, HookEvents, InstrumentationSignal, InstrumentationSink, SignalRecorder,
};

// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]

//! # codesel
//!
//! Per-module, per-context code selection for dynamic binary translators that switch between
//! expensive fine-grained instrumentation (such as symbolic-execution tracking) and native
//! execution.
//!
//! Users describe, per module, which byte ranges should be instrumented and which should not.
//! `codesel` compiles those descriptions into dense bitmaps once, and then answers at every
//! block and instruction boundary whether instrumentation must be on, for the execution
//! context and exploration path at hand.
//!
//! ## Features
//!
//! - **Validated configuration** - Ranges outside a module image are rejected, never clamped
//! - **Exclude wins** - Exclude ranges are carved out of include ranges regardless of order
//! - **Shared code, separate needs** - One module mapped into several processes can be
//!   selected differently in each of them
//! - **Fork-friendly** - Per-path state forks in O(1) and evolves independently afterwards
//! - **Minimal signaling** - Exactly one enable/disable signal per actual mode change
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use codesel::prelude::*;
//!
//! // What the module detector knows about the modules
//! let catalog = StaticCatalog::new().with_module("M", 0x1000, 0x100);
//!
//! // What the user asked for
//! let config = MemoryConfig::new()
//!     .with_selection("m", "M", None, &[(0x00, 0x10)], &[(0x08, 0x10)]);
//!
//! let selector = Arc::new(CodeSelector::initialize(&config, &catalog, SelectorConfig::default()));
//! let dispatcher = Dispatcher::new(Arc::clone(&selector));
//!
//! let module = ModuleInstance::new("M", "pid-1", 0x1000, 0x100);
//! let mut path = PathState::new();
//! dispatcher.on_module_transition(&mut path, None, Some(&module));
//!
//! assert!(path.is_symbolic(selector.registry(), 0x1005));
//! assert!(!path.is_symbolic(selector.registry(), 0x1009));
//! assert!(!path.is_symbolic(selector.registry(), 0x2000));
//! ```
//!
//! ## Architecture
//!
//! - [`selection`] - Built once at startup: range compilation, descriptors, the registry and
//!   the aggregation index
//! - [`runtime`] - Used while translating: module identities, per-path state and the
//!   dispatcher reacting to engine events
//! - [`Error`] and [`Result`] - Configuration errors
//!
//! ### Two Phases
//!
//! The [`selection::AggregationIndex`] answers "could this module's code ever need
//! instrumentation, in any context" and gates whether a block gets per-instruction hooks at
//! all. The descriptor active on a [`runtime::PathState`] answers "does this instruction
//! need instrumentation right now, on this path". Shared code is hooked wherever any
//! context might want it, and instrumented only where the current one does.
//!
//! ## Error Handling
//!
//! Only initialization can fail, and only per entry: a broken entry is logged and skipped,
//! every other entry is still loaded. Runtime queries never fail; their safe default is
//! "do not instrument".
//!
//! ## Logging
//!
//! Diagnostics are emitted through the [`log`](https://docs.rs/log) facade. The library never
//! installs a logger.

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use codesel::prelude::*;
///
/// let config = SelectorConfig::default();
/// assert!(config.close_blocks);
/// ```
pub mod prelude;

/// Configuration, range compilation and the read-only lookup structures built from them.
///
/// # Key Types
///
/// - [`selection::CodeSelector`] - Everything built from configuration, in one place
/// - [`selection::SelectionDescriptor`] - One compiled configuration entry
/// - [`selection::DescriptorRegistry`] - Owner of all descriptors
/// - [`selection::AggregationIndex`] - Per-module union of all bitmaps
///
/// # Main Functions
///
/// - [`selection::compile_ranges`] - Rebase and validate raw ranges
/// - [`selection::build_bitmap`] - Compile include and exclude ranges into a bitmap
pub mod selection;

/// Translation-time hook logic and per-path state.
///
/// # Key Types
///
/// - [`runtime::Dispatcher`] - Reacts to translation and module-transition events
/// - [`runtime::PathState`] - Selection state of one exploration path
/// - [`runtime::ModuleInstance`] - One module mapped into one execution context
/// - [`runtime::InstrumentationSink`] - Receives enable/disable signals
pub mod runtime;

/// `codesel` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `codesel` Error type
///
/// The error type for every fallible operation in this crate. All variants describe
/// configuration problems found during initialization.
pub use error::Error;

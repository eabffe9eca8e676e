//! Runtime side of code selection: module identities, per-path state and the hook logic.
//!
//! # Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`module`] | [`ModuleInstance`] and the [`ModuleCatalog`] collaborator |
//! | [`signal`] | The signal channel towards the execution engine |
//! | [`state`] | [`PathState`], one per exploration path |
//! | [`dispatcher`] | [`Dispatcher`], reacting to translation and transition events |
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  transitions  ┌──────────────┐  enter/leave   ┌───────────┐
//! │ module detector  │──────────────►│  Dispatcher  │───────────────►│ PathState │
//! └──────────────────┘               │              │◄───────────────│  (per     │
//! ┌──────────────────┐  block/insn   │              │ active desc.   │   path)   │
//! │ execution engine │──────────────►│              │                └───────────┘
//! │                  │◄──────────────│              │──► CodeSelector (shared,
//! └──────────────────┘ enable/disable└──────────────┘    read-only)
//! ```

pub mod dispatcher;
pub mod module;
pub mod signal;
pub mod state;

pub use dispatcher::Dispatcher;
pub use module::{ModuleCatalog, ModuleInstance, ModuleLayout, StaticCatalog};
pub use signal::{
    BlockId, HookEvents, InstrumentationSignal, InstrumentationSink, RecordedSignal,
    SignalRecorder,
};
pub use state::PathState;

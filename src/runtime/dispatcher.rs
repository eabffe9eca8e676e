//! Translation-time and execution-time hook logic.
//!
//! The [`Dispatcher`] is driven by three event families:
//!
//! - **Module transitions** from the module-execution detector update the path's current
//!   module and active descriptor.
//! - **Translation events** from the execution engine (block start, instruction start, block
//!   end) decide, instruction by instruction, where instrumentation has to be switched on or
//!   off, and forward exactly one signal per actual change to the engine.
//! - **Execution checks** re-decide the mode for the path that actually runs a shared block,
//!   at every instruction that some descriptor of the module selects.
//!
//! # Block Lifecycle
//!
//! ```text
//! on_block_translate_start ──► module selected anywhere? ──no──► no further hooks
//!          │ yes
//!          ▼
//! on_instruction_translate_start (per instruction)
//!          │  selected in any context? ──yes──► execution check
//!          │  needed != signaled?      ──yes──► one Enable/Disable signal
//!          ▼
//! on_block_translate_end ──► close an open Enable, forget block state
//! ```
//!
//! Every block re-evaluates from scratch; the toggle state never carries over from one block
//! to the next.

use std::sync::Arc;

use dashmap::DashSet;

use crate::{
    runtime::{
        BlockId, HookEvents, InstrumentationSignal, InstrumentationSink, ModuleInstance,
        PathState,
    },
    selection::{CodeSelector, DescriptorId, SelectionDescriptor},
};

#[derive(Debug, Clone)]
struct BlockCursor {
    block: BlockId,
    module: ModuleInstance,
    /// Mode last signaled for this block, `None` while unknown
    signaled: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Diagnostic {
    OutOfBounds,
    SizeMismatch,
}

/// Decides where translated code gets instrumented.
///
/// One dispatcher serves one execution engine. Translation is sequential, so the per-block
/// cursor lives here; everything path-specific lives in the [`PathState`] passed to each hook.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use codesel::{
///     runtime::{BlockId, Dispatcher, ModuleInstance, PathState, SignalRecorder, StaticCatalog},
///     selection::{CodeSelector, MemoryConfig, SelectorConfig},
/// };
///
/// let catalog = StaticCatalog::new().with_module("M", 0x1000, 0x100);
/// let config = MemoryConfig::new().with_selection("m", "M", None, &[(0x0, 0x10)], &[(0x8, 0x10)]);
/// let selector = Arc::new(CodeSelector::initialize(&config, &catalog, SelectorConfig::default()));
///
/// let mut dispatcher = Dispatcher::new(selector);
/// let mut path = PathState::new();
/// let mut sink = SignalRecorder::new();
/// let module = ModuleInstance::new("M", "pid-1", 0x1000, 0x100);
///
/// dispatcher.on_module_transition(&mut path, None, Some(&module));
/// dispatcher.on_block_translate_start(&mut path, Some(&module), BlockId(1), 0x1004);
/// for pc in [0x1004, 0x1006, 0x1008, 0x100a] {
///     dispatcher.on_instruction_translate_start(&mut path, BlockId(1), pc, &mut sink);
/// }
/// dispatcher.on_block_translate_end(BlockId(1), 0x100c, &mut sink);
///
/// // Enabled at 0x1004, disabled at 0x1008, nothing else.
/// assert_eq!(sink.signals().len(), 2);
/// // 0x1004 and 0x1006 are re-checked whenever the block runs.
/// assert_eq!(sink.checks().len(), 2);
/// ```
#[derive(Debug)]
pub struct Dispatcher {
    selector: Arc<CodeSelector>,
    block: Option<BlockCursor>,
    reported: DashSet<(Diagnostic, String)>,
}

impl Dispatcher {
    /// Creates a dispatcher over a fully initialized selector.
    #[must_use]
    pub fn new(selector: Arc<CodeSelector>) -> Self {
        Dispatcher {
            selector,
            block: None,
            reported: DashSet::new(),
        }
    }

    /// The selector this dispatcher consults
    #[must_use]
    pub fn selector(&self) -> &Arc<CodeSelector> {
        &self.selector
    }

    /// Events the engine must always deliver to this dispatcher.
    ///
    /// [`HookEvents::INSTRUCTION_START`] and [`HookEvents::INSTRUCTION_EXECUTE`] are requested
    /// per block, by the return value of
    /// [`on_block_translate_start`](Self::on_block_translate_start).
    #[must_use]
    pub fn subscriptions(&self) -> HookEvents {
        HookEvents::BLOCK_START | HookEvents::BLOCK_END | HookEvents::MODULE_TRANSITION
    }

    /// Handle execution moving from `prev` to `current`.
    ///
    /// Leaving every selectable module (`current` is `None`) clears the path's current module;
    /// otherwise the descriptor governing `current` is resolved (through the path's cache
    /// first) and made active. Returns the now active descriptor.
    pub fn on_module_transition(
        &self,
        path: &mut PathState,
        prev: Option<&ModuleInstance>,
        current: Option<&ModuleInstance>,
    ) -> Option<DescriptorId> {
        let Some(module) = current else {
            if let Some(prev) = prev {
                log::debug!("Left {}, execution is native", prev);
            }
            path.leave_all();
            return None;
        };

        let descriptor = path.enter(self.selector.registry(), module);
        match descriptor.and_then(|id| self.selector.registry().get(id)) {
            Some(desc) => {
                log::debug!("Entered {}, selected by '{}'", module, desc.id());
                self.check_layout(module, desc);
            }
            None => log::debug!("Entered {}, no selection applies", module),
        }
        descriptor
    }

    /// Handle the start of a block translation.
    ///
    /// Returns the events the engine has to deliver for the remainder of this block; an empty
    /// set means the block runs natively and needs no per-instruction hooks.
    ///
    /// # Arguments
    /// * `path` - State of the path the block is translated for
    /// * `module` - The module the block belongs to, if any
    /// * `block` - The block being translated
    /// * `pc` - Address of the first instruction
    pub fn on_block_translate_start(
        &mut self,
        path: &mut PathState,
        module: Option<&ModuleInstance>,
        block: BlockId,
        pc: u64,
    ) -> HookEvents {
        self.block = None;

        let Some(module) = module else {
            return HookEvents::empty();
        };
        if !self.selector.index().is_selected(&module.module_id) {
            return HookEvents::empty();
        }

        path.activate_module(self.selector.registry(), module);
        log::trace!("Tracking block {:?} of {} at {:#x}", block, module, pc);

        // A closed predecessor always leaves the engine in native mode.
        let signaled = self.selector.settings().close_blocks.then_some(false);
        self.block = Some(BlockCursor {
            block,
            module: module.clone(),
            signaled,
        });
        HookEvents::INSTRUCTION_START | HookEvents::INSTRUCTION_EXECUTE | HookEvents::BLOCK_END
    }

    /// Handle the start of an instruction translation.
    ///
    /// Marks the instruction for an execution check if any descriptor of the module selects
    /// it. Emits one signal if the instruction at `pc` needs a different mode than the one
    /// already signaled for this block, and returns it.
    pub fn on_instruction_translate_start(
        &mut self,
        path: &mut PathState,
        block: BlockId,
        pc: u64,
        sink: &mut dyn InstrumentationSink,
    ) -> Option<InstrumentationSignal> {
        let cursor = self.block.as_ref().filter(|cursor| cursor.block == block)?;

        if self.selected_anywhere(&cursor.module, pc) {
            sink.execution_check(block, pc);
        }

        let needed = self.instrumentation_needed(path, &cursor.module, pc);
        if cursor.signaled == Some(needed) {
            return None;
        }

        let signal = InstrumentationSignal::to(needed);
        log::trace!("Block {:?}: {} instrumentation at {:#x}", block, signal, pc);
        sink.signal(block, pc, signal);

        if let Some(cursor) = self.block.as_mut() {
            cursor.signaled = Some(needed);
        }
        Some(signal)
    }

    /// Handle the end of a block translation.
    ///
    /// If the block ended with instrumentation on and blocks are configured to close, a
    /// disable signal is attached at `end_pc`. The block's toggle state is dropped either way.
    /// The end of a block other than the one being translated is ignored.
    pub fn on_block_translate_end(
        &mut self,
        block: BlockId,
        end_pc: u64,
        sink: &mut dyn InstrumentationSink,
    ) -> Option<InstrumentationSignal> {
        if !self.block.as_ref().is_some_and(|cursor| cursor.block == block) {
            return None;
        }
        let cursor = self.block.take()?;

        if cursor.signaled == Some(true) && self.selector.settings().close_blocks {
            sink.signal(block, end_pc, InstrumentationSignal::Disable);
            return Some(InstrumentationSignal::Disable);
        }
        None
    }

    /// Handle the execution of an instruction marked as an execution check.
    ///
    /// A translated block is shared by every context that maps its module. This re-decides the
    /// mode for the path actually running the instruction, from its own active descriptor.
    #[must_use]
    pub fn on_instruction_execute(&self, path: &PathState, pc: u64) -> InstrumentationSignal {
        InstrumentationSignal::to(path.is_symbolic(self.selector.registry(), pc))
    }

    /// Check whether the instruction at `pc` of `module` needs instrumentation on `path`.
    ///
    /// The descriptor is resolved exactly like on a module transition, through the path's
    /// cache. Without a descriptor the answer is `false`. An address outside the module also
    /// yields `false`, with a diagnostic logged once per module.
    pub fn instrumentation_needed(
        &self,
        path: &mut PathState,
        module: &ModuleInstance,
        pc: u64,
    ) -> bool {
        let registry = self.selector.registry();
        let Some(descriptor) = path
            .activate_module(registry, module)
            .and_then(|id| registry.get(id))
        else {
            return false;
        };
        self.check_layout(module, descriptor);

        match module
            .offset_of(pc)
            .and_then(|offset| descriptor.lookup(offset))
        {
            Some(instrument) => instrument,
            None => {
                self.report_out_of_bounds(module, pc);
                false
            }
        }
    }

    /// Number of modules for which an out-of-bounds query has been seen
    #[must_use]
    pub fn out_of_bounds_reports(&self) -> usize {
        self.reports(Diagnostic::OutOfBounds)
    }

    /// Number of modules whose mapped size differs from their descriptor's module size
    #[must_use]
    pub fn size_mismatch_reports(&self) -> usize {
        self.reports(Diagnostic::SizeMismatch)
    }

    fn reports(&self, kind: Diagnostic) -> usize {
        self.reported.iter().filter(|entry| entry.0 == kind).count()
    }

    fn first_report(&self, kind: Diagnostic, module: &ModuleInstance) -> bool {
        self.reported.insert((kind, module.module_id.clone()))
    }

    fn selected_anywhere(&self, module: &ModuleInstance, pc: u64) -> bool {
        let Some(aggregated) = self.selector.index().lookup(&module.module_id) else {
            return false;
        };
        module
            .offset_of(pc)
            .is_some_and(|offset| aggregated.get(offset))
    }

    fn check_layout(&self, module: &ModuleInstance, descriptor: &SelectionDescriptor) {
        if module.size != descriptor.module_size()
            && self.first_report(Diagnostic::SizeMismatch, module)
        {
            log::warn!(
                "{} is mapped with size {:#x}, but '{}' was compiled for {:#x}",
                module,
                module.size,
                descriptor.id(),
                descriptor.module_size()
            );
        }
    }

    fn report_out_of_bounds(&self, module: &ModuleInstance, pc: u64) {
        if self.first_report(Diagnostic::OutOfBounds, module)
            && self.selector.settings().warn_out_of_bounds
        {
            log::warn!(
                "Address {:#x} lies outside {}, treating it as not instrumented",
                pc,
                module
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        runtime::SignalRecorder,
        selection::SelectorConfig,
        test::{catalog, libc_in, module_m, scenario_config, scenario_selector},
    };

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(scenario_selector()))
    }

    fn translate(
        dispatcher: &mut Dispatcher,
        path: &mut PathState,
        module: &ModuleInstance,
        block: BlockId,
        pcs: &[u64],
        sink: &mut SignalRecorder,
    ) -> HookEvents {
        let events = dispatcher.on_block_translate_start(path, Some(module), block, pcs[0]);
        for pc in pcs {
            dispatcher.on_instruction_translate_start(path, block, *pc, sink);
        }
        let end = pcs.last().copied().unwrap_or_default() + 1;
        dispatcher.on_block_translate_end(block, end, sink);
        events
    }

    fn signals(sink: &SignalRecorder) -> Vec<(BlockId, u64, InstrumentationSignal)> {
        sink.signals()
            .iter()
            .map(|s| (s.block, s.pc, s.signal))
            .collect()
    }

    #[test]
    fn transition_sets_and_clears_current_module() {
        let dispatcher = dispatcher();
        let mut path = PathState::new();

        let entered = dispatcher.on_module_transition(&mut path, None, Some(&module_m()));
        assert!(entered.is_some());
        assert_eq!(path.current_module(), Some(&module_m()));
        assert_eq!(path.active_descriptor(), entered);

        let left = dispatcher.on_module_transition(&mut path, Some(&module_m()), None);
        assert!(left.is_none());
        assert!(path.current_module().is_none());
        assert_eq!(path.cached(&module_m()), Some(entered));
    }

    #[test]
    fn one_signal_per_change() {
        let mut dispatcher = dispatcher();
        let mut path = PathState::new();
        let mut sink = SignalRecorder::new();

        let pcs: Vec<u64> = (0x1000..0x1010).collect();
        translate(&mut dispatcher, &mut path, &module_m(), BlockId(1), &pcs, &mut sink);

        assert_eq!(
            signals(&sink),
            vec![
                (BlockId(1), 0x1000, InstrumentationSignal::Enable),
                (BlockId(1), 0x1008, InstrumentationSignal::Disable),
            ]
        );
    }

    #[test]
    fn open_block_is_closed_at_the_end() {
        let mut dispatcher = dispatcher();
        let mut path = PathState::new();
        let mut sink = SignalRecorder::new();
        let pcs = [0x1002, 0x1004];

        translate(&mut dispatcher, &mut path, &module_m(), BlockId(1), &pcs, &mut sink);

        assert_eq!(
            signals(&sink),
            vec![
                (BlockId(1), 0x1002, InstrumentationSignal::Enable),
                (BlockId(1), 0x1005, InstrumentationSignal::Disable),
            ]
        );
    }

    #[test]
    fn blocks_do_not_share_toggle_state() {
        let mut dispatcher = dispatcher();
        let mut path = PathState::new();
        let mut sink = SignalRecorder::new();

        translate(&mut dispatcher, &mut path, &module_m(), BlockId(1), &[0x1000], &mut sink);
        translate(&mut dispatcher, &mut path, &module_m(), BlockId(2), &[0x1001], &mut sink);

        assert_eq!(sink.for_block(BlockId(2)).count(), 2);
        assert_eq!(
            sink.for_block(BlockId(2)).next().map(|s| s.signal),
            Some(InstrumentationSignal::Enable)
        );
    }

    #[test]
    fn open_blocks_signal_their_first_instruction() {
        let settings = SelectorConfig {
            close_blocks: false,
            ..SelectorConfig::sequential()
        };
        let selector = CodeSelector::initialize(&scenario_config(), &catalog(), settings);
        let mut dispatcher = Dispatcher::new(Arc::new(selector));
        let mut path = PathState::new();
        let mut sink = SignalRecorder::new();

        translate(&mut dispatcher, &mut path, &module_m(), BlockId(1), &[0x1000], &mut sink);
        translate(&mut dispatcher, &mut path, &module_m(), BlockId(2), &[0x1020], &mut sink);

        assert_eq!(
            signals(&sink),
            vec![
                (BlockId(1), 0x1000, InstrumentationSignal::Enable),
                (BlockId(2), 0x1020, InstrumentationSignal::Disable),
            ]
        );
    }

    #[test]
    fn unselected_module_gets_no_instruction_hooks() {
        let mut dispatcher = dispatcher();
        let mut path = PathState::new();
        let mut sink = SignalRecorder::new();
        let other = ModuleInstance::new("kernel32.dll", "P", 0x9000, 0x100);

        let events =
            translate(&mut dispatcher, &mut path, &other, BlockId(3), &[0x9000], &mut sink);

        assert!(events.is_empty());
        assert!(sink.signals().is_empty());
        assert!(sink.checks().is_empty());
        assert_eq!(
            dispatcher.on_block_translate_start(&mut path, None, BlockId(4), 0x0),
            HookEvents::empty()
        );
    }

    #[test]
    fn unmatched_context_stays_native() {
        let mut dispatcher = dispatcher();
        let mut path = PathState::new();
        let mut sink = SignalRecorder::new();

        let events = translate(
            &mut dispatcher,
            &mut path,
            &libc_in("C"),
            BlockId(5),
            &[0x7000, 0x7001],
            &mut sink,
        );

        assert!(events.contains(HookEvents::INSTRUCTION_START));
        assert!(sink.signals().is_empty());
    }

    #[test]
    fn foreign_block_events_are_ignored() {
        let mut dispatcher = dispatcher();
        let mut path = PathState::new();
        let mut sink = SignalRecorder::new();

        dispatcher.on_block_translate_start(&mut path, Some(&module_m()), BlockId(1), 0x1000);
        assert!(dispatcher
            .on_instruction_translate_start(&mut path, BlockId(9), 0x1000, &mut sink)
            .is_none());
        assert!(sink.signals().is_empty());
    }

    #[test]
    fn foreign_block_end_keeps_the_open_block() {
        let mut dispatcher = dispatcher();
        let mut path = PathState::new();
        let mut sink = SignalRecorder::new();

        dispatcher.on_block_translate_start(&mut path, Some(&module_m()), BlockId(1), 0x1000);
        assert!(dispatcher
            .on_block_translate_end(BlockId(9), 0x2000, &mut sink)
            .is_none());
        dispatcher.on_instruction_translate_start(&mut path, BlockId(1), 0x1000, &mut sink);
        dispatcher.on_block_translate_end(BlockId(1), 0x1001, &mut sink);

        assert_eq!(
            signals(&sink),
            vec![
                (BlockId(1), 0x1000, InstrumentationSignal::Enable),
                (BlockId(1), 0x1001, InstrumentationSignal::Disable),
            ]
        );
    }

    #[test]
    fn shared_block_is_decided_per_running_path() {
        let mut dispatcher = dispatcher();
        let mut sink = SignalRecorder::new();

        let mut in_a = PathState::new();
        dispatcher.on_module_transition(&mut in_a, None, Some(&libc_in("A")));
        let mut in_b = PathState::new();
        dispatcher.on_module_transition(&mut in_b, None, Some(&libc_in("B")));

        // Translated once, for context A.
        let pcs = [0x700c, 0x700e, 0x7010];
        translate(&mut dispatcher, &mut in_a, &libc_in("A"), BlockId(1), &pcs, &mut sink);
        assert_eq!(sink.checks(), &[(BlockId(1), 0x700c), (BlockId(1), 0x700e)]);

        for &(_, pc) in sink.checks() {
            assert_eq!(
                dispatcher.on_instruction_execute(&in_a, pc),
                InstrumentationSignal::Enable
            );
            assert_eq!(
                dispatcher.on_instruction_execute(&in_b, pc),
                InstrumentationSignal::Disable
            );
        }
        assert_eq!(
            dispatcher.on_instruction_execute(&in_b, 0x7800),
            InstrumentationSignal::Enable
        );
    }

    #[test]
    fn out_of_bounds_is_false_and_reported_once() {
        let dispatcher = dispatcher();
        let mut path = PathState::new();
        let module = module_m();

        assert!(!dispatcher.instrumentation_needed(&mut path, &module, 0x2000));
        assert!(!dispatcher.instrumentation_needed(&mut path, &module, 0x0FFF));
        assert!(!dispatcher.instrumentation_needed(&mut path, &module, 0x3000));
        assert_eq!(dispatcher.out_of_bounds_reports(), 1);

        assert!(dispatcher.instrumentation_needed(&mut path, &module, 0x1005));
        assert_eq!(dispatcher.size_mismatch_reports(), 0);
    }

    #[test]
    fn size_mismatch_is_reported_once() {
        let dispatcher = dispatcher();
        let mut path = PathState::new();
        let grown = ModuleInstance::new("M", "P", 0x1000, 0x200);

        dispatcher.on_module_transition(&mut path, None, Some(&grown));
        assert!(dispatcher.instrumentation_needed(&mut path, &grown, 0x1005));
        assert!(!dispatcher.instrumentation_needed(&mut path, &grown, 0x1150));

        assert_eq!(dispatcher.size_mismatch_reports(), 1);
        assert_eq!(dispatcher.out_of_bounds_reports(), 1);
    }

    #[test]
    fn subscriptions() {
        let dispatcher = dispatcher();
        assert!(dispatcher.subscriptions().contains(HookEvents::MODULE_TRANSITION));
        assert!(!dispatcher.subscriptions().contains(HookEvents::INSTRUCTION_START));
    }
}

//! The signal channel towards the execution engine.
//!
//! During translation the dispatcher tells the engine where, inside a translation block,
//! instrumentation has to be switched on or off. The engine attaches those requests to the
//! generated code; when the code runs, execution toggles between the instrumented and the
//! native mode at exactly those points.
//!
//! Those toggles reflect the path the block was translated for. A translated block is shared
//! by every context that maps the module, so the dispatcher also marks each instruction some
//! context wants instrumented as an execution check. The engine calls
//! [`Dispatcher::on_instruction_execute`](crate::runtime::Dispatcher::on_instruction_execute)
//! there to re-decide the mode for the path actually running it.

use bitflags::bitflags;
use strum::{Display, EnumIter};

/// Handle of a translation block, as issued by the execution engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u64);

/// A request to change the instrumentation mode from a given instruction onwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum InstrumentationSignal {
    /// Switch to instrumented execution
    #[strum(serialize = "enable")]
    Enable,
    /// Switch back to native execution
    #[strum(serialize = "disable")]
    Disable,
}

impl InstrumentationSignal {
    /// The signal that moves execution into the given mode
    #[must_use]
    pub fn to(instrumented: bool) -> Self {
        if instrumented {
            InstrumentationSignal::Enable
        } else {
            InstrumentationSignal::Disable
        }
    }

    /// Returns `true` for [`InstrumentationSignal::Enable`]
    #[must_use]
    pub fn is_enable(self) -> bool {
        matches!(self, InstrumentationSignal::Enable)
    }
}

bitflags! {
    /// Translation events the dispatcher wants to be notified about.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HookEvents: u8 {
        /// Start of a translation block
        const BLOCK_START = 0b0001;
        /// Start of every instruction inside the block
        const INSTRUCTION_START = 0b0010;
        /// End of the translation block
        const BLOCK_END = 0b0100;
        /// Execution moving between modules
        const MODULE_TRANSITION = 0b1000;
        /// Execution of instructions marked as execution checks
        const INSTRUCTION_EXECUTE = 0b1_0000;
    }
}

/// Consumer of instrumentation signals, implemented by the execution engine.
pub trait InstrumentationSink {
    /// Attach `signal` to the instruction at `pc` inside `block`.
    fn signal(&mut self, block: BlockId, pc: u64, signal: InstrumentationSignal);

    /// Mark the instruction at `pc` inside `block` for a check at execution time.
    fn execution_check(&mut self, block: BlockId, pc: u64) {
        let _ = (block, pc);
    }
}

/// One signal, as captured by a [`SignalRecorder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedSignal {
    /// Block the signal was attached to
    pub block: BlockId,
    /// Instruction the signal was attached to
    pub pc: u64,
    /// The requested mode change
    pub signal: InstrumentationSignal,
}

/// An [`InstrumentationSink`] that keeps every signal and execution check it receives, in order.
#[derive(Debug, Clone, Default)]
pub struct SignalRecorder {
    signals: Vec<RecordedSignal>,
    checks: Vec<(BlockId, u64)>,
}

impl SignalRecorder {
    /// Creates an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All signals received so far
    #[must_use]
    pub fn signals(&self) -> &[RecordedSignal] {
        &self.signals
    }

    /// Signals attached to one block
    pub fn for_block(&self, block: BlockId) -> impl Iterator<Item = &RecordedSignal> + '_ {
        self.signals.iter().filter(move |s| s.block == block)
    }

    /// Instructions marked for an execution-time check, as `(block, pc)`
    #[must_use]
    pub fn checks(&self) -> &[(BlockId, u64)] {
        &self.checks
    }

    /// Forget all received signals and checks
    pub fn clear(&mut self) {
        self.signals.clear();
        self.checks.clear();
    }
}

impl InstrumentationSink for SignalRecorder {
    fn signal(&mut self, block: BlockId, pc: u64, signal: InstrumentationSignal) {
        self.signals.push(RecordedSignal { block, pc, signal });
    }

    fn execution_check(&mut self, block: BlockId, pc: u64) {
        self.checks.push((block, pc));
    }
}

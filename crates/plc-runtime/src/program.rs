//! Interface to the control program driven by the scheduler.

use plc_common::error::PlcResult;
use plc_common::time::{TickPeriod, Timestamp};

/// Per-cycle information handed to the control program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleContext {
    /// Zero-based index of this cycle within the current run.
    pub tick: u64,
    /// Current time sampled immediately before the cycle.
    pub now: Timestamp,
    /// Configured period.
    pub period: TickPeriod,
}

/// A control program executed once per tick.
///
/// `init` runs on the thread calling `start`; `run_cycle` and `debug_image`
/// run only on the scheduler thread; `cleanup` runs on the thread calling
/// `stop` after the scheduler thread has been joined.
pub trait ControlProgram: Send + 'static {
    /// Prepare the program. An error aborts `start` before any thread exists.
    fn init(&mut self, args: &[String]) -> PlcResult<()>;

    /// Execute one control cycle.
    ///
    /// An error is logged and counted; the scheduler keeps cycling.
    fn run_cycle(&mut self, ctx: &CycleContext) -> PlcResult<()>;

    /// Release whatever `init` acquired.
    fn cleanup(&mut self);

    /// Marshalled process image to publish after the cycle, if any.
    fn debug_image(&self) -> Option<Vec<u8>> {
        None
    }
}

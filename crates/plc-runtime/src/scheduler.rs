//! Cyclic scheduler loop.
//!
//! Runs on its own thread and repeats, until the run flag is cleared:
//! 1. Arm the one-shot timer for the next deadline
//! 2. Block until it fires
//! 3. Sample the current time and publish it
//! 4. Run one control cycle
//! 5. Publish a debug snapshot
//!
//! Under the default [`RearmPolicy::FromCompletion`] the next deadline is one
//! period after the cycle *finished*, so a cycle that overruns pushes the next
//! one out instead of triggering a burst of catch-up cycles. The cost is that
//! execution time accumulates as phase drift; [`RearmPolicy::FixedRate`] trades
//! that back by arming `previous deadline + period`, clamped to now.

use crate::clock::TimeSource;
use crate::debug_image::{DebugImage, DebugSnapshot};
use crate::program::{ControlProgram, CycleContext};
use crate::timer::{CycleTimer, WaitOutcome};
use crossbeam_utils::CachePadded;
use plc_common::config::{RearmPolicy, RuntimeConfig};
use plc_common::error::PlcError;
use plc_common::metrics::CycleMetrics;
use plc_common::state::SchedulerPhase;
use plc_common::time::{CurrentTimeCell, TickPeriod, Timestamp};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Flag that keeps the loop alive.
///
/// The controller raises it before spawning the scheduler thread and clears it
/// to request a stop. The loop checks it once per iteration, before arming.
#[derive(Debug, Default)]
pub struct RunFlag(CachePadded<AtomicBool>);

impl RunFlag {
    /// Create a lowered flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow the loop to run.
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Request the loop to exit. Returns whether the flag was raised.
    pub fn clear(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    /// Whether the loop may keep running.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// State the scheduler thread shares with its controller.
#[derive(Debug, Default)]
pub struct LoopShared {
    run_flag: RunFlag,
    phase: CachePadded<AtomicU8>,
    cycles: CachePadded<AtomicU64>,
    current_time: CurrentTimeCell,
}

impl LoopShared {
    /// Fresh state: flag lowered, phase idle, no cycles.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The run flag.
    #[must_use]
    pub fn run_flag(&self) -> &RunFlag {
        &self.run_flag
    }

    /// Current loop phase.
    #[must_use]
    pub fn phase(&self) -> SchedulerPhase {
        SchedulerPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Cycles completed so far.
    #[must_use]
    pub fn cycle_count(&self) -> u64 {
        self.cycles.load(Ordering::Acquire)
    }

    /// Time sampled for the most recent cycle.
    #[must_use]
    pub fn current_time(&self) -> Timestamp {
        self.current_time.load()
    }

    fn set_phase(&self, phase: SchedulerPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }
}

/// Why the loop returned.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopExit {
    /// The run flag was cleared.
    Stopped,
    /// The clock could not be read.
    ClockFailure(PlcError),
    /// Timer waits failed more often in a row than allowed, or it was canceled
    /// without a stop request.
    TimerFailure(PlcError),
}

impl LoopExit {
    /// Whether the loop ended because a stop was requested.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// Summary returned by the scheduler thread.
#[derive(Debug, Clone)]
pub struct LoopReport {
    /// Why the loop returned.
    pub exit: LoopExit,
    /// Control cycles executed.
    pub cycles: u64,
    /// Iterations abandoned because the timer failed to arm or wait.
    pub skipped: u64,
    /// Total timer failures, including those that ended the loop.
    pub timer_failures: u64,
    /// Cycles in which the control program returned an error.
    pub cycle_faults: u64,
    /// Timing statistics.
    pub metrics: CycleMetrics,
}

enum ArmPlan {
    After(std::time::Duration),
    At(Timestamp),
}

/// The loop body, generic over its timer and clock.
pub struct CyclicScheduler<T: CycleTimer, C: TimeSource> {
    timer: Arc<T>,
    clock: Arc<C>,
    shared: Arc<LoopShared>,
    debug: Option<Arc<DebugImage>>,
    period: TickPeriod,
    rearm: RearmPolicy,
    phase_align: bool,
    publish_debug: bool,
    max_consecutive_failures: u32,
    next_deadline: Option<Timestamp>,
    last_start: Option<Timestamp>,
    consecutive_failures: u32,
    skipped: u64,
    timer_failures: u64,
    cycle_faults: u64,
    metrics: CycleMetrics,
}

impl<T: CycleTimer, C: TimeSource> CyclicScheduler<T, C> {
    /// Create a scheduler for `config` driving `timer` and reading `clock`.
    pub fn new(config: &RuntimeConfig, timer: Arc<T>, clock: Arc<C>, shared: Arc<LoopShared>) -> Self {
        let period = config.tick();
        Self {
            timer,
            clock,
            shared,
            debug: None,
            period,
            rearm: config.rearm,
            phase_align: config.phase_align,
            publish_debug: config.debug.enabled,
            max_consecutive_failures: config.max_consecutive_timer_failures,
            next_deadline: None,
            last_start: None,
            consecutive_failures: 0,
            skipped: 0,
            timer_failures: 0,
            cycle_faults: 0,
            metrics: CycleMetrics::new(config.metrics.histogram_size, period.as_duration()),
        }
    }

    /// Publish snapshots to `image` after every cycle.
    #[must_use]
    pub fn with_debug_image(mut self, image: Arc<DebugImage>) -> Self {
        self.debug = Some(image);
        self
    }

    /// Run the loop on the calling thread until it exits.
    pub fn run<P: ControlProgram>(mut self, program: &mut P) -> LoopReport {
        info!(
            tick_ms = self.period.as_millis(),
            rearm = ?self.rearm,
            phase_align = self.phase_align,
            "Entering cyclic loop"
        );

        let exit = self.cycle_loop(program);
        self.shared.set_phase(SchedulerPhase::Stopped);

        let cycles = self.shared.cycle_count();
        match &exit {
            LoopExit::Stopped => info!(cycles, skipped = self.skipped, "Cyclic loop exited"),
            LoopExit::ClockFailure(e) | LoopExit::TimerFailure(e) => {
                error!(cycles, error = %e, "Cyclic loop aborted");
            }
        }

        LoopReport {
            exit,
            cycles,
            skipped: self.skipped,
            timer_failures: self.timer_failures,
            cycle_faults: self.cycle_faults,
            metrics: self.metrics,
        }
    }

    fn cycle_loop<P: ControlProgram>(&mut self, program: &mut P) -> LoopExit {
        let mut reference = match self.sample() {
            Ok(now) => now,
            Err(exit) => return exit,
        };

        loop {
            if !self.shared.run_flag.is_raised() {
                return LoopExit::Stopped;
            }

            let armed = match self.plan_arm(reference) {
                ArmPlan::After(delay) => self.timer.arm(delay),
                ArmPlan::At(deadline) => self.timer.arm_at(deadline),
            };
            if let Err(e) = armed {
                if e == PlcError::TimerCanceled {
                    return self.canceled_exit();
                }
                warn!(error = %e, "Timer arm failed, skipping cycle");
                self.skipped += 1;
                self.timer_failures += 1;
                if let Some(exit) = self.hold_off() {
                    return exit;
                }
                reference = match self.sample() {
                    Ok(now) => now,
                    Err(exit) => return exit,
                };
                continue;
            }
            self.shared.set_phase(SchedulerPhase::Armed);

            match self.timer.wait() {
                WaitOutcome::Elapsed => {}
                WaitOutcome::Canceled => return self.canceled_exit(),
                WaitOutcome::Failed(e) => {
                    warn!(error = %e, "Timer wait failed, retrying");
                    if let Some(exit) = self.note_wait_failure(e) {
                        return exit;
                    }
                    if let Some(exit) = self.hold_off() {
                        return exit;
                    }
                    reference = match self.sample() {
                        Ok(now) => now,
                        Err(exit) => return exit,
                    };
                    continue;
                }
            }
            self.consecutive_failures = 0;

            self.shared.set_phase(SchedulerPhase::Executing);
            let start = match self.sample() {
                Ok(now) => now,
                Err(exit) => return exit,
            };
            self.execute(program, start);
            let finished = match self.sample() {
                Ok(now) => now,
                Err(exit) => return exit,
            };

            let execution = finished.saturating_duration_since(start);
            if execution > self.period.as_duration() {
                warn!(
                    tick = self.shared.cycle_count(),
                    execution_us = execution.as_micros(),
                    period_us = self.period.as_duration().as_micros(),
                    "Cycle overran its period"
                );
            }
            let interval = self.last_start.map(|prev| start.saturating_duration_since(prev));
            self.metrics.record(execution, interval);
            self.last_start = Some(start);
            reference = finished;
        }
    }

    fn plan_arm(&mut self, reference: Timestamp) -> ArmPlan {
        let period = self.period.as_duration();
        let deadline = match (self.next_deadline, self.rearm) {
            (None, _) if self.phase_align => reference.align_up(self.period),
            (Some(previous), RearmPolicy::FixedRate) => (previous + period).max(reference),
            (None, RearmPolicy::FixedRate) => reference + period,
            (_, RearmPolicy::FromCompletion) => {
                self.next_deadline = Some(reference + period);
                return ArmPlan::After(period);
            }
        };
        self.next_deadline = Some(deadline);
        ArmPlan::At(deadline)
    }

    fn execute<P: ControlProgram>(&mut self, program: &mut P, now: Timestamp) {
        self.shared.current_time.store(now);
        let tick = self.shared.cycle_count();
        let ctx = CycleContext {
            tick,
            now,
            period: self.period,
        };

        if let Err(e) = program.run_cycle(&ctx) {
            self.cycle_faults += 1;
            warn!(tick, error = %e, "Control cycle failed");
        }
        self.shared.cycles.fetch_add(1, Ordering::AcqRel);

        if self.publish_debug {
            if let Some(image) = &self.debug {
                if !image.is_suspended() {
                    if let Some(data) = program.debug_image() {
                        image.publish(DebugSnapshot { tick, time: now, data });
                    }
                }
            }
        }

        trace!(tick, "Cycle complete");
    }

    fn sample(&self) -> Result<Timestamp, LoopExit> {
        self.clock.now().map_err(|e| {
            error!(error = %e, "Clock read failed");
            LoopExit::ClockFailure(e)
        })
    }

    /// Wait one period before retrying after a timer failure.
    fn hold_off(&self) -> Option<LoopExit> {
        match self.timer.pause(self.period.as_duration()) {
            WaitOutcome::Elapsed => None,
            WaitOutcome::Canceled => Some(self.canceled_exit()),
            WaitOutcome::Failed(e) => {
                warn!(error = %e, "Retry pause failed");
                None
            }
        }
    }

    /// Count an unexpected wait failure. Only these end the loop at the limit.
    fn note_wait_failure(&mut self, e: PlcError) -> Option<LoopExit> {
        self.skipped += 1;
        self.timer_failures += 1;
        self.consecutive_failures += 1;

        let limit = self.max_consecutive_failures;
        if limit != 0 && self.consecutive_failures >= limit {
            error!(consecutive = self.consecutive_failures, "Timer wait failure limit reached");
            return Some(LoopExit::TimerFailure(e));
        }
        None
    }

    fn canceled_exit(&self) -> LoopExit {
        if self.shared.run_flag.is_raised() {
            error!("Timer canceled while the loop was still running");
            LoopExit::TimerFailure(PlcError::TimerCanceled)
        } else {
            debug!("Timer canceled by stop request");
            LoopExit::Stopped
        }
    }
}

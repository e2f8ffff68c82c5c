//! One-shot cycle timer.
//!
//! The scheduler arms exactly one future wake per cycle and blocks in
//! [`CycleTimer::wait`] until it fires. There is no built-in repeat: the caller
//! re-arms after every cycle, which is what lets a late cycle push the next
//! deadline out instead of queueing catch-up wakes.
//!
//! Canceling is sticky and doubles as destruction: any in-progress or future
//! `wait` returns [`WaitOutcome::Canceled`], and further arms are refused.

use crate::clock::{SystemClock, TimeSource};
use plc_common::error::{PlcError, PlcResult};
use plc_common::time::Timestamp;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::trace;

/// Result of blocking on a cycle timer.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    /// The armed deadline passed.
    Elapsed,
    /// The timer was canceled, normally by `stop`.
    Canceled,
    /// The wait failed for another reason.
    Failed(PlcError),
}

/// Single-shot timer the scheduler thread blocks on.
pub trait CycleTimer: Send + Sync {
    /// Schedule one wake `delay` after the timer's current time.
    fn arm(&self, delay: Duration) -> PlcResult<()>;

    /// Schedule one wake at an absolute wall-clock deadline.
    ///
    /// A deadline already in the past fires immediately.
    fn arm_at(&self, deadline: Timestamp) -> PlcResult<()>;

    /// Block until the armed deadline passes or the timer is canceled.
    fn wait(&self) -> WaitOutcome;

    /// Block for `duration` without touching the armed deadline.
    ///
    /// Used to hold off a retry after a failed arm or wait. Returns
    /// [`WaitOutcome::Canceled`] early if the timer is canceled.
    fn pause(&self, duration: Duration) -> WaitOutcome;

    /// Cancel the timer, waking any thread blocked in [`wait`](Self::wait).
    fn cancel(&self);
}

#[derive(Debug, Default)]
struct TimerState {
    deadline: Option<Instant>,
    canceled: bool,
}

/// Condition-variable backed timer.
///
/// Blocks on `Condvar::wait_timeout` against a monotonic deadline rather than
/// sleeping in slices, so a cancel wakes the waiter immediately.
#[derive(Debug)]
pub struct WaitableTimer {
    state: Mutex<TimerState>,
    wake: Condvar,
    clock: SystemClock,
}

impl Default for WaitableTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitableTimer {
    /// Create an unarmed timer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TimerState::default()),
            wake: Condvar::new(),
            clock: SystemClock::new(),
        }
    }

    /// Whether [`cancel`](CycleTimer::cancel) has been called.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .canceled
    }
}

impl CycleTimer for WaitableTimer {
    fn arm(&self, delay: Duration) -> PlcResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| PlcError::TimerArm("timer state poisoned".into()))?;
        if state.canceled {
            return Err(PlcError::TimerCanceled);
        }

        let deadline = Instant::now()
            .checked_add(delay)
            .ok_or_else(|| PlcError::TimerArm(format!("delay {delay:?} overflows the clock")))?;
        state.deadline = Some(deadline);
        trace!(delay_ns = delay.as_nanos() as u64, "Timer armed");

        self.wake.notify_all();
        Ok(())
    }

    fn arm_at(&self, deadline: Timestamp) -> PlcResult<()> {
        let now = self
            .clock
            .now()
            .map_err(|e| PlcError::TimerArm(format!("cannot resolve absolute deadline: {e}")))?;
        self.arm(deadline.saturating_duration_since(now))
    }

    fn wait(&self) -> WaitOutcome {
        let Ok(mut state) = self.state.lock() else {
            return WaitOutcome::Failed(PlcError::TimerWait("timer state poisoned".into()));
        };

        loop {
            if state.canceled {
                return WaitOutcome::Canceled;
            }
            let Some(deadline) = state.deadline else {
                return WaitOutcome::Failed(PlcError::TimerWait("timer not armed".into()));
            };

            let now = Instant::now();
            if now >= deadline {
                state.deadline = None;
                return WaitOutcome::Elapsed;
            }

            state = match self.wake.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(_) => {
                    return WaitOutcome::Failed(PlcError::TimerWait("timer state poisoned".into()))
                }
            };
        }
    }

    fn pause(&self, duration: Duration) -> WaitOutcome {
        let Ok(mut state) = self.state.lock() else {
            return WaitOutcome::Failed(PlcError::TimerWait("timer state poisoned".into()));
        };
        let Some(until) = Instant::now().checked_add(duration) else {
            return WaitOutcome::Failed(PlcError::TimerWait(format!("pause {duration:?} overflows the clock")));
        };

        loop {
            if state.canceled {
                return WaitOutcome::Canceled;
            }
            let now = Instant::now();
            if now >= until {
                return WaitOutcome::Elapsed;
            }
            state = match self.wake.wait_timeout(state, until - now) {
                Ok((guard, _)) => guard,
                Err(_) => {
                    return WaitOutcome::Failed(PlcError::TimerWait("timer state poisoned".into()))
                }
            };
        }
    }

    fn cancel(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.canceled = true;
        state.deadline = None;
        self.wake.notify_all();
    }
}

//! Deterministic stand-ins for the clock, timer and thread factory.
//!
//! The simulated timer never sleeps: a wait jumps the simulated clock straight
//! to the armed deadline, so hundreds of cycles run in microseconds while the
//! control program still observes exact periods. Every deadline is recorded,
//! failures can be injected, and the platform counts the timers and threads
//! it hands out so tests can prove nothing leaks.
//!
//! ```ignore
//! let platform = SimulatedPlatform::new();
//! platform.timer_log().set_wake_limit(100);
//! let mut controller = LifecycleController::with_platform(program, config, platform);
//! ```

use crate::clock::TimeSource;
use crate::platform::Platform;
use crate::timer::{CycleTimer, WaitOutcome};
use plc_common::error::{PlcError, PlcResult};
use plc_common::time::Timestamp;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Manually driven wall clock.
#[derive(Debug)]
pub struct SimulatedClock {
    now: Mutex<Timestamp>,
    failing: AtomicBool,
    reads: AtomicU64,
}

impl SimulatedClock {
    /// Create a clock reading `start`.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
            failing: AtomicBool::new(false),
            reads: AtomicU64::new(0),
        }
    }

    /// Current reading, ignoring injected failures.
    #[must_use]
    pub fn peek(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = *now + by;
    }

    /// Move the clock to `target` unless it is already later.
    pub fn advance_to(&self, target: Timestamp) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        if target > *now {
            *now = target;
        }
    }

    /// Make every subsequent [`TimeSource::now`] fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// Successful reads so far.
    #[must_use]
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

impl TimeSource for SimulatedClock {
    fn now(&self) -> PlcResult<Timestamp> {
        if self.failing.load(Ordering::Acquire) {
            return Err(PlcError::ClockRead("simulated clock failure".into()));
        }
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.peek())
    }
}

/// Record of every timer created by one [`SimulatedPlatform`], plus fault injection.
#[derive(Debug)]
pub struct TimerLog {
    deadlines: Mutex<Vec<Timestamp>>,
    wakes: AtomicU64,
    pauses: AtomicU64,
    wake_limit: AtomicU64,
    arm_failures: AtomicU32,
    wait_failures: AtomicU32,
}

impl Default for TimerLog {
    fn default() -> Self {
        Self {
            deadlines: Mutex::new(Vec::new()),
            wakes: AtomicU64::new(0),
            pauses: AtomicU64::new(0),
            wake_limit: AtomicU64::new(u64::MAX),
            arm_failures: AtomicU32::new(0),
            wait_failures: AtomicU32::new(0),
        }
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

impl TimerLog {
    /// Every deadline armed so far, in order.
    #[must_use]
    pub fn deadlines(&self) -> Vec<Timestamp> {
        self.deadlines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of waits that returned `Elapsed`.
    #[must_use]
    pub fn wakes(&self) -> u64 {
        self.wakes.load(Ordering::Acquire)
    }

    /// Number of retry pauses taken.
    #[must_use]
    pub fn pauses(&self) -> u64 {
        self.pauses.load(Ordering::Acquire)
    }

    /// After `limit` wakes, waits block until the timer is canceled.
    pub fn set_wake_limit(&self, limit: u64) {
        self.wake_limit.store(limit, Ordering::Release);
    }

    /// Make the next `count` arms fail.
    pub fn fail_next_arms(&self, count: u32) {
        self.arm_failures.store(count, Ordering::Release);
    }

    /// Make the next `count` waits fail.
    pub fn fail_next_waits(&self, count: u32) {
        self.wait_failures.store(count, Ordering::Release);
    }

    fn budget_spent(&self) -> bool {
        self.wakes.load(Ordering::Acquire) >= self.wake_limit.load(Ordering::Acquire)
    }
}

/// Counts of resources handed out by a [`SimulatedPlatform`].
#[derive(Debug, Default)]
pub struct ResourceCounters {
    timers_created: AtomicUsize,
    timers_live: AtomicUsize,
    threads_spawned: AtomicUsize,
    threads_live: AtomicUsize,
}

impl ResourceCounters {
    /// Timers created so far.
    #[must_use]
    pub fn timers_created(&self) -> usize {
        self.timers_created.load(Ordering::Acquire)
    }

    /// Timers not yet dropped.
    #[must_use]
    pub fn timers_live(&self) -> usize {
        self.timers_live.load(Ordering::Acquire)
    }

    /// Threads spawned so far.
    #[must_use]
    pub fn threads_spawned(&self) -> usize {
        self.threads_spawned.load(Ordering::Acquire)
    }

    /// Threads whose body has not finished.
    #[must_use]
    pub fn threads_live(&self) -> usize {
        self.threads_live.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct SimTimerState {
    deadline: Option<Timestamp>,
    canceled: bool,
}

/// Timer that completes waits by advancing a [`SimulatedClock`].
#[derive(Debug)]
pub struct SimulatedTimer {
    clock: Arc<SimulatedClock>,
    log: Arc<TimerLog>,
    counters: Arc<ResourceCounters>,
    state: Mutex<SimTimerState>,
    wake: Condvar,
}

impl CycleTimer for SimulatedTimer {
    fn arm(&self, delay: Duration) -> PlcResult<()> {
        self.arm_at(self.clock.peek() + delay)
    }

    fn arm_at(&self, deadline: Timestamp) -> PlcResult<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.canceled {
            return Err(PlcError::TimerCanceled);
        }
        if take_one(&self.log.arm_failures) {
            return Err(PlcError::TimerArm("injected arm failure".into()));
        }

        state.deadline = Some(deadline);
        self.log
            .deadlines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(deadline);
        Ok(())
    }

    fn wait(&self) -> WaitOutcome {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.canceled {
            return WaitOutcome::Canceled;
        }
        if take_one(&self.log.wait_failures) {
            return WaitOutcome::Failed(PlcError::TimerWait("injected wait failure".into()));
        }
        let Some(deadline) = state.deadline.take() else {
            return WaitOutcome::Failed(PlcError::TimerWait("timer not armed".into()));
        };

        // Past the wake budget the timer never fires again; only cancel ends the wait.
        while self.log.budget_spent() && !state.canceled {
            state = self.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        if state.canceled {
            return WaitOutcome::Canceled;
        }

        self.clock.advance_to(deadline);
        self.log.wakes.fetch_add(1, Ordering::AcqRel);
        WaitOutcome::Elapsed
    }

    fn pause(&self, duration: Duration) -> WaitOutcome {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.canceled {
            return WaitOutcome::Canceled;
        }
        self.clock.advance(duration);
        self.log.pauses.fetch_add(1, Ordering::AcqRel);
        WaitOutcome::Elapsed
    }

    fn cancel(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.canceled = true;
        state.deadline = None;
        self.wake.notify_all();
    }
}

impl Drop for SimulatedTimer {
    fn drop(&mut self) {
        self.counters.timers_live.fetch_sub(1, Ordering::AcqRel);
    }
}

struct ThreadGuard(Arc<ResourceCounters>);

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        self.0.threads_live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Platform built from simulated parts.
#[derive(Debug)]
pub struct SimulatedPlatform {
    clock: Arc<SimulatedClock>,
    log: Arc<TimerLog>,
    counters: Arc<ResourceCounters>,
    fail_timer_creation: AtomicBool,
    fail_spawn: AtomicBool,
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPlatform {
    /// Platform whose clock starts at 2023-11-14T22:13:20Z.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Timestamp::new(1_700_000_000, 0))
    }

    /// Platform whose clock starts at `start`.
    #[must_use]
    pub fn starting_at(start: Timestamp) -> Self {
        Self {
            clock: Arc::new(SimulatedClock::new(start)),
            log: Arc::new(TimerLog::default()),
            counters: Arc::new(ResourceCounters::default()),
            fail_timer_creation: AtomicBool::new(false),
            fail_spawn: AtomicBool::new(false),
        }
    }

    /// Deadlines, wakes and failure injection for this platform's timers.
    #[must_use]
    pub fn timer_log(&self) -> Arc<TimerLog> {
        Arc::clone(&self.log)
    }

    /// Resource counters.
    #[must_use]
    pub fn counters(&self) -> Arc<ResourceCounters> {
        Arc::clone(&self.counters)
    }

    /// Make `create_timer` fail.
    pub fn fail_timer_creation(&self, fail: bool) {
        self.fail_timer_creation.store(fail, Ordering::Release);
    }

    /// Make `spawn` fail.
    pub fn fail_spawn(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::Release);
    }
}

impl Platform for SimulatedPlatform {
    type Clock = SimulatedClock;
    type Timer = SimulatedTimer;

    fn clock(&self) -> Arc<SimulatedClock> {
        Arc::clone(&self.clock)
    }

    fn create_timer(&self) -> PlcResult<SimulatedTimer> {
        if self.fail_timer_creation.load(Ordering::Acquire) {
            return Err(PlcError::Fault("simulated timer creation failure".into()));
        }

        self.counters.timers_created.fetch_add(1, Ordering::AcqRel);
        self.counters.timers_live.fetch_add(1, Ordering::AcqRel);
        Ok(SimulatedTimer {
            clock: Arc::clone(&self.clock),
            log: Arc::clone(&self.log),
            counters: Arc::clone(&self.counters),
            state: Mutex::new(SimTimerState::default()),
            wake: Condvar::new(),
        })
    }

    fn spawn<F, R>(&self, name: &str, body: F) -> PlcResult<JoinHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.fail_spawn.load(Ordering::Acquire) {
            return Err(PlcError::ThreadSpawn("simulated spawn failure".into()));
        }

        self.counters.threads_spawned.fetch_add(1, Ordering::AcqRel);
        self.counters.threads_live.fetch_add(1, Ordering::AcqRel);
        let guard = ThreadGuard(Arc::clone(&self.counters));

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _guard = guard;
                body()
            })
            .map_err(|e| PlcError::ThreadSpawn(e.to_string()))
    }
}

//! Start/stop control for one cyclic control program.
//!
//! `start` initializes the program on the caller's thread, then hands it to a
//! dedicated scheduler thread. `stop` clears the run flag, cancels the timer so
//! a blocked wait returns at once, joins the thread and finally runs the
//! program's `cleanup` on the caller's thread. A controller may be restarted
//! after it stopped.

use crate::debug_image::DebugImage;
use crate::platform::{Platform, SystemPlatform};
use crate::program::ControlProgram;
use crate::realtime::init_realtime;
use crate::scheduler::{CyclicScheduler, LoopReport, LoopShared};
use crate::timer::CycleTimer;
use plc_common::config::RuntimeConfig;
use plc_common::error::{PlcError, PlcResult};
use plc_common::state::{LifecycleState, SchedulerPhase, StateMachine};
use plc_common::time::{TickPeriod, Timestamp};
use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tracing::{error, info, warn};

/// Resources that exist only while the scheduler thread does.
struct ActiveLoop<T> {
    handle: JoinHandle<LoopReport>,
    timer: Arc<T>,
    shared: Arc<LoopShared>,
    debug: Arc<DebugImage>,
}

/// Owns a control program and the thread that cycles it.
pub struct LifecycleController<P: ControlProgram, F: Platform = SystemPlatform> {
    platform: F,
    config: RuntimeConfig,
    state: StateMachine,
    program: Arc<Mutex<P>>,
    active: Option<ActiveLoop<F::Timer>>,
    last_report: Option<LoopReport>,
}

impl<P: ControlProgram> LifecycleController<P, SystemPlatform> {
    /// Controller on the production platform.
    pub fn new(program: P, config: RuntimeConfig) -> Self {
        Self::with_platform(program, config, SystemPlatform::new())
    }
}

impl<P: ControlProgram, F: Platform> LifecycleController<P, F> {
    /// Controller on a custom platform.
    pub fn with_platform(program: P, config: RuntimeConfig, platform: F) -> Self {
        Self {
            platform,
            config,
            state: StateMachine::new(),
            program: Arc::new(Mutex::new(program)),
            active: None,
            last_report: None,
        }
    }

    /// Initialize the program and launch the scheduler thread.
    ///
    /// On error nothing is left behind: no thread, no timer, and `cleanup`
    /// is not called for a program whose `init` failed.
    ///
    /// # Errors
    ///
    /// - [`PlcError::AlreadyRunning`] while a scheduler thread exists
    /// - [`PlcError::InitFailed`] when the program's `init` fails
    /// - whatever the platform reports for timer or thread creation
    pub fn start(&mut self, args: &[String]) -> PlcResult<()> {
        if !self.state.state().can_transition_to(LifecycleState::Running) {
            return Err(PlcError::AlreadyRunning);
        }

        let period = self.config.tick();
        let debug = Arc::new(DebugImage::new());
        let timer = Arc::new(self.platform.create_timer()?);

        let initialized = self.lock_program().init(args);
        if let Err(e) = initialized {
            error!(error = %e, "Control program init failed");
            timer.cancel();
            drop(timer);
            debug.close();
            return Err(match e {
                PlcError::InitFailed(_) => e,
                other => PlcError::InitFailed(other.to_string()),
            });
        }

        let shared = Arc::new(LoopShared::new());
        shared.run_flag().raise();

        let scheduler = CyclicScheduler::new(
            &self.config,
            Arc::clone(&timer),
            self.platform.clock(),
            Arc::clone(&shared),
        )
        .with_debug_image(Arc::clone(&debug));
        let program = Arc::clone(&self.program);
        let realtime = self.config.realtime.clone();

        let spawned = self.platform.spawn(&self.config.thread_name, move || {
            if let Err(e) = init_realtime(&realtime) {
                warn!(error = %e, "Real-time setup failed, running without it");
            }
            let mut program = program.lock().unwrap_or_else(PoisonError::into_inner);
            scheduler.run(&mut *program)
        });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "Scheduler thread could not be spawned");
                timer.cancel();
                debug.close();
                self.lock_program().cleanup();
                return Err(e);
            }
        };

        self.state.transition(LifecycleState::Running)?;
        self.active = Some(ActiveLoop {
            handle,
            timer,
            shared,
            debug,
        });
        self.check_resources();

        info!(
            tick_ms = period.as_millis(),
            thread = %self.config.thread_name,
            "Control program started"
        );
        Ok(())
    }

    /// Stop the scheduler thread and clean the program up.
    ///
    /// Returns the loop's report, including a fatal exit that ended the
    /// thread before `stop` was called.
    ///
    /// # Errors
    ///
    /// - [`PlcError::NotRunning`] unless the controller is running
    /// - [`PlcError::ThreadPanicked`] when the scheduler thread panicked
    pub fn stop(&mut self) -> PlcResult<LoopReport> {
        let current = self.state.state();
        let active = match self.active.take() {
            Some(active) if current == LifecycleState::Running => active,
            other => {
                self.active = other;
                return Err(PlcError::NotRunning {
                    state: current.to_string(),
                });
            }
        };
        let ActiveLoop {
            handle,
            timer,
            shared,
            debug,
        } = active;

        self.state.transition(LifecycleState::Stopping)?;
        info!("Stopping control program");

        shared.run_flag().clear();
        timer.cancel();
        let joined = handle.join();

        drop(timer);
        debug.close();
        self.state.transition(LifecycleState::Stopped)?;
        self.check_resources();
        self.lock_program().cleanup();

        match joined {
            Ok(report) => {
                info!(
                    cycles = report.cycles,
                    skipped = report.skipped,
                    cycle_faults = report.cycle_faults,
                    exit = ?report.exit,
                    "Control program stopped"
                );
                self.last_report = Some(report.clone());
                Ok(report)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(panic = %message, "Scheduler thread panicked");
                Err(PlcError::ThreadPanicked(message))
            }
        }
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state.state()
    }

    /// Whether `start` succeeded and `stop` has not been called since.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.state() == LifecycleState::Running
    }

    /// Whether the scheduler thread has already returned on its own.
    ///
    /// `true` while running means the loop hit a fatal exit; `stop` still
    /// has to be called to collect the report.
    #[must_use]
    pub fn loop_finished(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.handle.is_finished())
    }

    /// Phase of the scheduler loop.
    #[must_use]
    pub fn scheduler_phase(&self) -> SchedulerPhase {
        match &self.active {
            Some(active) => active.shared.phase(),
            None if self.state.state() == LifecycleState::Stopped => SchedulerPhase::Stopped,
            None => SchedulerPhase::Idle,
        }
    }

    /// Cycles run by the current or most recent scheduler thread.
    #[must_use]
    pub fn cycle_count(&self) -> u64 {
        match (&self.active, &self.last_report) {
            (Some(active), _) => active.shared.cycle_count(),
            (None, Some(report)) => report.cycles,
            (None, None) => 0,
        }
    }

    /// Time sampled for the latest cycle, while running.
    #[must_use]
    pub fn current_time(&self) -> Option<Timestamp> {
        let active = self.active.as_ref()?;
        (active.shared.cycle_count() > 0).then(|| active.shared.current_time())
    }

    /// Tick period derived from the configuration.
    #[must_use]
    pub fn period(&self) -> TickPeriod {
        self.config.tick()
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Platform in use.
    #[must_use]
    pub fn platform(&self) -> &F {
        &self.platform
    }

    /// Debug image of the running loop.
    ///
    /// Consumers may keep the handle past `stop`; waits then fail with
    /// [`PlcError::DebugGateClosed`].
    #[must_use]
    pub fn debug_image(&self) -> Option<Arc<DebugImage>> {
        self.active.as_ref().map(|a| Arc::clone(&a.debug))
    }

    /// Block until the debug gate is free and take it.
    ///
    /// # Errors
    ///
    /// [`PlcError::NotRunning`] when stopped, [`PlcError::DebugGateClosed`]
    /// when a stop happens while waiting.
    pub fn acquire_debug_access(&self) -> PlcResult<()> {
        self.running_debug()?.gate().acquire()
    }

    /// Release the debug gate. Returns `false` if it was not held.
    pub fn release_debug_access(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.debug.gate().release())
    }

    /// Pause snapshot publishing.
    ///
    /// # Errors
    ///
    /// [`PlcError::NotRunning`] when stopped.
    pub fn suspend_debug(&self) -> PlcResult<()> {
        self.running_debug()?.suspend();
        Ok(())
    }

    /// Resume snapshot publishing.
    ///
    /// # Errors
    ///
    /// [`PlcError::NotRunning`] when stopped.
    pub fn resume_debug(&self) -> PlcResult<()> {
        self.running_debug()?.resume();
        Ok(())
    }

    /// Report of the last completed run.
    #[must_use]
    pub fn last_report(&self) -> Option<&LoopReport> {
        self.last_report.as_ref()
    }

    /// Borrow the program while no scheduler thread owns it.
    ///
    /// # Errors
    ///
    /// [`PlcError::AlreadyRunning`] while a scheduler thread exists.
    pub fn with_program<R>(&self, f: impl FnOnce(&mut P) -> R) -> PlcResult<R> {
        if self.active.is_some() {
            return Err(PlcError::AlreadyRunning);
        }
        Ok(f(&mut self.lock_program()))
    }

    fn running_debug(&self) -> PlcResult<&DebugImage> {
        self.active
            .as_ref()
            .map(|a| a.debug.as_ref())
            .ok_or_else(|| PlcError::NotRunning {
                state: self.state.state().to_string(),
            })
    }

    /// A scheduler thread exists exactly in the states that own one.
    fn check_resources(&self) {
        debug_assert_eq!(
            self.state.state().has_thread(),
            self.active.is_some(),
            "scheduler thread does not match state {}",
            self.state.state()
        );
    }

    fn lock_program(&self) -> MutexGuard<'_, P> {
        self.program.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P: ControlProgram, F: Platform> Drop for LifecycleController<P, F> {
    fn drop(&mut self) {
        if self.state.state().has_thread() {
            if let Err(e) = self.stop() {
                error!(error = %e, "Stop on drop failed");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::CycleContext;
    use crate::simulated::SimulatedPlatform;
    use std::time::Duration;

    #[derive(Default)]
    struct Counter {
        inits: u32,
        cycles: u64,
        cleanups: u32,
        fail_init: bool,
        panic_on: Option<u64>,
    }

    impl ControlProgram for Counter {
        fn init(&mut self, _args: &[String]) -> PlcResult<()> {
            self.inits += 1;
            if self.fail_init {
                return Err(PlcError::Config("bad argument".into()));
            }
            Ok(())
        }

        fn run_cycle(&mut self, ctx: &CycleContext) -> PlcResult<()> {
            if self.panic_on == Some(ctx.tick) {
                panic!("cycle {} exploded", ctx.tick);
            }
            self.cycles += 1;
            Ok(())
        }

        fn cleanup(&mut self) {
            self.cleanups += 1;
        }
    }

    fn simulated(program: Counter, wakes: u64) -> LifecycleController<Counter, SimulatedPlatform> {
        let platform = SimulatedPlatform::new();
        platform.timer_log().set_wake_limit(wakes);
        LifecycleController::with_platform(program, RuntimeConfig::default(), platform)
    }

    fn wait_for_cycles(controller: &LifecycleController<Counter, SimulatedPlatform>, count: u64) {
        for _ in 0..1000 {
            if controller.cycle_count() >= count {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("only {} cycles ran", controller.cycle_count());
    }

    #[test]
    fn test_start_stop() {
        let mut controller = simulated(Counter::default(), 20);
        controller.start(&[]).unwrap();
        assert!(controller.is_running());
        wait_for_cycles(&controller, 20);

        let report = controller.stop().unwrap();
        assert!(report.exit.is_clean());
        assert_eq!(report.cycles, 20);
        assert_eq!(controller.state(), LifecycleState::Stopped);
        assert_eq!(controller.scheduler_phase(), SchedulerPhase::Stopped);

        let (cycles, cleanups) = controller.with_program(|p| (p.cycles, p.cleanups)).unwrap();
        assert_eq!(cycles, 20);
        assert_eq!(cleanups, 1);
    }

    #[test]
    fn test_thread_exists_only_while_running() {
        let mut controller = simulated(Counter::default(), 0);
        assert!(!controller.state().has_thread());
        assert!(controller.debug_image().is_none());

        controller.start(&[]).unwrap();
        assert!(controller.state().has_thread());
        assert!(controller.debug_image().is_some());
        assert_eq!(controller.platform().counters().threads_spawned(), 1);

        controller.stop().unwrap();
        assert!(!controller.state().has_thread());
        assert!(controller.debug_image().is_none());
        assert_eq!(controller.platform().counters().threads_live(), 0);
    }

    #[test]
    fn test_init_failure_leaves_nothing() {
        let program = Counter {
            fail_init: true,
            ..Default::default()
        };
        let mut controller = simulated(program, 10);
        let counters = controller.platform().counters();

        let err = controller.start(&[]).unwrap_err();
        assert!(matches!(err, PlcError::InitFailed(_)));
        assert_eq!(controller.state(), LifecycleState::Idle);
        assert_eq!(counters.threads_spawned(), 0);
        assert_eq!(counters.timers_live(), 0);
        assert_eq!(controller.with_program(|p| p.cleanups).unwrap(), 0);
    }

    #[test]
    fn test_stop_misuse() {
        let mut controller = simulated(Counter::default(), 1);
        assert!(matches!(controller.stop(), Err(PlcError::NotRunning { .. })));

        controller.start(&[]).unwrap();
        assert_eq!(controller.start(&[]), Err(PlcError::AlreadyRunning));
        controller.stop().unwrap();
        assert!(matches!(controller.stop(), Err(PlcError::NotRunning { .. })));
    }

    #[test]
    fn test_spawn_failure_cleans_up() {
        let mut controller = simulated(Counter::default(), 1);
        controller.platform().fail_spawn(true);
        let counters = controller.platform().counters();

        assert!(matches!(controller.start(&[]), Err(PlcError::ThreadSpawn(_))));
        assert_eq!(counters.timers_live(), 0);
        assert_eq!(controller.with_program(|p| (p.inits, p.cleanups)).unwrap(), (1, 1));
        assert!(!controller.is_running());
    }

    #[test]
    fn test_panic_is_reported() {
        let program = Counter {
            panic_on: Some(3),
            ..Default::default()
        };
        let mut controller = simulated(program, 100);
        controller.start(&[]).unwrap();

        for _ in 0..1000 {
            if controller.loop_finished() {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(controller.loop_finished());

        assert!(matches!(controller.stop(), Err(PlcError::ThreadPanicked(m)) if m.contains("exploded")));
        assert_eq!(controller.state(), LifecycleState::Stopped);
        assert_eq!(controller.with_program(|p| p.cleanups).unwrap(), 1);
    }

    #[test]
    fn test_with_program_refused_while_running() {
        let mut controller = simulated(Counter::default(), 0);
        controller.start(&[]).unwrap();
        assert_eq!(controller.with_program(|p| p.cycles), Err(PlcError::AlreadyRunning));
        controller.stop().unwrap();
    }
}

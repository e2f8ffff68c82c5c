//! Capability interface over the OS primitives the controller needs.
//!
//! The controller never touches clocks, timers or threads directly; it asks a
//! [`Platform`] for them. [`SystemPlatform`] hands out the real ones, while
//! [`SimulatedPlatform`](crate::simulated::SimulatedPlatform) substitutes a
//! deterministic clock and counts every resource it creates.

use crate::clock::{SystemClock, TimeSource};
use crate::timer::{CycleTimer, WaitableTimer};
use plc_common::error::{PlcError, PlcResult};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Factory for the clock, timer and thread used by one controller.
pub trait Platform: Send + Sync + 'static {
    /// Wall-clock source.
    type Clock: TimeSource + 'static;
    /// Cycle timer.
    type Timer: CycleTimer + 'static;

    /// Shared handle to the clock.
    fn clock(&self) -> Arc<Self::Clock>;

    /// Construct a fresh, unarmed timer.
    fn create_timer(&self) -> PlcResult<Self::Timer>;

    /// Spawn a named thread running `body`.
    fn spawn<F, R>(&self, name: &str, body: F) -> PlcResult<JoinHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        thread::Builder::new()
            .name(name.to_string())
            .spawn(body)
            .map_err(|e| PlcError::ThreadSpawn(e.to_string()))
    }
}

/// Production platform: `CLOCK_REALTIME`, condvar timer, OS threads.
#[derive(Debug, Clone, Default)]
pub struct SystemPlatform {
    clock: Arc<SystemClock>,
}

impl SystemPlatform {
    /// Create the production platform.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Platform for SystemPlatform {
    type Clock = SystemClock;
    type Timer = WaitableTimer;

    fn clock(&self) -> Arc<SystemClock> {
        Arc::clone(&self.clock)
    }

    fn create_timer(&self) -> PlcResult<WaitableTimer> {
        Ok(WaitableTimer::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_spawn_names_thread() {
        let platform = SystemPlatform::new();
        let handle = platform
            .spawn("plc-test", || thread::current().name().map(str::to_string))
            .unwrap();
        assert_eq!(handle.join().unwrap().as_deref(), Some("plc-test"));
    }

    #[test]
    fn test_system_timer_starts_unarmed() {
        let platform = SystemPlatform::new();
        let timer = platform.create_timer().unwrap();
        assert!(!timer.is_canceled());
        assert!(platform.clock().now().is_ok());
    }
}

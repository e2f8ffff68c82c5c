//! Common utilities for acceptance tests.
//!
//! Provides helpers for:
//! - A configurable test program that counts cycles and records start times
//! - Running a controller for a fixed wall-clock duration
//! - Checking interval statistics and generating test reports

#![allow(dead_code)] // Not every test file uses every helper

use plc_common::error::PlcResult;
use plc_common::metrics::MetricsSnapshot;
use plc_common::time::Timestamp;
use plc_runtime::lifecycle::LifecycleController;
use plc_runtime::program::{ControlProgram, CycleContext};
use plc_runtime::scheduler::LoopReport;
use std::fs;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Start times kept per run, enough for the short timing tests.
const MAX_RECORDED_STARTS: usize = 10_000;

/// Counters shared between a [`Ticker`] and the test body.
#[derive(Debug, Default)]
pub struct TickCounts {
    pub cycles: AtomicU64,
    pub cleanups: AtomicU32,
    pub starts: Mutex<Vec<Timestamp>>,
}

impl TickCounts {
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> Vec<Timestamp> {
        self.starts.lock().unwrap().clone()
    }
}

/// Program that optionally sleeps to simulate work.
pub struct Ticker {
    pub counts: Arc<TickCounts>,
    pub work: Duration,
}

impl Ticker {
    pub fn new(work: Duration) -> (Self, Arc<TickCounts>) {
        let counts = Arc::new(TickCounts::default());
        (
            Self {
                counts: Arc::clone(&counts),
                work,
            },
            counts,
        )
    }
}

impl ControlProgram for Ticker {
    fn init(&mut self, _args: &[String]) -> PlcResult<()> {
        self.counts.starts.lock().unwrap().clear();
        Ok(())
    }

    fn run_cycle(&mut self, ctx: &CycleContext) -> PlcResult<()> {
        {
            let mut starts = self.counts.starts.lock().unwrap();
            if starts.len() < MAX_RECORDED_STARTS {
                starts.push(ctx.now);
            }
        }
        if !self.work.is_zero() {
            thread::sleep(self.work);
        }
        self.counts.cycles.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cleanup(&mut self) {
        self.counts.cleanups.fetch_add(1, Ordering::SeqCst);
    }

    fn debug_image(&self) -> Option<Vec<u8>> {
        Some(self.counts.cycles().to_le_bytes().to_vec())
    }
}

/// Start `controller`, let it run for `duration`, stop it and return the report.
pub fn run_for<P: ControlProgram>(controller: &mut LifecycleController<P>, duration: Duration) -> LoopReport {
    controller.start(&[]).expect("start failed");
    thread::sleep(duration);
    controller.stop().expect("stop failed")
}

/// Poll `condition` every millisecond until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Get current process memory usage in bytes.
pub fn get_memory_usage() -> u64 {
    fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok())
        })
        .map_or(0, |kb| kb * 1024)
}

/// Acceptance criteria for cycle spacing.
pub struct IntervalCriteria {
    /// Smallest acceptable start-to-start interval.
    pub min_interval: Duration,
    /// Largest acceptable worst-case start-to-start interval.
    pub max_interval: Duration,
}

impl IntervalCriteria {
    /// Tolerances for `period` on an unprivileged, possibly loaded host.
    pub fn for_period(period: Duration) -> Self {
        Self {
            // Wall clock and monotonic timer may disagree by a little
            min_interval: period.saturating_sub(Duration::from_millis(1)),
            max_interval: period * 10 + Duration::from_millis(100),
        }
    }

    /// Check the interval range of a run.
    pub fn check(&self, snapshot: &MetricsSnapshot) -> Result<(), String> {
        let (Some(min), Some(max)) = (snapshot.interval_min_ns, snapshot.interval_max_ns) else {
            return Err("no intervals recorded".into());
        };
        let min = Duration::from_nanos(min);
        let max = Duration::from_nanos(max);
        if min < self.min_interval {
            return Err(format!("interval {min:?} shorter than {:?}", self.min_interval));
        }
        if max > self.max_interval {
            return Err(format!("interval {max:?} longer than {:?}", self.max_interval));
        }
        Ok(())
    }
}

/// Generate a JSON report from a run.
pub fn generate_report(test_name: &str, report: &LoopReport, passed: bool) -> String {
    let snapshot = report.metrics.snapshot();
    serde_json::to_string_pretty(&serde_json::json!({
        "test": test_name,
        "passed": passed,
        "cycles": report.cycles,
        "skipped": report.skipped,
        "cycle_faults": report.cycle_faults,
        "jitter_ns": snapshot.jitter_ns(),
        "metrics": snapshot,
    }))
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_usage_readable() {
        if cfg!(target_os = "linux") {
            assert!(get_memory_usage() > 0);
        }
    }

    #[test]
    fn test_criteria_rejects_empty_run() {
        let criteria = IntervalCriteria::for_period(Duration::from_millis(10));
        let snapshot = MetricsSnapshot {
            total_cycles: 0,
            exec_min_ns: None,
            exec_max_ns: None,
            exec_mean_ns: None,
            interval_min_ns: None,
            interval_max_ns: None,
            overrun_count: 0,
        };
        assert!(criteria.check(&snapshot).is_err());
    }
}

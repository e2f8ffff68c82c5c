//! Soak (long-duration stability) test.
//!
//! Runs a 1 ms tick for a minute and checks for memory growth, skipped
//! cycles and program faults.
//!
//! # Acceptance Criteria
//!
//! - Zero skipped cycles and zero cycle faults
//! - Memory growth below 1 MiB over the run
//! - At least half the nominal cycle count

use super::common::{generate_report, get_memory_usage, Ticker};
use plc_common::config::RuntimeConfig;
use plc_runtime::lifecycle::LifecycleController;
use std::thread;
use std::time::Duration;

const SOAK_DURATION: Duration = Duration::from_secs(60);
const MAX_MEMORY_GROWTH: u64 = 1024 * 1024;

#[test]
#[ignore = "Runs for a minute"]
fn test_soak_one_minute() {
    let (program, counts) = Ticker::new(Duration::ZERO);
    let config = RuntimeConfig {
        tick_period: Duration::from_millis(1),
        ..Default::default()
    };
    let mut controller = LifecycleController::new(program, config);

    controller.start(&[]).unwrap();
    // Let allocations settle before taking the baseline
    thread::sleep(Duration::from_secs(2));
    let baseline = get_memory_usage();

    let mut elapsed = Duration::ZERO;
    while elapsed < SOAK_DURATION {
        thread::sleep(Duration::from_secs(10));
        elapsed += Duration::from_secs(10);
        println!(
            "soak: {:?} elapsed, {} cycles, rss {} KiB",
            elapsed,
            counts.cycles(),
            get_memory_usage() / 1024
        );
    }

    let grown = get_memory_usage().saturating_sub(baseline);
    let report = controller.stop().unwrap();
    let passed = report.skipped == 0 && report.cycle_faults == 0 && grown < MAX_MEMORY_GROWTH;
    println!("{}", generate_report("soak_one_minute", &report, passed));

    assert!(report.exit.is_clean());
    assert_eq!(report.skipped, 0);
    assert_eq!(report.cycle_faults, 0);
    assert!(grown < MAX_MEMORY_GROWTH, "memory grew by {grown} bytes");
    assert!(report.cycles >= 30_000, "only {} cycles", report.cycles);
}

//! Shutdown acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - `stop` returns promptly even when the next tick is far away
//! - No cycle runs after `stop` returns, and `cleanup` runs exactly once
//! - A blocked debug consumer is released at stop

use super::common::{wait_until, Ticker};
use plc_common::config::RuntimeConfig;
use plc_common::error::PlcError;
use plc_runtime::lifecycle::LifecycleController;
use plc_runtime::scheduler::LoopExit;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

fn config_ms(millis: u64) -> RuntimeConfig {
    RuntimeConfig {
        tick_period: Duration::from_millis(millis),
        ..Default::default()
    }
}

#[test]
fn test_stop_interrupts_long_period() {
    let (program, counts) = Ticker::new(Duration::ZERO);
    let mut controller = LifecycleController::new(program, config_ms(5_000));

    controller.start(&[]).unwrap();
    thread::sleep(Duration::from_millis(50));

    let begun = Instant::now();
    let report = controller.stop().unwrap();
    let latency = begun.elapsed();

    assert!(latency < Duration::from_millis(500), "stop took {latency:?}");
    assert_eq!(report.exit, LoopExit::Stopped);
    assert_eq!(report.cycles, 0);
    assert_eq!(counts.cleanups.load(Ordering::SeqCst), 1);
}

#[test]
fn test_no_cycles_after_stop() {
    let (program, counts) = Ticker::new(Duration::ZERO);
    let mut controller = LifecycleController::new(program, config_ms(2));

    controller.start(&[]).unwrap();
    assert!(wait_until(Duration::from_secs(5), || counts.cycles() >= 10));
    let report = controller.stop().unwrap();

    let at_stop = counts.cycles();
    assert_eq!(at_stop, report.cycles);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(counts.cycles(), at_stop);
}

#[test]
fn test_drop_stops_scheduler() {
    let (program, counts) = Ticker::new(Duration::ZERO);
    {
        let mut controller = LifecycleController::new(program, config_ms(2));
        controller.start(&[]).unwrap();
        assert!(wait_until(Duration::from_secs(5), || counts.cycles() >= 3));
    }

    let after_drop = counts.cycles();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(counts.cycles(), after_drop);
    assert_eq!(counts.cleanups.load(Ordering::SeqCst), 1);
}

#[test]
fn test_debug_consumer_released() {
    let (program, _) = Ticker::new(Duration::ZERO);
    let mut controller = LifecycleController::new(program, config_ms(1_000));
    controller.start(&[]).unwrap();

    let image = controller.debug_image().unwrap();
    // Hold the gate so the consumer below blocks until a publish or stop
    image.gate().acquire().unwrap();
    let consumer = thread::spawn(move || image.wait_debug_data());

    thread::sleep(Duration::from_millis(50));
    let begun = Instant::now();
    controller.stop().unwrap();

    assert_eq!(consumer.join().unwrap(), Err(PlcError::DebugGateClosed));
    assert!(begun.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_repeated_restart() {
    let (program, counts) = Ticker::new(Duration::ZERO);
    let mut controller = LifecycleController::new(program, config_ms(2));

    for round in 1..=3u32 {
        controller.start(&[]).unwrap();
        let target = counts.cycles() + 3;
        assert!(wait_until(Duration::from_secs(5), || counts.cycles() >= target));
        let report = controller.stop().unwrap();
        assert!(report.exit.is_clean());
        assert_eq!(counts.cleanups.load(Ordering::SeqCst), round);
    }
}

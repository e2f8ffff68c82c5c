//! Cycle timing statistics.
//!
//! Tracks how long each control cycle ran and how far apart consecutive
//! cycle starts were. Execution times go into a fixed ring buffer so
//! recording never allocates on the scheduler thread.

use serde::Serialize;
use std::time::Duration;

/// Per-cycle timing statistics owned by the scheduler thread.
#[derive(Debug, Clone)]
pub struct CycleMetrics {
    /// Most recent execution times in nanoseconds.
    exec_ring: Box<[u64]>,
    next_slot: usize,
    filled: usize,
    total_cycles: u64,
    exec_min_ns: u64,
    exec_max_ns: u64,
    exec_sum_ns: u64,
    /// Cycles whose execution exceeded the period.
    overrun_count: u64,
    interval_min_ns: u64,
    interval_max_ns: u64,
    interval_count: u64,
    period_ns: u64,
}

impl CycleMetrics {
    /// Create a collector for the given ring size and nominal period.
    #[must_use]
    pub fn new(histogram_size: usize, period: Duration) -> Self {
        Self {
            exec_ring: vec![0u64; histogram_size.max(1)].into_boxed_slice(),
            next_slot: 0,
            filled: 0,
            total_cycles: 0,
            exec_min_ns: u64::MAX,
            exec_max_ns: 0,
            exec_sum_ns: 0,
            overrun_count: 0,
            interval_min_ns: u64::MAX,
            interval_max_ns: 0,
            interval_count: 0,
            period_ns: u64::try_from(period.as_nanos()).unwrap_or(u64::MAX),
        }
    }

    /// Record one cycle.
    ///
    /// `interval` is the time since the previous cycle started, absent for the first cycle.
    pub fn record(&mut self, execution: Duration, interval: Option<Duration>) {
        let ns = u64::try_from(execution.as_nanos()).unwrap_or(u64::MAX);

        let ring = self.exec_ring.len();
        self.exec_ring[self.next_slot] = ns;
        self.next_slot = (self.next_slot + 1) % ring;
        self.filled = ring.min(self.filled + 1);

        self.total_cycles += 1;
        self.exec_min_ns = self.exec_min_ns.min(ns);
        self.exec_max_ns = self.exec_max_ns.max(ns);
        self.exec_sum_ns = self.exec_sum_ns.wrapping_add(ns);
        if ns > self.period_ns {
            self.overrun_count += 1;
        }

        if let Some(interval) = interval {
            let ins = u64::try_from(interval.as_nanos()).unwrap_or(u64::MAX);
            self.interval_min_ns = self.interval_min_ns.min(ins);
            self.interval_max_ns = self.interval_max_ns.max(ins);
            self.interval_count += 1;
        }
    }

    /// Total cycles recorded.
    #[must_use]
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Cycles whose execution exceeded the period.
    #[must_use]
    pub fn overrun_count(&self) -> u64 {
        self.overrun_count
    }

    /// Shortest execution time.
    #[must_use]
    pub fn min(&self) -> Option<Duration> {
        (self.total_cycles > 0).then(|| Duration::from_nanos(self.exec_min_ns))
    }

    /// Longest execution time.
    #[must_use]
    pub fn max(&self) -> Option<Duration> {
        (self.total_cycles > 0).then(|| Duration::from_nanos(self.exec_max_ns))
    }

    /// Mean execution time.
    #[must_use]
    pub fn mean(&self) -> Option<Duration> {
        (self.total_cycles > 0).then(|| Duration::from_nanos(self.exec_sum_ns / self.total_cycles))
    }

    /// Shortest and longest start-to-start interval.
    #[must_use]
    pub fn interval_range(&self) -> Option<(Duration, Duration)> {
        (self.interval_count > 0).then(|| {
            (
                Duration::from_nanos(self.interval_min_ns),
                Duration::from_nanos(self.interval_max_ns),
            )
        })
    }

    /// Execution-time percentile over the ring buffer (0.0 to 100.0).
    #[must_use]
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        if self.filled == 0 || !(0.0..=100.0).contains(&percentile) {
            return None;
        }
        let mut window = self.exec_ring[..self.filled].to_vec();
        window.sort_unstable();
        let last = window.len() - 1;
        let rank = (percentile / 100.0 * last as f64).round() as usize;
        window.get(rank.min(last)).copied().map(Duration::from_nanos)
    }

    /// Summary for logging and reports.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let interval = self.interval_range();
        MetricsSnapshot {
            total_cycles: self.total_cycles,
            exec_min_ns: self.min().map(|d| d.as_nanos() as u64),
            exec_max_ns: self.max().map(|d| d.as_nanos() as u64),
            exec_mean_ns: self.mean().map(|d| d.as_nanos() as u64),
            interval_min_ns: interval.map(|(min, _)| min.as_nanos() as u64),
            interval_max_ns: interval.map(|(_, max)| max.as_nanos() as u64),
            overrun_count: self.overrun_count,
        }
    }
}

/// Point-in-time copy of [`CycleMetrics`], serializable for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Total cycles executed.
    pub total_cycles: u64,
    /// Shortest execution time in nanoseconds.
    pub exec_min_ns: Option<u64>,
    /// Longest execution time in nanoseconds.
    pub exec_max_ns: Option<u64>,
    /// Mean execution time in nanoseconds.
    pub exec_mean_ns: Option<u64>,
    /// Shortest start-to-start interval in nanoseconds.
    pub interval_min_ns: Option<u64>,
    /// Longest start-to-start interval in nanoseconds.
    pub interval_max_ns: Option<u64>,
    /// Cycles whose execution exceeded the period.
    pub overrun_count: u64,
}

impl MetricsSnapshot {
    /// Spread of start-to-start intervals in nanoseconds.
    #[must_use]
    pub fn jitter_ns(&self) -> Option<u64> {
        let min = self.interval_min_ns?;
        self.interval_max_ns.map(|max| max.saturating_sub(min))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_stats() {
        let mut metrics = CycleMetrics::new(16, Duration::from_millis(1));
        metrics.record(Duration::from_micros(500), None);
        metrics.record(Duration::from_micros(600), Some(Duration::from_millis(1)));
        metrics.record(Duration::from_micros(550), Some(Duration::from_millis(1)));

        assert_eq!(metrics.total_cycles(), 3);
        assert_eq!(metrics.min(), Some(Duration::from_micros(500)));
        assert_eq!(metrics.max(), Some(Duration::from_micros(600)));
        assert_eq!(metrics.mean(), Some(Duration::from_micros(550)));
    }

    #[test]
    fn test_overruns_counted_against_period() {
        let mut metrics = CycleMetrics::new(16, Duration::from_millis(1));
        metrics.record(Duration::from_micros(900), None);
        metrics.record(Duration::from_micros(1500), None);
        assert_eq!(metrics.overrun_count(), 1);
    }

    #[test]
    fn test_interval_jitter() {
        let mut metrics = CycleMetrics::new(16, Duration::from_millis(10));
        metrics.record(Duration::from_micros(10), None);
        metrics.record(Duration::from_micros(10), Some(Duration::from_micros(9_900)));
        metrics.record(Duration::from_micros(10), Some(Duration::from_micros(10_200)));

        let snap = metrics.snapshot();
        assert_eq!(snap.interval_min_ns, Some(9_900_000));
        assert_eq!(snap.jitter_ns(), Some(300_000));
    }

    #[test]
    fn test_empty_metrics() {
        let metrics = CycleMetrics::new(0, Duration::from_millis(1));
        assert!(metrics.min().is_none());
        assert!(metrics.interval_range().is_none());
        assert!(metrics.percentile(50.0).is_none());
        assert_eq!(metrics.snapshot().jitter_ns(), None);
    }

    #[test]
    fn test_percentile_over_ring() {
        let mut metrics = CycleMetrics::new(100, Duration::from_millis(1));
        for i in 1..=100 {
            metrics.record(Duration::from_micros(i), None);
        }
        let p50 = metrics.percentile(50.0).unwrap();
        assert!(p50.as_micros() >= 49 && p50.as_micros() <= 51);
        assert!(metrics.percentile(101.0).is_none());
        assert!(metrics.percentile(f64::NAN).is_none());
    }
}

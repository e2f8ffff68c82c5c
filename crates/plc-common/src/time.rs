//! Time base shared between the scheduler and the control program.
//!
//! [`Timestamp`] is a wall-clock sample split into seconds and nanoseconds,
//! [`TickPeriod`] is the configured cycle period, and [`CurrentTimeCell`] is the
//! cross-thread cell the scheduler writes once per cycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

const NANOS_PER_SEC: i128 = 1_000_000_000;
const NANOS_PER_MILLI: u64 = 1_000_000;

/// Wall-clock timestamp with nanosecond resolution.
///
/// Always normalized: `nanoseconds < 1_000_000_000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp {
    /// Whole seconds since the Unix epoch.
    pub seconds: i64,
    /// Sub-second part in nanoseconds.
    pub nanoseconds: u32,
}

impl Timestamp {
    /// The Unix epoch.
    pub const EPOCH: Timestamp = Timestamp {
        seconds: 0,
        nanoseconds: 0,
    };

    /// Build a timestamp, carrying excess nanoseconds into seconds.
    #[must_use]
    pub fn new(seconds: i64, nanoseconds: u32) -> Self {
        Self::from_nanos(i128::from(seconds) * NANOS_PER_SEC + i128::from(nanoseconds))
    }

    /// Build a timestamp from total nanoseconds since the epoch.
    #[must_use]
    pub fn from_nanos(total: i128) -> Self {
        let seconds = total.div_euclid(NANOS_PER_SEC);
        let nanoseconds = total.rem_euclid(NANOS_PER_SEC);
        Self {
            seconds: i64::try_from(seconds).unwrap_or(if seconds < 0 { i64::MIN } else { i64::MAX }),
            // rem_euclid keeps this in [0, 1e9)
            nanoseconds: nanoseconds as u32,
        }
    }

    /// Total nanoseconds since the epoch.
    #[must_use]
    pub fn as_nanos(&self) -> i128 {
        i128::from(self.seconds) * NANOS_PER_SEC + i128::from(self.nanoseconds)
    }

    /// Time elapsed from `earlier` to `self`, or zero if `earlier` is later.
    #[must_use]
    pub fn saturating_duration_since(&self, earlier: Timestamp) -> Duration {
        let diff = self.as_nanos() - earlier.as_nanos();
        if diff <= 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(u64::try_from(diff).unwrap_or(u64::MAX))
        }
    }

    /// Next whole multiple of `period` strictly after `self`.
    ///
    /// Used for phase-aligned first deadlines.
    #[must_use]
    pub fn align_up(&self, period: TickPeriod) -> Timestamp {
        let p = i128::from(period.as_nanos());
        let now = self.as_nanos();
        Self::from_nanos((now.div_euclid(p) + 1) * p)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp::from_nanos(self.as_nanos() + rhs.as_nanos() as i128)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}s", self.seconds, self.nanoseconds)
    }
}

/// Cycle period, configured in whole milliseconds and held in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TickPeriod {
    nanos: u64,
}

impl TickPeriod {
    /// Period from milliseconds; zero is raised to the one millisecond minimum.
    #[must_use]
    pub fn from_millis(millis: u64) -> Self {
        Self {
            nanos: millis.max(1).saturating_mul(NANOS_PER_MILLI),
        }
    }

    /// Period from a configured duration, truncated to whole milliseconds.
    #[must_use]
    pub fn from_duration(duration: Duration) -> Self {
        Self::from_millis(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    /// Period in nanoseconds.
    #[must_use]
    pub fn as_nanos(&self) -> u64 {
        self.nanos
    }

    /// Period in whole milliseconds.
    #[must_use]
    pub fn as_millis(&self) -> u64 {
        self.nanos / NANOS_PER_MILLI
    }

    /// Period as a [`Duration`].
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        Duration::from_nanos(self.nanos)
    }
}

impl fmt::Display for TickPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.as_millis())
    }
}

/// Shared current-time cell.
///
/// Written once per cycle by the scheduler thread before the control program
/// runs; read by the program and by debug consumers. A single atomic word keeps
/// reads tear-free.
#[derive(Debug, Default)]
pub struct CurrentTimeCell {
    nanos: AtomicI64,
}

impl CurrentTimeCell {
    /// Create a cell holding the epoch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new sample.
    pub fn store(&self, now: Timestamp) {
        let nanos = i64::try_from(now.as_nanos()).unwrap_or(i64::MAX);
        self.nanos.store(nanos, Ordering::Release);
    }

    /// Read the last published sample.
    #[must_use]
    pub fn load(&self) -> Timestamp {
        Timestamp::from_nanos(i128::from(self.nanos.load(Ordering::Acquire)))
    }
}

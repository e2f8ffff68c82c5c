//! Wall-clock time source sampled once per cycle.

use plc_common::error::{PlcError, PlcResult};
use plc_common::time::Timestamp;

/// Source of the current wall-clock time.
///
/// Implementations must resolve at least one millisecond. A failed read is
/// fatal for the scheduler loop.
pub trait TimeSource: Send + Sync {
    /// Sample the current time.
    fn now(&self) -> PlcResult<Timestamp>;
}

/// `CLOCK_REALTIME` reader.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a system clock.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
impl TimeSource for SystemClock {
    fn now(&self) -> PlcResult<Timestamp> {
        use nix::time::{clock_gettime, ClockId};

        let ts = clock_gettime(ClockId::CLOCK_REALTIME)
            .map_err(|e| PlcError::ClockRead(format!("clock_gettime(CLOCK_REALTIME): {e}")))?;

        #[allow(clippy::useless_conversion)]
        let seconds = i64::from(ts.tv_sec());
        let nanoseconds = u32::try_from(ts.tv_nsec())
            .map_err(|_| PlcError::ClockRead(format!("tv_nsec out of range: {}", ts.tv_nsec())))?;
        Ok(Timestamp::new(seconds, nanoseconds))
    }
}

#[cfg(not(unix))]
impl TimeSource for SystemClock {
    fn now(&self) -> PlcResult<Timestamp> {
        use std::time::{SystemTime, UNIX_EPOCH};

        let since = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| PlcError::ClockRead(format!("system time before epoch: {e}")))?;
        Ok(Timestamp::new(
            i64::try_from(since.as_secs()).unwrap_or(i64::MAX),
            since.subsec_nanos(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock::new();
        let a = clock.now().unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let b = clock.now().unwrap();

        assert!(b > a);
        assert!(b.saturating_duration_since(a) >= Duration::from_millis(1));
        // Somewhere after 2020
        assert!(a.seconds > 1_577_836_800);
    }
}

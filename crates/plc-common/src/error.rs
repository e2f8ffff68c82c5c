use thiserror::Error;

/// PLC error types covering lifecycle misuse, timer and clock failures, and
/// control program faults.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlcError {
    /// Configuration or validation error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The control program initializer rejected the start request.
    #[error("program init failed: {0}")]
    InitFailed(String),

    /// Generic runtime fault (poisoned lock, program cycle error).
    #[error("runtime fault: {0}")]
    Fault(String),

    /// The cycle timer could not be armed.
    #[error("timer arm failed: {0}")]
    TimerArm(String),

    /// Waiting on the cycle timer failed for a reason other than shutdown.
    #[error("timer wait failed: {0}")]
    TimerWait(String),

    /// The cycle timer was canceled (expected during stop).
    #[error("timer canceled")]
    TimerCanceled,

    /// The wall clock could not be read.
    #[error("clock read failed: {0}")]
    ClockRead(String),

    /// The debug gate was closed while a consumer waited on it.
    #[error("debug gate closed")]
    DebugGateClosed,

    /// `start` was called on a controller that is already running.
    #[error("controller already running")]
    AlreadyRunning,

    /// `stop` was called on a controller that is not running.
    #[error("controller not running (state {state})")]
    NotRunning {
        /// Lifecycle state at the time of the call.
        state: String,
    },

    /// The scheduler thread could not be created.
    #[error("failed to spawn scheduler thread: {0}")]
    ThreadSpawn(String),

    /// The scheduler thread panicked before it could be joined cleanly.
    #[error("scheduler thread panicked: {0}")]
    ThreadPanicked(String),

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl PlcError {
    /// Whether this error is the expected result of a shutdown rather than a failure.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::TimerCanceled | Self::DebugGateClosed)
    }
}

/// Convenience type alias for PLC operations.
pub type PlcResult<T> = Result<T, PlcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_classification() {
        assert!(PlcError::TimerCanceled.is_shutdown());
        assert!(PlcError::DebugGateClosed.is_shutdown());
        assert!(!PlcError::TimerWait("EINTR".into()).is_shutdown());
        assert!(!PlcError::ClockRead("EINVAL".into()).is_shutdown());
    }

    #[test]
    fn test_display() {
        let err = PlcError::NotRunning {
            state: "IDLE".into(),
        };
        assert_eq!(err.to_string(), "controller not running (state IDLE)");
    }
}

//! Lifecycle and scheduler state machines.
//!
//! Controller lifecycle:
//! IDLE → RUNNING → STOPPING → STOPPED → RUNNING → ...
//!
//! Scheduler loop phases:
//! IDLE → ARMED → EXECUTING → ARMED → ... → STOPPED

use crate::error::{PlcError, PlcResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Never started.
    #[default]
    Idle,
    /// Scheduler thread spawned and cycling.
    Running,
    /// Stop requested; joining the scheduler thread.
    Stopping,
    /// Scheduler thread joined, resources released, program finalized.
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Running => write!(f, "RUNNING"),
            Self::Stopping => write!(f, "STOPPING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl LifecycleState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: LifecycleState) -> bool {
        use LifecycleState::{Idle, Running, Stopped, Stopping};

        matches!(
            (self, target),
            (Idle, Running) | (Running, Stopping) | (Stopping, Stopped)
                // Restart after a completed stop
                | (Stopped, Running)
        )
    }

    /// Whether a scheduler thread (and its timer) exists in this state.
    #[must_use]
    pub fn has_thread(&self) -> bool {
        matches!(self, Self::Running | Self::Stopping)
    }
}

/// Lifecycle state guarded by [`LifecycleState::can_transition_to`].
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    current: LifecycleState,
}

impl StateMachine {
    /// Create a new state machine starting in IDLE.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.current
    }

    /// Attempt a state transition.
    pub fn transition(&mut self, target: LifecycleState) -> PlcResult<()> {
        if self.current.can_transition_to(target) {
            self.current = target;
            Ok(())
        } else {
            Err(PlcError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }
}

/// Phase of the cyclic scheduler loop, observable from other threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum SchedulerPhase {
    /// Before the first arm.
    #[default]
    Idle = 0,
    /// Timer scheduled; thread blocked in wait.
    Armed = 1,
    /// Wake received; running one control cycle.
    Executing = 2,
    /// Loop exited.
    Stopped = 3,
}

impl SchedulerPhase {
    /// Decode from the atomic representation; unknown values read as `Stopped`.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Armed,
            2 => Self::Executing,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for SchedulerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Armed => write!(f, "ARMED"),
            Self::Executing => write!(f, "EXECUTING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

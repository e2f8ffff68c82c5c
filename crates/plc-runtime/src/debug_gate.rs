//! Exclusive gate between the cycle thread and a debug consumer.
//!
//! The gate is a binary lock that is not tied to the acquiring thread: the
//! consumer acquires it before reading the process image, and the producer
//! releases it once a fresh snapshot is published, which hands the next read
//! to the waiting consumer.
//!
//! ```text
//! consumer: acquire ──(read)── acquire ······blocked······ ──(read)──
//! producer:            cycle ── publish ── release ─┘
//! ```
//!
//! Releasing a gate nobody holds is a no-op, so the producer can release
//! after every cycle whether or not a consumer is attached. Closing the gate
//! at stop wakes every waiter with [`PlcError::DebugGateClosed`].

use plc_common::error::{PlcError, PlcResult};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct GateState {
    held: bool,
    closed: bool,
}

/// Binary lock guarding the published process image.
#[derive(Debug, Default)]
pub struct DebugGate {
    state: Mutex<GateState>,
    released: Condvar,
}

impl DebugGate {
    /// Create an unowned gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> PlcResult<MutexGuard<'_, GateState>> {
        self.state
            .lock()
            .map_err(|_| PlcError::Fault("debug gate poisoned".into()))
    }

    /// Block until the gate is free, then take it.
    pub fn acquire(&self) -> PlcResult<()> {
        let guard = self.lock()?;
        let mut state = self
            .released
            .wait_while(guard, |s| s.held && !s.closed)
            .map_err(|_| PlcError::Fault("debug gate poisoned".into()))?;

        if state.closed {
            return Err(PlcError::DebugGateClosed);
        }
        state.held = true;
        Ok(())
    }

    /// Take the gate if it is free, without blocking.
    pub fn try_acquire(&self) -> PlcResult<bool> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(PlcError::DebugGateClosed);
        }
        if state.held {
            return Ok(false);
        }
        state.held = true;
        Ok(true)
    }

    /// Like [`acquire`](Self::acquire), giving up after `timeout`.
    ///
    /// Returns `Ok(false)` on timeout. A timeout past the end of the clock
    /// waits without a deadline.
    pub fn acquire_timeout(&self, timeout: Duration) -> PlcResult<bool> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.acquire().map(|()| true);
        };
        let mut state = self.lock()?;

        loop {
            if state.closed {
                return Err(PlcError::DebugGateClosed);
            }
            if !state.held {
                state.held = true;
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            state = self
                .released
                .wait_timeout(state, deadline - now)
                .map_err(|_| PlcError::Fault("debug gate poisoned".into()))?
                .0;
        }
    }

    /// Give the gate up, waking one waiter.
    ///
    /// Returns `false` if the gate was not held.
    pub fn release(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.held {
            return false;
        }
        state.held = false;
        self.released.notify_one();
        true
    }

    /// Close the gate for good; current and future acquires fail.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        state.held = false;
        self.released.notify_all();
    }

    /// Whether someone currently holds the gate.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).held
    }

    /// Whether the gate has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).closed
    }
}

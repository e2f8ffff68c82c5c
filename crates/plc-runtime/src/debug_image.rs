//! Process-image snapshots handed from the cycle thread to a debug consumer.

use crate::debug_gate::DebugGate;
use plc_common::error::PlcResult;
use plc_common::time::Timestamp;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::trace;

/// One published copy of the process image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugSnapshot {
    /// Index of the cycle that produced the image.
    pub tick: u64,
    /// Current time sampled for that cycle.
    pub time: Timestamp,
    /// Marshalled image, opaque to the runtime.
    pub data: Vec<u8>,
}

/// Latest snapshot plus the gate that sequences producer and consumer.
#[derive(Debug, Default)]
pub struct DebugImage {
    gate: DebugGate,
    latest: Mutex<Option<DebugSnapshot>>,
    suspended: AtomicBool,
    published: AtomicU64,
}

impl DebugImage {
    /// Create an empty image with an unowned gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The gate guarding this image.
    #[must_use]
    pub fn gate(&self) -> &DebugGate {
        &self.gate
    }

    /// Producer side: store `snapshot` and release the gate.
    ///
    /// Never blocks beyond the copy. Returns `false` when publishing is suspended.
    pub fn publish(&self, snapshot: DebugSnapshot) -> bool {
        if self.suspended.load(Ordering::Acquire) {
            return false;
        }

        let tick = snapshot.tick;
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
        self.published.fetch_add(1, Ordering::Relaxed);
        self.gate.release();
        trace!(tick, "Debug snapshot published");
        true
    }

    /// Consumer side: wait for the next published snapshot.
    ///
    /// The first call returns right away with whatever was published so far.
    /// Fails with `PlcError::DebugGateClosed` once the controller has stopped.
    pub fn wait_debug_data(&self) -> PlcResult<Option<DebugSnapshot>> {
        self.gate.acquire()?;
        Ok(self.latest())
    }

    /// Latest snapshot without touching the gate.
    #[must_use]
    pub fn latest(&self) -> Option<DebugSnapshot> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pause publishing.
    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::Release);
    }

    /// Resume publishing.
    pub fn resume(&self) {
        self.suspended.store(false, Ordering::Release);
    }

    /// Whether publishing is paused.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    /// Number of snapshots published so far.
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Close the gate, failing current and future waits.
    pub fn close(&self) {
        self.gate.close();
    }

    /// Whether the image has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.gate.is_closed()
    }
}

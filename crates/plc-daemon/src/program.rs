//! Built-in demo control program.
//!
//! Toggles a virtual output every `toggle_ticks` cycles and counts rising
//! edges. The process image is published to debug consumers as JSON.

use plc_common::error::{PlcError, PlcResult};
use plc_common::time::Timestamp;
use plc_runtime::program::{ControlProgram, CycleContext};
use serde::Serialize;
use tracing::{debug, info};

/// Process image of the blink program.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct BlinkImage {
    /// Index of the last executed cycle.
    pub tick: u64,
    /// Current output level.
    pub output: bool,
    /// Rising edges since `init`.
    pub rising_edges: u64,
    /// Time sampled for the last cycle.
    pub last_time: Option<Timestamp>,
}

/// Square-wave generator.
#[derive(Debug)]
pub struct BlinkProgram {
    toggle_ticks: u64,
    image: BlinkImage,
    initialized: bool,
}

impl Default for BlinkProgram {
    fn default() -> Self {
        Self {
            toggle_ticks: 50,
            image: BlinkImage::default(),
            initialized: false,
        }
    }
}

impl BlinkProgram {
    /// Current process image.
    #[must_use]
    pub fn image(&self) -> &BlinkImage {
        &self.image
    }
}

impl ControlProgram for BlinkProgram {
    /// Accepts one optional argument: cycles between output toggles.
    fn init(&mut self, args: &[String]) -> PlcResult<()> {
        if let Some(arg) = args.first() {
            self.toggle_ticks = match arg.parse::<u64>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(PlcError::InitFailed(format!(
                        "toggle interval must be a positive integer, got {arg:?}"
                    )))
                }
            };
        }
        self.image = BlinkImage::default();
        self.initialized = true;
        info!(toggle_ticks = self.toggle_ticks, "Blink program initialized");
        Ok(())
    }

    fn run_cycle(&mut self, ctx: &CycleContext) -> PlcResult<()> {
        if !self.initialized {
            return Err(PlcError::Fault("cycle before init".into()));
        }

        self.image.tick = ctx.tick;
        self.image.last_time = Some(ctx.now);
        if ctx.tick % self.toggle_ticks == 0 {
            self.image.output = !self.image.output;
            if self.image.output {
                self.image.rising_edges += 1;
            }
        }
        Ok(())
    }

    fn cleanup(&mut self) {
        debug!(edges = self.image.rising_edges, "Blink program cleaned up");
        self.initialized = false;
    }

    fn debug_image(&self) -> Option<Vec<u8>> {
        serde_json::to_vec(&self.image).ok()
    }
}

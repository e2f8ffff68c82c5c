#![doc = "Cyclic execution core: periodic scheduler, lifecycle controller and debug hand-off."]

pub mod atomic;
pub mod clock;
pub mod debug_gate;
pub mod debug_image;
pub mod lifecycle;
pub mod platform;
pub mod program;
pub mod realtime;
pub mod scheduler;
pub mod simulated;
pub mod timer;

pub use atomic::*;
pub use clock::*;
pub use debug_gate::*;
pub use debug_image::*;
pub use lifecycle::*;
pub use platform::*;
pub use program::*;
pub use realtime::*;
pub use scheduler::*;
pub use timer::*;

//! Acceptance tests against the real clock and timer.
//!
//! Timing assertions use wide tolerances so they hold on loaded CI hosts;
//! the soak test is ignored by default and run explicitly.

mod common;
mod jitter_test;
mod shutdown_test;
mod soak_test;

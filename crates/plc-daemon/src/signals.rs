//! Shutdown triggers for the daemon.
//!
//! The control loop runs on its own OS thread; the main thread only waits
//! here for a reason to stop: SIGINT, SIGTERM, the `--run-for` deadline,
//! or a condition reported by the poll callback (cycle limit, loop exit).

use std::fmt;
use std::future::pending;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Why the daemon is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT (Ctrl+C).
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// The `--run-for` duration elapsed.
    Timeout,
    /// The `--max-cycles` limit was reached.
    CycleLimit,
    /// The scheduler thread returned on its own.
    LoopExited,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupt => write!(f, "SIGINT"),
            ShutdownReason::Terminate => write!(f, "SIGTERM"),
            ShutdownReason::Timeout => write!(f, "run duration elapsed"),
            ShutdownReason::CycleLimit => write!(f, "cycle limit reached"),
            ShutdownReason::LoopExited => write!(f, "scheduler loop exited"),
        }
    }
}

/// How often the poll callback runs.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[cfg(unix)]
async fn terminate() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn terminate() -> std::io::Result<()> {
    pending::<()>().await;
    Ok(())
}

/// Block the calling thread until a shutdown trigger fires.
///
/// `poll` runs every [`POLL_INTERVAL`]; returning `Some` ends the wait with
/// that reason.
pub fn wait_for_shutdown<F>(run_for: Option<Duration>, mut poll: F) -> std::io::Result<ShutdownReason>
where
    F: FnMut() -> Option<ShutdownReason>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let deadline = async {
            match run_for {
                Some(limit) => tokio::time::sleep(limit).await,
                None => pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let sigterm = terminate();
        tokio::pin!(sigterm);

        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(?run_for, "Waiting for shutdown trigger");

        let reason = loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result?;
                    break ShutdownReason::Interrupt;
                }
                result = &mut sigterm => {
                    result?;
                    break ShutdownReason::Terminate;
                }
                () = &mut deadline => break ShutdownReason::Timeout,
                _ = ticker.tick() => {
                    if let Some(reason) = poll() {
                        break reason;
                    }
                }
            }
        };

        info!(%reason, "Shutdown requested");
        Ok(reason)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_run_for_elapses() {
        let start = Instant::now();
        let reason = wait_for_shutdown(Some(Duration::from_millis(120)), || None).unwrap();
        assert_eq!(reason, ShutdownReason::Timeout);
        assert!(start.elapsed() >= Duration::from_millis(120));
    }

    #[test]
    fn test_poll_reason_wins() {
        let mut polls = 0;
        let reason = wait_for_shutdown(None, || {
            polls += 1;
            (polls == 3).then_some(ShutdownReason::CycleLimit)
        })
        .unwrap();
        assert_eq!(reason, ShutdownReason::CycleLimit);
        assert_eq!(polls, 3);
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(ShutdownReason::Terminate.to_string(), "SIGTERM");
        assert_eq!(ShutdownReason::LoopExited.to_string(), "scheduler loop exited");
    }
}

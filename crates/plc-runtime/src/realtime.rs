//! Optional real-time setup for the scheduler thread.
//!
//! Called on the scheduler thread itself before the first arm, so the
//! policy, priority and affinity apply to that thread only. Missing
//! privileges (`EPERM`) are not fatal: the loop still runs, just without
//! real-time guarantees.

use plc_common::config::{CpuAffinity, RealtimeConfig, SchedPolicy};
use plc_common::error::{PlcError, PlcResult};
use tracing::{debug, info, warn};

/// What [`init_realtime`] actually managed to apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealtimeStatus {
    /// Memory pages locked with `mlockall`.
    pub memory_locked: bool,
    /// Policy applied to the calling thread.
    pub policy: Option<SchedPolicy>,
    /// Priority applied to the calling thread.
    pub priority: Option<u8>,
    /// CPUs the calling thread is pinned to.
    pub cpu_affinity: Option<Vec<usize>>,
}

/// Apply `config` to the calling thread.
///
/// # Errors
///
/// Fails on errors other than missing privileges, such as an invalid CPU index.
pub fn init_realtime(config: &RealtimeConfig) -> PlcResult<RealtimeStatus> {
    if !config.enabled {
        debug!("Real-time setup disabled");
        return Ok(RealtimeStatus::default());
    }

    let memory_locked = if config.lock_memory { lock_memory()? } else { false };
    let (policy, priority) = set_thread_policy(config.policy, config.priority)?;
    let cpu_affinity = set_thread_affinity(&config.cpu_affinity)?;

    let status = RealtimeStatus {
        memory_locked,
        policy,
        priority,
        cpu_affinity,
    };
    info!(?status, "Real-time setup applied");
    Ok(status)
}

#[cfg(target_os = "linux")]
fn lock_memory() -> PlcResult<bool> {
    use nix::errno::Errno;
    use nix::sys::mman::{mlockall, MlockAllFlags};

    match mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE) {
        Ok(()) => Ok(true),
        Err(Errno::EPERM | Errno::ENOMEM) => {
            warn!("mlockall not permitted, page faults may add jitter");
            Ok(false)
        }
        Err(e) => Err(PlcError::Config(format!("mlockall failed: {e}"))),
    }
}

#[cfg(not(target_os = "linux"))]
fn lock_memory() -> PlcResult<bool> {
    warn!("Memory locking not available on this platform");
    Ok(false)
}

#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn set_thread_policy(policy: SchedPolicy, priority: u8) -> PlcResult<(Option<SchedPolicy>, Option<u8>)> {
    let native = match policy {
        SchedPolicy::Fifo => libc::SCHED_FIFO,
        SchedPolicy::Rr => libc::SCHED_RR,
        SchedPolicy::Other => return Ok((Some(SchedPolicy::Other), None)),
    };

    let priority = priority.clamp(1, 99);
    let param = libc::sched_param {
        sched_priority: i32::from(priority),
    };

    // SAFETY: pthread_self() is always a valid handle for the calling thread,
    // and `param` outlives the call.
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), native, &param) };
    match rc {
        0 => Ok((Some(policy), Some(priority))),
        libc::EPERM => {
            warn!(?policy, priority, "Real-time policy not permitted, keeping default scheduling");
            Ok((None, None))
        }
        errno => Err(PlcError::Config(format!(
            "pthread_setschedparam failed: {}",
            std::io::Error::from_raw_os_error(errno)
        ))),
    }
}

#[cfg(not(target_os = "linux"))]
fn set_thread_policy(policy: SchedPolicy, priority: u8) -> PlcResult<(Option<SchedPolicy>, Option<u8>)> {
    warn!(?policy, priority, "Real-time policy not available on this platform");
    Ok((None, None))
}

#[cfg(target_os = "linux")]
fn set_thread_affinity(affinity: &CpuAffinity) -> PlcResult<Option<Vec<usize>>> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let cpus = affinity.cpus();
    if cpus.is_empty() {
        return Ok(None);
    }

    let mut set = CpuSet::new();
    for &cpu in &cpus {
        set.set(cpu)
            .map_err(|e| PlcError::Config(format!("invalid CPU index {cpu}: {e}")))?;
    }

    // Pid 0 targets the calling thread.
    match sched_setaffinity(Pid::from_raw(0), &set) {
        Ok(()) => Ok(Some(cpus)),
        Err(nix::errno::Errno::EINVAL) => {
            warn!(?cpus, "CPU set names no online CPU, affinity unchanged");
            Ok(None)
        }
        Err(e) => Err(PlcError::Config(format!("sched_setaffinity failed: {e}"))),
    }
}

#[cfg(not(target_os = "linux"))]
fn set_thread_affinity(affinity: &CpuAffinity) -> PlcResult<Option<Vec<usize>>> {
    if !affinity.cpus().is_empty() {
        warn!("CPU affinity not available on this platform");
    }
    Ok(None)
}

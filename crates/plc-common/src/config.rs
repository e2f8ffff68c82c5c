//! Runtime configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file is a valid configuration.

use crate::time::TickPeriod;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Settings for one controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Nominal period between cycle starts. Truncated to whole milliseconds,
    /// minimum one millisecond.
    #[serde(with = "humantime_serde")]
    pub tick_period: Duration,

    /// How the next deadline is derived once a cycle returns.
    pub rearm: RearmPolicy,

    /// Align the first deadline to a whole multiple of the period on the wall clock.
    pub phase_align: bool,

    /// Consecutive timer wait failures tolerated before the loop gives up (0 = unlimited).
    /// Arm failures only skip the cycle.
    pub max_consecutive_timer_failures: u32,

    /// Name given to the scheduler thread.
    pub thread_name: String,

    /// Debug snapshot publishing.
    pub debug: DebugConfig,

    /// Real-time configuration for the scheduler thread.
    pub realtime: RealtimeConfig,

    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(10),
            rearm: RearmPolicy::default(),
            phase_align: false,
            max_consecutive_timer_failures: 100,
            thread_name: String::from("plc-cycle"),
            debug: DebugConfig::default(),
            realtime: RealtimeConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// The configured period converted to internal units.
    #[must_use]
    pub fn tick(&self) -> TickPeriod {
        let tick = TickPeriod::from_duration(self.tick_period);
        if tick.as_duration() != self.tick_period {
            warn!(
                configured = ?self.tick_period,
                effective_ms = tick.as_millis(),
                "Tick period rounded to whole milliseconds"
            );
        }
        tick
    }

    /// Read and parse a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] when the file is unreadable, [`ConfigError::Parse`]
    /// when its content is not a valid configuration.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parse TOML text. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] on malformed TOML or invalid values.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Serialize`] if a value cannot be represented.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Rule for computing the next deadline after a cycle returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RearmPolicy {
    /// Arm one period relative to the post-execution instant.
    #[default]
    FromCompletion,
    /// Arm `previous deadline + period`, clamped to now when already late.
    FixedRate,
}

/// Debug snapshot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Publish a process-image snapshot after every cycle.
    pub enabled: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Real-time settings applied to the scheduler thread before its first arm.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Apply any of the settings below.
    pub enabled: bool,

    /// Scheduling policy: "fifo", "rr" or "other".
    pub policy: SchedPolicy,

    /// Priority for "fifo" and "rr", clamped to 1-99.
    pub priority: u8,

    /// Cores to pin the thread to.
    pub cpu_affinity: CpuAffinity,

    /// Call `mlockall` so cycles never page-fault.
    pub lock_memory: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            policy: SchedPolicy::Fifo,
            priority: 80,
            cpu_affinity: CpuAffinity::None,
            lock_memory: false,
        }
    }
}

/// OS scheduling policy for the scheduler thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedPolicy {
    /// `SCHED_FIFO`.
    #[default]
    Fifo,
    /// `SCHED_RR`.
    Rr,
    /// `SCHED_OTHER`, i.e. no real-time policy.
    Other,
}

/// CPUs the scheduler thread is pinned to.
///
/// Written as an integer (`cpu_affinity = 2`), a list (`cpu_affinity = [2, 3]`)
/// or left out.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<CpuList>", into = "Option<CpuList>")]
pub enum CpuAffinity {
    /// Left to the OS.
    #[default]
    None,
    /// One core.
    Single(usize),
    /// Any of several cores.
    Set(Vec<usize>),
}

/// Wire form of [`CpuAffinity`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum CpuList {
    One(usize),
    Many(Vec<usize>),
}

impl From<Option<CpuList>> for CpuAffinity {
    fn from(list: Option<CpuList>) -> Self {
        match list {
            None => Self::None,
            Some(CpuList::One(cpu)) => Self::Single(cpu),
            Some(CpuList::Many(cpus)) => Self::Set(cpus),
        }
    }
}

impl From<CpuAffinity> for Option<CpuList> {
    fn from(affinity: CpuAffinity) -> Self {
        match affinity {
            CpuAffinity::None => None,
            CpuAffinity::Single(cpu) => Some(CpuList::One(cpu)),
            CpuAffinity::Set(cpus) => Some(CpuList::Many(cpus)),
        }
    }
}

impl CpuAffinity {
    /// CPUs named by this affinity, empty for `None`.
    #[must_use]
    pub fn cpus(&self) -> Vec<usize> {
        match self {
            Self::None => Vec::new(),
            Self::Single(cpu) => vec![*cpu],
            Self::Set(cpus) => cpus.clone(),
        }
    }
}

/// Cycle statistics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Execution-time samples kept for percentiles.
    pub histogram_size: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            histogram_size: 4096,
        }
    }
}

/// Failure to load or render a [`RuntimeConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// File that was requested.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The TOML was malformed or held an invalid value.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be rendered as TOML.
    #[error("cannot render configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// `Duration` as a humantime string such as `"10ms"`.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

//! Run configuration types

use std::time::Duration;

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

use crate::exit::OomPolicy;

/// Application name used to prefix worker names
pub const APP_NAME: &str = "stress-herd";

/// Default timeout per workload in sequential mode
pub const DEFAULT_SEQUENTIAL_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for a parallel run
pub const DEFAULT_PARALLEL_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24);

/// Scheduling policy applied to every worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedPolicy {
    /// SCHED_OTHER
    Other,
    /// SCHED_BATCH
    Batch,
    /// SCHED_IDLE
    Idle,
    /// SCHED_FIFO
    Fifo,
    /// SCHED_RR
    Rr,
}

impl SchedPolicy {
    /// Parse a policy name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "other" | "normal" => Some(Self::Other),
            "batch" => Some(Self::Batch),
            "idle" => Some(Self::Idle),
            "fifo" => Some(Self::Fifo),
            "rr" => Some(Self::Rr),
            _ => None,
        }
    }

    /// Real-time policies take a static priority
    pub fn is_realtime(self) -> bool {
        matches!(self, Self::Fifo | Self::Rr)
    }
}

/// I/O scheduling class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoClass {
    /// Real time
    Realtime,
    /// Best effort
    BestEffort,
    /// Idle
    Idle,
}

impl IoClass {
    /// Parse an I/O class name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "realtime" | "rt" => Some(Self::Realtime),
            "besteffort" | "be" => Some(Self::BestEffort),
            "idle" => Some(Self::Idle),
            _ => None,
        }
    }

    /// Kernel class number
    pub fn raw(self) -> i32 {
        match self {
            Self::Realtime => 1,
            Self::BestEffort => 2,
            Self::Idle => 3,
        }
    }
}

/// I/O priority request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoNice {
    /// Class
    pub class: IoClass,
    /// Level 0 (highest) to 7 (lowest)
    pub level: u8,
}

/// Supervisor and worker-environment configuration
///
/// Selection of *what* runs lives in [`crate::scheduler::ScheduleRequest`];
/// this type covers *how* it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Global wall-clock budget; `None` means use the mode default, zero means unbounded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    /// Terminate the whole run on the first failing worker
    pub abort: bool,

    /// Keep moving workers between CPUs while they run
    pub aggressive: bool,

    /// What to do with workers that look OOM-killed
    pub oom_policy: OomPolicy,

    /// Do not make workers preferred OOM-killer victims
    pub oom_avoid: bool,

    /// Scheduling policy for workers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sched: Option<SchedPolicy>,

    /// Static priority for real-time policies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sched_prio: Option<i32>,

    /// Nice value for workers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nice: Option<i32>,

    /// I/O priority for workers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ionice: Option<IoNice>,

    /// CPUs workers are restricted to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_affinity: Option<Vec<usize>>,

    /// Microseconds each worker sleeps per already-spawned sibling before starting
    pub backoff_us: u64,

    /// Spawn and reap workers without running any workload
    pub dry_run: bool,

    /// Signal used for coercive termination before escalating to SIGKILL
    pub kill_signal: i32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            abort: false,
            aggressive: false,
            oom_policy: OomPolicy::default(),
            oom_avoid: false,
            sched: None,
            sched_prio: None,
            nice: None,
            ionice: None,
            cpu_affinity: None,
            backoff_us: 0,
            dry_run: false,
            kill_signal: Signal::SIGALRM as i32,
        }
    }
}

impl RunConfig {
    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable `--abort`
    pub fn with_abort(mut self, abort: bool) -> Self {
        self.abort = abort;
        self
    }

    /// Enable aggressive CPU migration
    pub fn with_aggressive(mut self, aggressive: bool) -> Self {
        self.aggressive = aggressive;
        self
    }

    /// Set the OOM policy
    pub fn with_oom_policy(mut self, policy: OomPolicy) -> Self {
        self.oom_policy = policy;
        self
    }

    /// Enable dry-run
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// The configured termination signal
    pub fn kill_signal(&self) -> Signal {
        Signal::try_from(self.kill_signal).unwrap_or(Signal::SIGALRM)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(nice) = self.nice {
            if !(-20..=19).contains(&nice) {
                return Err(ConfigError::InvalidNice(nice));
            }
        }

        match (self.sched, self.sched_prio) {
            (Some(policy), Some(prio)) if policy.is_realtime() => {
                if !(1..=99).contains(&prio) {
                    return Err(ConfigError::InvalidPriority(format!(
                        "{prio} is outside 1..=99 for {policy:?}"
                    )));
                }
            }
            (Some(policy), Some(prio)) if prio != 0 => {
                return Err(ConfigError::InvalidPriority(format!(
                    "{policy:?} only accepts priority 0, got {prio}"
                )));
            }
            (None, Some(_)) => {
                return Err(ConfigError::InvalidPriority(
                    "a priority needs a scheduling policy".into(),
                ));
            }
            _ => {}
        }

        if let Some(ionice) = self.ionice {
            if ionice.level > 7 {
                return Err(ConfigError::InvalidIoNice(ionice.level));
            }
        }

        if let Some(cpus) = &self.cpu_affinity {
            if cpus.is_empty() {
                return Err(ConfigError::InvalidAffinity("empty CPU list".into()));
            }
            if let Some(cpu) = cpus.iter().find(|&&c| c >= libc::CPU_SETSIZE as usize) {
                return Err(ConfigError::InvalidAffinity(format!("CPU {cpu} out of range")));
            }
        }

        if Signal::try_from(self.kill_signal).is_err() {
            return Err(ConfigError::InvalidSignal(self.kill_signal));
        }

        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid nice value
    #[error("Invalid nice value: {0} (expected -20..=19)")]
    InvalidNice(i32),

    /// Invalid scheduler priority
    #[error("Invalid scheduler priority: {0}")]
    InvalidPriority(String),

    /// Invalid I/O priority level
    #[error("Invalid ionice level: {0} (expected 0..=7)")]
    InvalidIoNice(u8),

    /// Invalid CPU affinity
    #[error("Invalid CPU affinity: {0}")]
    InvalidAffinity(String),

    /// Invalid signal number
    #[error("Invalid signal number: {0}")]
    InvalidSignal(i32),

    /// Invalid time value
    #[error("Invalid time '{0}': expected N[s|m|h|d|w|y]")]
    InvalidTime(String),
}

/// Parse `N[s|m|h|d|w|y]` into a duration
pub fn parse_timeout(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let (digits, scale) = match s.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => {
            let scale = match c.to_ascii_lowercase() {
                's' => 1,
                'm' => 60,
                'h' => 3600,
                'd' => 24 * 3600,
                'w' => 7 * 24 * 3600,
                'y' => 31_556_926,
                _ => return Err(ConfigError::InvalidTime(s.to_string())),
            };
            (&s[..idx], scale)
        }
        _ => (s, 1),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| ConfigError::InvalidTime(s.to_string()))?;
    value
        .checked_mul(scale)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::InvalidTime(s.to_string()))
}

/// Parse a CPU list such as `0,2,4-7`
pub fn parse_cpu_list(s: &str) -> Result<Vec<usize>, ConfigError> {
    let invalid = || ConfigError::InvalidAffinity(s.to_string());
    let mut cpus = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: usize = lo.trim().parse().map_err(|_| invalid())?;
                let hi: usize = hi.trim().parse().map_err(|_| invalid())?;
                if lo > hi {
                    return Err(invalid());
                }
                cpus.extend(lo..=hi);
            }
            None => cpus.push(part.parse().map_err(|_| invalid())?),
        }
    }
    cpus.sort_unstable();
    cpus.dedup();
    if cpus.is_empty() {
        return Err(invalid());
    }
    Ok(cpus)
}

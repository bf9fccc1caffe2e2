//! Exit status taxonomy and classification of reaped workers
//!
//! A worker talks to the supervisor through exactly two channels: its ops
//! counter in the shared region and its exit status. This module turns the
//! latter into a [`Classification`] and folds classifications into a
//! [`RunOutcome`].

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use serde::{Deserialize, Serialize};

/// Process exit codes shared by workers and the supervisor itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum ExitStatus {
    /// Everything went fine
    Success = 0,
    /// Internal failure before or around the workload
    Failure = 1,
    /// The workload detected a failure
    NotSuccess = 2,
    /// Ran out of memory, file descriptors, disk, ...
    NoResource = 3,
    /// Feature not available on this system
    NotImplemented = 4,
    /// Terminated because a signal was caught
    Signaled = 5,
}

impl ExitStatus {
    /// Numeric exit code
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map a raw exit code back onto the taxonomy
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::Failure),
            2 => Some(Self::NotSuccess),
            3 => Some(Self::NoResource),
            4 => Some(Self::NotImplemented),
            5 => Some(Self::Signaled),
            _ => None,
        }
    }

    /// Does a worker exiting with this status count as a failed run?
    pub fn is_failure(self) -> bool {
        !matches!(self, Self::Success | Self::NotImplemented)
    }

    /// Human readable description used in diagnostics
    pub fn description(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "stress-herd core failure",
            Self::NotSuccess => "stressor failed",
            Self::NoResource => "no resource(s)",
            Self::NotImplemented => "not implemented",
            Self::Signaled => "killed by signal",
        }
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// What happened to one reaped worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Clean exit
    Success,
    /// Internal failure, or an exit code outside the taxonomy
    CoreFailure {
        /// Raw exit code
        code: i32,
    },
    /// The workload reported a correctness or operational failure
    WorkloadFailure,
    /// The workload could not obtain resources
    ResourceExhausted,
    /// The workload is not available here; never a failure
    NotImplemented,
    /// Terminated by a signal, or exited after catching one
    Signaled {
        /// The terminating signal, if the kernel reported one
        signal: Option<Signal>,
        /// SIGKILL without a request from us is what the OOM killer looks like
        oom_suspect: bool,
    },
}

/// How out-of-memory kills are handled during reaping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OomPolicy {
    /// Respawn the instance in the same slot
    #[default]
    Restart,
    /// Count the kill as a failure
    Fatal,
}

impl Classification {
    /// Classify a wait status; `None` for non-terminal statuses
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(Self::from_exit_code(code)),
            WaitStatus::Signaled(_, signal, _) => Some(Self::Signaled {
                signal: Some(signal),
                oom_suspect: signal == Signal::SIGKILL,
            }),
            _ => None,
        }
    }

    /// Classify a plain exit code
    pub fn from_exit_code(code: i32) -> Self {
        match ExitStatus::from_code(code) {
            Some(ExitStatus::Success) => Self::Success,
            Some(ExitStatus::NotSuccess) => Self::WorkloadFailure,
            Some(ExitStatus::NoResource) => Self::ResourceExhausted,
            Some(ExitStatus::NotImplemented) => Self::NotImplemented,
            Some(ExitStatus::Signaled) => Self::Signaled {
                signal: None,
                oom_suspect: false,
            },
            Some(ExitStatus::Failure) | None => Self::CoreFailure { code },
        }
    }

    /// Should the slot be respawned instead of recorded?
    ///
    /// `stopping` is true once the run is shutting down; a SIGKILL that we
    /// may have sent ourselves is never mistaken for the OOM killer then.
    pub fn wants_restart(&self, policy: OomPolicy, stopping: bool) -> bool {
        matches!(
            self,
            Self::Signaled {
                oom_suspect: true,
                ..
            }
        ) && policy == OomPolicy::Restart
            && !stopping
    }

    /// Does this classification trigger `--abort`?
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Success | Self::NotImplemented)
    }

    /// The exit status this classification corresponds to
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            Self::Success => ExitStatus::Success,
            Self::CoreFailure { .. } => ExitStatus::Failure,
            Self::WorkloadFailure => ExitStatus::NotSuccess,
            Self::ResourceExhausted => ExitStatus::NoResource,
            Self::NotImplemented => ExitStatus::NotImplemented,
            Self::Signaled { .. } => ExitStatus::Signaled,
        }
    }
}

/// Run-wide success flags folded over every reaped worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// No correctness failure, core failure or signal death was seen
    pub overall_success: bool,
    /// No worker ran out of resources
    pub resource_success: bool,
}

impl Default for RunOutcome {
    fn default() -> Self {
        Self {
            overall_success: true,
            resource_success: true,
        }
    }
}

impl RunOutcome {
    /// Fold one classification into the outcome
    pub fn record(&mut self, class: &Classification) {
        match class {
            Classification::Success | Classification::NotImplemented => {}
            Classification::ResourceExhausted => self.resource_success = false,
            Classification::CoreFailure { .. }
            | Classification::WorkloadFailure
            | Classification::Signaled { .. } => self.overall_success = false,
        }
    }

    /// Final process exit status for the run
    pub fn exit_status(&self) -> ExitStatus {
        if !self.overall_success {
            ExitStatus::NotSuccess
        } else if !self.resource_success {
            ExitStatus::NoResource
        } else {
            ExitStatus::Success
        }
    }
}

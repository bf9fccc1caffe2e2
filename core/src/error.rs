//! Error types for stress-herd-core

use thiserror::Error;

use crate::config::ConfigError;

/// Core error type
///
/// Every variant here is a supervisor-level problem. Workload failures never
/// surface as a `StressError`; they are classified from the worker's exit
/// status instead (see [`crate::exit`]).
#[derive(Error, Debug)]
pub enum StressError {
    /// Invalid run configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Conflicting or incomplete selection options
    #[error("usage error: {0}")]
    Usage(String),

    /// A workload name that the catalog does not know
    #[error("unknown stressor: '{0}'")]
    UnknownStressor(String),

    /// A capability class name that does not exist
    #[error("unknown class: '{0}'")]
    UnknownClass(String),

    /// The shared statistics region could not be created
    #[error("shared memory error: {0}")]
    SharedMemory(String),

    /// Worker process creation failed
    #[error("spawn error: {0}")]
    Spawn(String),

    /// A signal handler could not be installed
    #[error("signal setup error: {0}")]
    Signal(String),

    /// System call failure
    #[error("system error: {0}")]
    Sys(#[from] nix::errno::Errno),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StressError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a missing-field error for builders
    pub fn missing_config(field: &str) -> Self {
        Self::Config(format!("missing required field: {field}"))
    }

    /// Create a usage error
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    /// Create a shared memory error
    pub fn shared_memory(msg: impl Into<String>) -> Self {
        Self::SharedMemory(msg.into())
    }

    /// Create a spawn error
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    /// Is this a user mistake rather than a system problem?
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::Usage(_) | Self::Config(_) | Self::UnknownStressor(_) | Self::UnknownClass(_)
        )
    }
}

impl From<ConfigError> for StressError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

/// Result type alias
pub type StressResult<T> = std::result::Result<T, StressError>;

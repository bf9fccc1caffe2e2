//! stress-herd-core: supervisor core for the stress-herd workload runner
//!
//! This crate holds everything between "which workloads did the user ask
//! for" and "what exit status does the run end with":
//!
//! - The workload catalog and the [`Stressor`] trait workloads implement
//! - Scheduling requests into a group table
//! - The shared statistics region workers report through
//! - Forking, reaping and stopping workers
//! - Exit classification and run metrics

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod exit;
pub mod group;
pub mod lifecycle;
pub mod metrics;
pub mod orchestrator;
pub mod scheduler;
pub mod shared;
pub mod system;
pub mod traits;
pub mod worker;

pub use catalog::{munge_name, parse_classes, Catalog};
pub use config::{ConfigError, IoClass, IoNice, RunConfig, SchedPolicy};
pub use error::{StressError, StressResult};
pub use exit::{Classification, ExitStatus, OomPolicy, RunOutcome};
pub use lifecycle::StopToken;
pub use group::{Group, GroupId, GroupTable};
pub use metrics::{RunReport, RunTimes, WorkloadMetrics};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use scheduler::{plan, RunMode, Schedule, ScheduleRequest, WorkloadRequest};
pub use shared::{SharedRegion, StatsRecord};
pub use system::{HostInfo, LoadAverage, ResourceSnapshot};
pub use traits::{StressClass, StressContext, Stressor};
pub use worker::{Worker, WorkerBuilder};

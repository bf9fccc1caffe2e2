//! Supervisor: spawn/reap loop for a whole run
//!
//! The Orchestrator drives the group table through one or more rounds:
//! - mapping the shared statistics region once all instance counts are final
//! - forking workers round-robin across groups until every target is met
//! - arming the global timeout and turning signals into stop broadcasts
//! - reaping workers in slot order and classifying their exits
//! - aggregating the region into a [`crate::metrics::RunReport`]
//!
//! Parallel runs use a single round over all groups. Sequential runs give
//! every group a round of its own.
//!
//! # Example
//!
//! ```ignore
//! use stress_herd_core::{scheduler, OrchestratorBuilder, RunConfig};
//!
//! let schedule = scheduler::plan(&request, &catalog, &mut rng)?;
//! let mut orchestrator = OrchestratorBuilder::new()
//!     .config(RunConfig::default())
//!     .schedule(schedule)
//!     .build()?;
//!
//! let report = orchestrator.run()?;
//! std::process::exit(report.exit_status().code());
//! ```

mod aggregator;
mod builder;
mod executor;
mod reaper;

pub use aggregator::aggregate_metrics;
pub use builder::OrchestratorBuilder;
pub use executor::Orchestrator;

#[cfg(test)]
mod tests;

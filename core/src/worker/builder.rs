//! Builder pattern for Worker construction

use std::sync::Arc;
use std::time::Duration;

use nix::unistd::Pid;

use crate::config::RunConfig;
use crate::error::{StressError, StressResult};
use crate::shared::StatsRecord;
use crate::traits::Stressor;

use super::executor::Worker;

/// Builder for creating Worker instances
///
/// # Example
/// ```ignore
/// let worker = WorkerBuilder::new(stressor)
///     .stats(region.record(0).unwrap())
///     .config(&config)
///     .instance(0, 2)
///     .max_ops(50)
///     .build()?;
/// ```
pub struct WorkerBuilder<'a> {
    stressor: Arc<dyn Stressor>,
    stats: Option<&'a StatsRecord>,
    config: Option<&'a RunConfig>,
    instance: Option<(u32, u32)>,
    max_ops: u64,
    pgrp: Option<Pid>,
    deadline: Option<f64>,
    backoff: Duration,
}

impl<'a> WorkerBuilder<'a> {
    /// Create a new builder for a worker running `stressor`
    pub fn new(stressor: Arc<dyn Stressor>) -> Self {
        Self {
            stressor,
            stats: None,
            config: None,
            instance: None,
            max_ops: 0,
            pgrp: None,
            deadline: None,
            backoff: Duration::ZERO,
        }
    }

    /// Set the stats record the worker writes to
    pub fn stats(mut self, stats: &'a StatsRecord) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Set the run configuration
    pub fn config(mut self, config: &'a RunConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the instance index and the group's instance count
    pub fn instance(mut self, instance: u32, num_instances: u32) -> Self {
        self.instance = Some((instance, num_instances));
        self
    }

    /// Set the ops budget (0 = unbounded)
    pub fn max_ops(mut self, max_ops: u64) -> Self {
        self.max_ops = max_ops;
        self
    }

    /// Set the process group to join (defaults to the caller's pid)
    pub fn pgrp(mut self, pgrp: Pid) -> Self {
        self.pgrp = Some(pgrp);
        self
    }

    /// Set the absolute deadline in epoch seconds
    pub fn deadline(mut self, deadline: Option<f64>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set the start-up backoff
    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Build the Worker
    ///
    /// # Errors
    /// Returns an error if any required field is missing or the instance
    /// index is out of range.
    pub fn build(self) -> StressResult<Worker<'a>> {
        let stats = self.stats.ok_or_else(|| StressError::missing_config("stats"))?;
        let config = self
            .config
            .ok_or_else(|| StressError::missing_config("config"))?;
        let (instance, num_instances) = self
            .instance
            .ok_or_else(|| StressError::missing_config("instance"))?;
        if instance >= num_instances {
            return Err(StressError::config(format!(
                "instance {instance} out of range for {num_instances} instances"
            )));
        }

        Ok(Worker {
            stressor: self.stressor,
            stats,
            config,
            instance,
            num_instances,
            max_ops: self.max_ops,
            pgrp: self.pgrp.unwrap_or_else(nix::unistd::getpid),
            deadline: self.deadline,
            backoff: self.backoff,
        })
    }
}

//! Builder pattern for Orchestrator construction

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::config::RunConfig;
use crate::error::{StressError, StressResult};
use crate::scheduler::{resolve_timeout, Schedule};

use super::executor::Orchestrator;

/// Builder for creating an Orchestrator with proper configuration
///
/// # Example
///
/// ```ignore
/// let schedule = scheduler::plan(&request, &catalog, &mut rng)?;
/// let mut orchestrator = OrchestratorBuilder::new()
///     .config(RunConfig::default().with_timeout(Duration::from_secs(10)))
///     .schedule(schedule)
///     .build()?;
///
/// let report = orchestrator.run()?;
/// ```
pub struct OrchestratorBuilder {
    config: RunConfig,
    schedule: Option<Schedule>,
    seed: Option<u64>,
}

impl OrchestratorBuilder {
    /// Create a new orchestrator builder with default configuration
    pub fn new() -> Self {
        Self {
            config: RunConfig::default(),
            schedule: None,
            seed: None,
        }
    }

    /// Set the full run configuration
    pub fn config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the planned groups
    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Seed the supervisor's random source (CPU picks in aggressive mode)
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Build the orchestrator
    ///
    /// # Errors
    ///
    /// Returns an error if no schedule was set, the schedule selects no
    /// workers, or configuration validation fails.
    pub fn build(self) -> StressResult<Orchestrator> {
        let schedule = self
            .schedule
            .ok_or_else(|| StressError::missing_config("schedule"))?;

        self.config.validate()?;

        if schedule.table.total_instances() == 0 {
            return Err(StressError::usage("no stress workers"));
        }

        let (timeout, _) = resolve_timeout(self.config.timeout, schedule.mode);
        let rng = match self.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };

        Ok(Orchestrator::new(self.config, schedule, timeout, rng))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

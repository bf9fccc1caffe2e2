//! Orchestrator execution logic: run rounds and the spawn loop

use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::unistd::{alarm, fork, getpgrp, setpgid, ForkResult, Pid};
use rand::rngs::SmallRng;

use crate::config::RunConfig;
use crate::error::{StressError, StressResult};
use crate::exit::RunOutcome;
use crate::group::{GroupId, GroupTable};
use crate::lifecycle::{self, KillEscalation, SupervisorState};
use crate::metrics::{RunReport, RunTimes};
use crate::scheduler::{RunMode, Schedule};
use crate::shared::SharedRegion;
use crate::system::{self, CpuTicks};
use crate::worker::WorkerBuilder;

use super::aggregator::aggregate_metrics;

/// Pause before retrying a fork that failed with EAGAIN
const FORK_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Whole seconds for `alarm(2)`, rounding up and never zero
pub(crate) fn alarm_secs(d: Duration) -> u32 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.clamp(1, u64::from(u32::MAX)) as u32
}

/// Supervisor for one run
///
/// Owns the group table for the whole run. Workers never see it; they only
/// get their own stats record.
pub struct Orchestrator {
    /// Run configuration
    pub(crate) config: RunConfig,

    /// Parallel or sequential
    pub(crate) mode: RunMode,

    /// Selected groups
    pub(crate) table: GroupTable,

    /// Timeout per round; zero means unbounded
    pub(crate) timeout: Duration,

    /// Process group the workers join
    pub(crate) pgrp: Pid,

    /// Folded worker outcomes
    pub(crate) outcome: RunOutcome,

    /// Signal picker for forced termination
    pub(crate) escalation: KillEscalation,

    /// Stop events already turned into a broadcast
    pub(crate) handled_events: u32,

    /// SIGCHLD deliveries already scanned for urgent exits
    pub(crate) handled_child_events: u32,

    /// Set once `abort` stopped the run
    pub(crate) aborted: bool,

    /// Workers spawned in the current round, for backoff
    pub(crate) spawned_in_round: u32,

    /// Workers started over the whole run, restarts included
    pub(crate) workers_started: u32,

    pub(crate) state: SupervisorState,

    pub(crate) rng: SmallRng,
}

impl Orchestrator {
    /// Create a new orchestrator
    ///
    /// Use `OrchestratorBuilder` for a more ergonomic construction.
    pub fn new(config: RunConfig, schedule: Schedule, timeout: Duration, rng: SmallRng) -> Self {
        let escalation = KillEscalation::new(config.kill_signal());
        Self {
            config,
            mode: schedule.mode,
            table: schedule.table,
            timeout,
            pgrp: getpgrp(),
            outcome: RunOutcome::default(),
            escalation,
            handled_events: 0,
            handled_child_events: 0,
            aborted: false,
            spawned_in_round: 0,
            workers_started: 0,
            state: SupervisorState::Running,
            rng,
        }
    }

    /// Get the run configuration
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Get the group table
    pub fn table(&self) -> &GroupTable {
        &self.table
    }

    /// Timeout per round (zero for unbounded)
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Outcome folded so far
    pub fn outcome(&self) -> RunOutcome {
        self.outcome
    }

    /// Current supervisor state
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Run every group to completion and return the report
    ///
    /// # Errors
    ///
    /// Fails before any worker exists if the signal handlers cannot be
    /// installed or the shared region cannot be mapped.
    pub fn run(&mut self) -> StressResult<RunReport> {
        lifecycle::reset();
        self.handled_child_events = 0;
        let _handlers = lifecycle::install_supervisor_handlers()?;

        let records = self.table.bind_stats();
        let region = SharedRegion::create(records)?;

        let summary = Schedule::summary_of(&self.table);
        tracing::info!(
            mode = ?self.mode,
            workers = records,
            timeout_secs = self.timeout.as_secs(),
            "dispatching hogs: {}",
            summary
        );

        let ticks_before = CpuTicks::current();
        let start = Instant::now();

        match self.mode {
            RunMode::Parallel => {
                let ids = self.table.active_ids();
                self.run_round(&ids, &region);
            }
            RunMode::Sequential => {
                for id in self.table.active_ids() {
                    if self.aborted || !lifecycle::begin_round() {
                        break;
                    }
                    self.run_round(&[id], &region);
                }
            }
        }
        alarm::cancel();
        self.state = SupervisorState::Done;

        let duration = start.elapsed().as_secs_f64();
        let tps = system::ticks_per_second();
        let metrics = aggregate_metrics(&self.table, &region, tps);
        let times = RunTimes::compute(
            duration,
            system::cpus_configured(),
            ticks_before,
            CpuTicks::current(),
            tps,
            system::load_average(),
        );

        let interrupted_by = lifecycle::caught_signal().map(|s| s.as_str().to_string());
        if let Some(signal) = &interrupted_by {
            tracing::info!(signal = %signal, "Run interrupted");
        }

        let report = RunReport {
            mode: self.mode,
            timeout_secs: self.timeout.as_secs(),
            outcome: self.outcome,
            metrics,
            times,
            interrupted_by,
            aborted: self.aborted,
            workers_started: self.workers_started,
        };

        tracing::info!(
            duration_secs = duration,
            exit_status = report.exit_status().code(),
            "{} run completed in {:.2}s",
            if self.outcome.overall_success {
                "successful"
            } else {
                "unsuccessful"
            },
            duration
        );

        region.destroy();
        Ok(report)
    }

    /// Spawn and reap one set of groups under one timeout
    pub(crate) fn run_round(&mut self, ids: &[GroupId], region: &SharedRegion) {
        self.state = SupervisorState::Running;
        self.escalation = KillEscalation::new(self.config.kill_signal());
        self.handled_events = lifecycle::stop_events();
        self.spawned_in_round = 0;

        let bounded = !self.timeout.is_zero();
        let deadline = bounded.then(|| Instant::now() + self.timeout);
        let epoch_deadline = bounded.then(|| system::now() + self.timeout.as_secs_f64());
        if bounded {
            alarm::set(alarm_secs(self.timeout));
        }

        tracing::debug!(groups = ids.len(), "Starting stressors");
        self.spawn_all(ids, region, deadline, epoch_deadline);
        tracing::debug!(spawned = self.spawned_in_round, "Stressors spawned");

        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                lifecycle::request_stop();
            } else {
                alarm::set(alarm_secs(remaining));
            }
        }

        if !lifecycle::keep_running() {
            tracing::debug!("Stop requested during start-up, cleaning up");
            self.stop_workers(ids);
        }

        if self.config.aggressive {
            self.aggressive_loop(ids, region, epoch_deadline);
        }
        self.reap(ids, region, epoch_deadline);
        alarm::cancel();
    }

    /// Round-robin over `ids`, one new worker per group per pass
    fn spawn_all(
        &mut self,
        ids: &[GroupId],
        region: &SharedRegion,
        deadline: Option<Instant>,
        epoch_deadline: Option<f64>,
    ) {
        loop {
            let mut pending = false;
            for &id in ids {
                let Some(instance) = self.table.get(id).and_then(|g| g.next_instance()) else {
                    continue;
                };
                if !lifecycle::keep_running() {
                    return;
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    tracing::debug!("Timeout reached while spawning");
                    return;
                }

                match self.spawn_with_retry(id, instance, region, epoch_deadline) {
                    Ok(Some(pid)) => {
                        if let Some(group) = self.table.get_mut(id) {
                            group.bind_started(pid);
                            pending |= !group.fully_started();
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        tracing::error!(error = %e, "Cannot fork, reaping started workers");
                        lifecycle::request_stop();
                        self.stop_workers(ids);
                        return;
                    }
                }
            }
            if !pending {
                return;
            }
        }
    }

    /// Fork one worker, retrying while the kernel is short of processes
    ///
    /// `Ok(None)` means a stop was requested while retrying.
    pub(crate) fn spawn_with_retry(
        &mut self,
        id: GroupId,
        instance: u32,
        region: &SharedRegion,
        epoch_deadline: Option<f64>,
    ) -> StressResult<Option<Pid>> {
        loop {
            if !lifecycle::keep_running() {
                return Ok(None);
            }
            match self.spawn_worker(id, instance, region, epoch_deadline) {
                Ok(pid) => {
                    self.spawned_in_round += 1;
                    self.workers_started += 1;
                    return Ok(Some(pid));
                }
                Err(StressError::Sys(Errno::EAGAIN)) => {
                    tracing::debug!("fork returned EAGAIN, retrying");
                    std::thread::sleep(FORK_RETRY_DELAY);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn spawn_worker(
        &self,
        id: GroupId,
        instance: u32,
        region: &SharedRegion,
        epoch_deadline: Option<f64>,
    ) -> StressResult<Pid> {
        let group = self
            .table
            .get(id)
            .ok_or_else(|| StressError::spawn("unknown group"))?;
        let stats = group
            .slot(instance)
            .and_then(|s| s.stats_index)
            .and_then(|i| region.record(i))
            .ok_or_else(|| StressError::spawn(format!("{}: no stats record bound", group.name())))?;

        let worker = WorkerBuilder::new(group.stressor().clone())
            .stats(stats)
            .config(&self.config)
            .instance(instance, group.target_instances())
            .max_ops(group.op_budget())
            .pgrp(self.pgrp)
            .deadline(epoch_deadline)
            .backoff(Duration::from_micros(
                self.config.backoff_us * u64::from(self.spawned_in_round),
            ))
            .build()?;

        // SAFETY: the child only runs the worker body and leaves via _exit.
        match unsafe { fork() }? {
            ForkResult::Child => worker.run_and_exit(),
            ForkResult::Parent { child } => {
                let _ = setpgid(child, self.pgrp);
                tracing::debug!(
                    worker = %worker.name(),
                    pid = child.as_raw(),
                    instance,
                    "Spawned"
                );
                Ok(child)
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("mode", &self.mode)
            .field("table", &self.table)
            .field("timeout", &self.timeout)
            .finish()
    }
}

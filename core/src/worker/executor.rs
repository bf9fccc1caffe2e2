//! Worker process body: environment setup, workload invocation, finalisation

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::{alarm, getpid, getppid, setpgid, Pid};
use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::config::RunConfig;
use crate::exit::ExitStatus;
use crate::lifecycle::{self, StopToken};
use crate::shared::StatsRecord;
use crate::system::{self, CpuTicks};
use crate::traits::{StressContext, Stressor};

use super::environment;

/// One worker instance, ready to run inside a freshly forked process
///
/// Built by the supervisor before `fork` so the child only has to execute.
pub struct Worker<'a> {
    /// Workload to run
    pub(crate) stressor: Arc<dyn Stressor>,

    /// Stats record owned by this instance
    pub(crate) stats: &'a StatsRecord,

    /// Environment to apply
    pub(crate) config: &'a RunConfig,

    /// Instance index and group size
    pub(crate) instance: u32,
    pub(crate) num_instances: u32,

    /// Ops budget, 0 for unbounded
    pub(crate) max_ops: u64,

    /// Process group to join
    pub(crate) pgrp: Pid,

    /// Absolute deadline in epoch seconds, if the run is bounded
    pub(crate) deadline: Option<f64>,

    /// Delay before the workload starts
    pub(crate) backoff: Duration,
}

impl<'a> Worker<'a> {
    /// `<app>-<workload>` process name
    pub fn name(&self) -> String {
        format!(
            "{}-{}",
            crate::config::APP_NAME,
            crate::catalog::munge_name(self.stressor.name())
        )
    }

    /// Instance index within the group
    pub fn instance(&self) -> u32 {
        self.instance
    }

    /// Ops budget for this instance
    pub fn max_ops(&self) -> u64 {
        self.max_ops
    }

    /// Run the worker body and return its exit status
    ///
    /// Must only be called in the forked child; it installs process-wide
    /// signal handlers and changes scheduling attributes.
    pub fn run(self) -> ExitStatus {
        let name = self.name();

        // Best effort: the supervisor still tracks us by pid.
        let _ = setpgid(Pid::from_raw(0), self.pgrp);

        lifecycle::enter_worker();
        if let Err(e) = lifecycle::install_worker_handlers() {
            tracing::error!(worker = %name, error = %e, "Cannot install signal handlers");
            return ExitStatus::Failure;
        }
        // Don't outlive a supervisor that was killed outright.
        if let Err(e) = environment::set_parent_death_signal(lifecycle::TIMEOUT_SIGNAL) {
            tracing::debug!(worker = %name, error = %e, "Cannot set parent death signal");
        }

        if let Some(deadline) = self.deadline {
            let remaining = (deadline - system::now()).ceil().max(1.0) as u32;
            alarm::set(remaining);
        }

        environment::apply(&name, self.config);

        let pid = getpid();
        tracing::debug!(worker = %name, pid = pid.as_raw(), instance = self.instance, "Started");

        self.stats.mark_started(system::now());
        self.sleep_backoff();

        let stop = StopToken::current();
        let mut status = ExitStatus::Success;
        if stop.keep_running() && !self.config.dry_run {
            let mut ctx = StressContext::new(
                name.clone(),
                self.stats,
                self.max_ops,
                self.instance,
                self.num_instances,
                pid,
                getppid(),
                system::page_size(),
                SmallRng::from_entropy(),
                stop,
            );
            status = match catch_unwind(AssertUnwindSafe(|| self.stressor.run(&mut ctx))) {
                Ok(status) => status,
                Err(_) => {
                    tracing::error!(worker = %name, "Workload panicked");
                    ExitStatus::Failure
                }
            };
        }

        let ticks = CpuTicks::current();
        self.stats.finalize(
            system::now(),
            ticks.total_user(),
            ticks.total_system(),
            status == ExitStatus::Success,
        );
        tracing::debug!(worker = %name, pid = pid.as_raw(), instance = self.instance, ops = self.stats.ops(), "Exited");

        let status = if lifecycle::caught_signal().is_some() {
            ExitStatus::Signaled
        } else {
            status
        };
        if self.config.abort && status.is_failure() {
            self.wake_supervisor(&name);
        }
        status
    }

    /// Interrupt the supervisor's reap so `--abort` acts before our slot's turn
    fn wake_supervisor(&self, name: &str) {
        match kill(getppid(), lifecycle::TIMEOUT_SIGNAL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => tracing::debug!(worker = %name, error = %e, "Cannot signal supervisor"),
        }
    }

    /// Run the worker body and terminate the process with its exit status
    pub fn run_and_exit(self) -> ! {
        let status = self.run();
        // SAFETY: _exit skips the parent's atexit handlers and destructors,
        // which must not run twice after fork.
        unsafe { libc::_exit(status.code()) }
    }

    fn sleep_backoff(&self) {
        let stop = StopToken::current();
        let mut left = self.backoff;
        let tick = Duration::from_millis(10);
        while !left.is_zero() && stop.keep_running() {
            let step = left.min(tick);
            std::thread::sleep(step);
            left -= step;
        }
    }
}

impl std::fmt::Debug for Worker<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("stressor", &self.stressor.name())
            .field("instance", &self.instance)
            .field("num_instances", &self.num_instances)
            .field("max_ops", &self.max_ops)
            .field("deadline", &self.deadline)
            .field("backoff", &self.backoff)
            .finish()
    }
}

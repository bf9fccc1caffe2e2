//! Reaping, exit handling, stop broadcasts and the aggressive affinity loop

use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitid, waitpid, Id, WaitPidFlag, WaitStatus};
use nix::unistd::{alarm, Pid};
use rand::Rng;

use crate::exit::Classification;
use crate::group::GroupId;
use crate::lifecycle::{self, SupervisorState};
use crate::shared::SharedRegion;
use crate::system::{self, ResourceSnapshot};
use crate::worker::environment;

use super::executor::Orchestrator;

const MB: u64 = 1024 * 1024;

fn peek(pid: Pid) -> nix::Result<WaitStatus> {
    waitid(
        Id::Pid(pid),
        WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT,
    )
}

/// Is `pid` still running? Leaves any exit status in place for `waitpid`.
fn is_alive(pid: Pid) -> bool {
    matches!(peek(pid), Ok(WaitStatus::StillAlive))
}

/// How `pid` ended, if it already has, without reaping it
fn peek_exit(pid: Pid) -> Option<Classification> {
    match peek(pid) {
        Ok(WaitStatus::StillAlive) | Err(_) => None,
        Ok(status) => Classification::from_wait_status(status),
    }
}

/// Log load average and memory without touching any run state
pub(crate) fn dump_snapshot() {
    match ResourceSnapshot::take() {
        Some(s) => tracing::info!(
            load_1m = s.load.one,
            load_5m = s.load.five,
            load_15m = s.load.fifteen,
            mem_free_mb = s.ram_free / MB,
            mem_total_mb = s.ram_total / MB,
            "Load Avg: {:.2} {:.2} {:.2}, MemFree: {} MB, MemTotal: {} MB",
            s.load.one,
            s.load.five,
            s.load.fifteen,
            s.ram_free / MB,
            s.ram_total / MB
        ),
        None => tracing::warn!("Cannot read system resource snapshot"),
    }
}

impl Orchestrator {
    /// Pids of the live workers of `ids`, in slot order
    pub(crate) fn live_pids(&self, ids: &[GroupId]) -> Vec<Pid> {
        ids.iter()
            .filter_map(|&id| self.table.get(id))
            .flat_map(|g| g.live_pids())
            .collect()
    }

    /// Send the next escalation signal to every live worker of `ids`
    ///
    /// Workers are signalled one by one rather than through `killpg`: the
    /// supervisor shares the group and must not receive its own SIGKILL.
    pub(crate) fn stop_workers(&mut self, ids: &[GroupId]) {
        self.state = SupervisorState::Draining;
        let signal = self.escalation.next_signal();
        let pids = self.live_pids(ids);
        tracing::debug!(
            signal = %signal,
            workers = pids.len(),
            request = self.escalation.requests(),
            "Stopping workers"
        );
        for pid in pids {
            match kill(pid, signal) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => tracing::debug!(pid = pid.as_raw(), error = %e, "kill failed"),
            }
        }
        // Keep escalating once a second until everybody has been reaped.
        if signal != Signal::SIGKILL {
            alarm::set(1);
        }
    }

    /// React to anything the signal handlers flagged since the last call
    pub(crate) fn service_signals(&mut self, ids: &[GroupId]) {
        if lifecycle::take_dump_request() {
            dump_snapshot();
        }
        let events = lifecycle::stop_events();
        if events != self.handled_events {
            self.handled_events = events;
            if lifecycle::timed_out() && self.state == SupervisorState::Running {
                tracing::debug!("Timeout reached, stopping workers");
            }
            self.stop_workers(ids);
        }
    }

    /// Reap the exits of `ids` that cannot wait for their slot's turn
    ///
    /// The reap loop blocks on one slot at a time, so a later worker killed
    /// by the OOM killer, or one failing under `--abort`, is handled here as
    /// soon as SIGCHLD reports it. Every other exit stays unreaped until its
    /// slot comes up. `waiting_on` is the pid the caller is about to block on.
    pub(crate) fn service_children(
        &mut self,
        ids: &[GroupId],
        waiting_on: Option<Pid>,
        region: &SharedRegion,
        epoch_deadline: Option<f64>,
    ) {
        let events = lifecycle::child_events();
        if events == self.handled_child_events {
            return;
        }
        self.handled_child_events = events;

        let mut bound = Vec::new();
        for &id in ids {
            let Some(group) = self.table.get(id) else {
                continue;
            };
            for instance in 0..group.target_instances() {
                if let Some(pid) = group.slot(instance).and_then(|s| s.pid) {
                    if Some(pid) != waiting_on {
                        bound.push((id, instance, pid));
                    }
                }
            }
        }

        for (id, instance, pid) in bound {
            let Some(class) = peek_exit(pid) else {
                continue;
            };
            let stopping = !lifecycle::keep_running();
            let urgent = class.wants_restart(self.config.oom_policy, stopping)
                || (self.config.abort && class.is_failure() && !self.aborted);
            if !urgent {
                continue;
            }
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(status) => {
                    if let Some(class) = Classification::from_wait_status(status) {
                        tracing::debug!(pid = pid.as_raw(), instance, "Reaping worker ahead of its slot");
                        self.handle_exit(ids, id, instance, pid, class, region, epoch_deadline);
                    }
                }
                Err(e) => tracing::debug!(pid = pid.as_raw(), error = %e, "waitpid failed"),
            }
        }
    }

    /// Move live workers between permitted CPUs until the stop condition
    pub(crate) fn aggressive_loop(
        &mut self,
        ids: &[GroupId],
        region: &SharedRegion,
        epoch_deadline: Option<f64>,
    ) {
        let cpus = match &self.config.cpu_affinity {
            Some(cpus) => cpus.clone(),
            None => match environment::allowed_cpus() {
                Ok(cpus) => cpus,
                Err(e) => {
                    tracing::debug!(error = %e, "No affinity mask, skipping CPU migration");
                    return;
                }
            },
        };
        let pause = Duration::from_micros(1_000_000 / (system::ticks_per_second() * 5).max(1));

        while lifecycle::wait_flag() {
            self.service_signals(ids);
            self.service_children(ids, None, region, epoch_deadline);
            let alive: Vec<Pid> = self
                .live_pids(ids)
                .into_iter()
                .filter(|&pid| is_alive(pid))
                .collect();
            if alive.is_empty() {
                break;
            }
            for pid in alive {
                let cpu = cpus[self.rng.gen_range(0..cpus.len())];
                if let Err(e) = environment::set_affinity(pid, &[cpu]) {
                    tracing::trace!(pid = pid.as_raw(), cpu, error = %e, "Cannot migrate worker");
                }
            }
            std::thread::sleep(pause);
        }
    }

    /// Block on every bound slot of `ids`, in slot order
    pub(crate) fn reap(&mut self, ids: &[GroupId], region: &SharedRegion, epoch_deadline: Option<f64>) {
        self.service_signals(ids);

        for &id in ids {
            let instances = self.table.get(id).map_or(0, |g| g.target_instances());
            for instance in 0..instances {
                while let Some(pid) = self
                    .table
                    .get(id)
                    .and_then(|g| g.slot(instance))
                    .and_then(|s| s.pid)
                {
                    self.service_children(ids, Some(pid), region, epoch_deadline);
                    match waitpid(pid, None) {
                        Ok(status) => {
                            if let Some(class) = Classification::from_wait_status(status) {
                                self.handle_exit(ids, id, instance, pid, class, region, epoch_deadline);
                            }
                        }
                        Err(Errno::EINTR) => {
                            self.service_signals(ids);
                            self.service_children(ids, Some(pid), region, epoch_deadline);
                        }
                        Err(Errno::ECHILD) => {
                            tracing::debug!(pid = pid.as_raw(), "Worker already gone");
                            if let Some(group) = self.table.get_mut(id) {
                                group.clear(instance);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(pid = pid.as_raw(), error = %e, "waitpid failed");
                            if let Some(group) = self.table.get_mut(id) {
                                group.clear(instance);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Fold one reaped exit into the run
    ///
    /// Returns false if the slot had already been reaped, in which case
    /// nothing changes.
    pub(crate) fn record_exit(&mut self, id: GroupId, instance: u32, class: Classification) -> bool {
        let Some(group) = self.table.get_mut(id) else {
            return false;
        };
        let Some(pid) = group.clear(instance) else {
            return false;
        };
        let name = group.name().to_string();
        let status = class.exit_status();

        match class {
            Classification::Success => {
                tracing::debug!(stressor = %name, pid = pid.as_raw(), instance, "Worker terminated");
            }
            Classification::NotImplemented => {
                tracing::info!(stressor = %name, pid = pid.as_raw(), "Not implemented on this system");
            }
            Classification::ResourceExhausted => {
                tracing::error!(
                    stressor = %name,
                    pid = pid.as_raw(),
                    "Process [{}] ({}) aborted early, out of system resources",
                    pid,
                    name
                );
            }
            Classification::Signaled { signal: Some(sig), .. } => {
                tracing::warn!(
                    stressor = %name,
                    pid = pid.as_raw(),
                    signal = %sig,
                    "Process {} ({}) terminated on signal {}",
                    pid,
                    name,
                    sig
                );
            }
            _ => {
                tracing::error!(
                    stressor = %name,
                    pid = pid.as_raw(),
                    exit_status = status.code(),
                    "Process {} ({}) terminated with an error, exit status={} ({})",
                    pid,
                    name,
                    status.code(),
                    status
                );
            }
        }

        self.outcome.record(&class);
        if self.config.abort && class.is_failure() && !self.aborted {
            tracing::info!(stressor = %name, "Aborting run after failure");
            self.aborted = true;
            lifecycle::request_stop();
        }
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_exit(
        &mut self,
        ids: &[GroupId],
        id: GroupId,
        instance: u32,
        pid: Pid,
        class: Classification,
        region: &SharedRegion,
        epoch_deadline: Option<f64>,
    ) {
        let stopping = !lifecycle::keep_running();
        if class.wants_restart(self.config.oom_policy, stopping) {
            if let Some(group) = self.table.get_mut(id) {
                group.clear(instance);
                tracing::warn!(
                    stressor = group.name(),
                    pid = pid.as_raw(),
                    instance,
                    "Worker killed by the OOM killer, restarting again"
                );
            }
            match self.spawn_with_retry(id, instance, region, epoch_deadline) {
                Ok(Some(new_pid)) => {
                    if let Some(group) = self.table.get_mut(id) {
                        group.bind_restarted(instance, new_pid);
                    }
                }
                Ok(None) => tracing::debug!(instance, "Stop requested, not restarting"),
                Err(e) => {
                    tracing::error!(error = %e, "Cannot restart worker");
                    self.outcome.record(&class);
                }
            }
            return;
        }

        let was_aborted = self.aborted;
        self.record_exit(id, instance, class);
        if self.aborted && !was_aborted {
            self.stop_workers(ids);
        }
    }
}

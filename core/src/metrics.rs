//! Run metrics derived from the shared statistics region

use serde::{Deserialize, Serialize};

use crate::exit::{ExitStatus, RunOutcome};
use crate::scheduler::RunMode;
use crate::shared::StatsRecord;
use crate::system::{CpuTicks, LoadAverage};

/// Aggregated metrics for one workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkloadMetrics {
    /// Workload name, with `_` replaced by `-`
    pub stressor: String,
    /// Instances that were started
    pub instances: u32,
    /// Bogo-ops summed over all instances
    pub bogo_ops: u64,
    /// Bogo-ops per second of user plus system time
    pub bogo_ops_per_second_usr_sys_time: f64,
    /// Bogo-ops per second of average wall time
    pub bogo_ops_per_second_real_time: f64,
    /// Average wall time per instance, in seconds
    pub wall_clock_time: f64,
    /// User time of all instances, in seconds
    pub user_time: f64,
    /// System time of all instances, in seconds
    pub system_time: f64,
    /// Did any instance complete successfully?
    pub run_ok: bool,
    /// OOM restarts across the group
    pub restarts: u32,
}

impl WorkloadMetrics {
    /// Fold the stats records of one group
    pub fn from_records(
        stressor: &str,
        records: &[&StatsRecord],
        restarts: u32,
        ticks_per_second: u64,
    ) -> Self {
        let instances = records.len() as u32;
        let bogo_ops: u64 = records.iter().map(|r| r.ops()).sum();
        let user_ticks: u64 = records.iter().map(|r| r.user_ticks()).sum();
        let system_ticks: u64 = records.iter().map(|r| r.system_ticks()).sum();
        let run_ok = records.iter().any(|r| r.completed_ok());

        let wall_clock_time = if instances > 0 {
            records.iter().map(|r| r.wall_time()).sum::<f64>() / f64::from(instances)
        } else {
            0.0
        };

        let to_secs = |ticks: u64| {
            if ticks_per_second > 0 {
                ticks as f64 / ticks_per_second as f64
            } else {
                0.0
            }
        };
        let user_time = to_secs(user_ticks);
        let system_time = to_secs(system_ticks);
        let usr_sys = user_time + system_time;

        Self {
            stressor: crate::catalog::munge_name(stressor),
            instances,
            bogo_ops,
            bogo_ops_per_second_usr_sys_time: if usr_sys > 0.0 {
                bogo_ops as f64 / usr_sys
            } else {
                0.0
            },
            bogo_ops_per_second_real_time: if wall_clock_time > 0.0 {
                bogo_ops as f64 / wall_clock_time
            } else {
                0.0
            },
            wall_clock_time,
            user_time,
            system_time,
            run_ok,
            restarts,
        }
    }

    /// Hidden in brief mode: did nothing and never completed
    pub fn is_idle(&self) -> bool {
        self.bogo_ops == 0 && !self.run_ok
    }
}

/// Run-wide CPU usage summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunTimes {
    /// Wall time of the run, in seconds
    pub run_time: f64,
    /// CPUs times run time
    pub available_cpu_time: f64,
    /// User time of all reaped workers
    pub user_time: f64,
    /// System time of all reaped workers
    pub system_time: f64,
    /// User plus system time
    pub total_time: f64,
    /// User time as a share of available CPU time
    pub user_time_percent: f64,
    /// System time as a share of available CPU time
    pub system_time_percent: f64,
    /// Total time as a share of available CPU time
    pub total_time_percent: f64,
    /// Load average at the end of the run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_average: Option<LoadAverage>,
}

impl RunTimes {
    /// Compute from the children tick delta over the run
    pub fn compute(
        run_time: f64,
        cpus: usize,
        before: CpuTicks,
        after: CpuTicks,
        ticks_per_second: u64,
        load_average: Option<LoadAverage>,
    ) -> Self {
        let tps = ticks_per_second.max(1) as f64;
        let user_time = after.children_user.saturating_sub(before.children_user) as f64 / tps;
        let system_time =
            after.children_system.saturating_sub(before.children_system) as f64 / tps;
        let total_time = user_time + system_time;
        let available_cpu_time = cpus as f64 * run_time;
        let pct = |t: f64| {
            if available_cpu_time > 0.0 {
                100.0 * t / available_cpu_time
            } else {
                0.0
            }
        };

        Self {
            run_time,
            available_cpu_time,
            user_time,
            system_time,
            total_time,
            user_time_percent: pct(user_time),
            system_time_percent: pct(system_time),
            total_time_percent: pct(total_time),
            load_average,
        }
    }
}

/// Everything a finished run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// How groups were run
    pub mode: RunMode,
    /// Timeout per round, in seconds; 0 means unbounded
    pub timeout_secs: u64,
    /// Folded worker outcomes
    pub outcome: RunOutcome,
    /// Per-workload metrics in selection order
    pub metrics: Vec<WorkloadMetrics>,
    /// Run-wide times
    pub times: RunTimes,
    /// Name of the interrupting signal, if the run was interrupted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupted_by: Option<String>,
    /// Was the run ended by a failing worker under `abort`?
    pub aborted: bool,
    /// Workers started, restarts included
    pub workers_started: u32,
}

impl RunReport {
    /// Process exit status for the run
    pub fn exit_status(&self) -> ExitStatus {
        self.outcome.exit_status()
    }

    /// Metrics for `name`
    pub fn workload(&self, name: &str) -> Option<&WorkloadMetrics> {
        let wanted = crate::catalog::munge_name(name);
        self.metrics.iter().find(|m| m.stressor == wanted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ops: u64, start: f64, finish: f64, user: u64, sys: u64, ok: bool) -> StatsRecord {
        let r = StatsRecord::default();
        r.add(ops);
        r.mark_started(start);
        r.finalize(finish, user, sys, ok);
        r
    }

    #[test]
    fn test_workload_metrics_from_records() {
        let a = record(100, 10.0, 12.0, 150, 50, true);
        let b = record(300, 10.0, 14.0, 50, 150, false);
        let m = WorkloadMetrics::from_records("soft_lockup", &[&a, &b], 1, 100);

        assert_eq!(m.stressor, "soft-lockup");
        assert_eq!(m.instances, 2);
        assert_eq!(m.bogo_ops, 400);
        assert!((m.wall_clock_time - 3.0).abs() < 1e-9);
        assert!((m.user_time - 2.0).abs() < 1e-9);
        assert!((m.system_time - 2.0).abs() < 1e-9);
        assert!((m.bogo_ops_per_second_usr_sys_time - 100.0).abs() < 1e-9);
        assert!((m.bogo_ops_per_second_real_time - 400.0 / 3.0).abs() < 1e-9);
        assert!(m.run_ok);
        assert_eq!(m.restarts, 1);
    }

    #[test]
    fn test_empty_group_metrics() {
        let m = WorkloadMetrics::from_records("cpu", &[], 0, 100);
        assert_eq!(m.bogo_ops, 0);
        assert_eq!(m.wall_clock_time, 0.0);
        assert_eq!(m.bogo_ops_per_second_real_time, 0.0);
        assert!(m.is_idle());
    }

    #[test]
    fn test_run_times_percentages() {
        let before = CpuTicks {
            children_user: 100,
            ..Default::default()
        };
        let after = CpuTicks {
            children_user: 500,
            children_system: 200,
            ..Default::default()
        };
        let times = RunTimes::compute(2.0, 4, before, after, 100, None);

        assert_eq!(times.available_cpu_time, 8.0);
        assert!((times.user_time - 4.0).abs() < 1e-9);
        assert!((times.system_time - 2.0).abs() < 1e-9);
        assert!((times.total_time_percent - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_serialize_kebab_case() {
        let r = record(10, 0.0, 1.0, 1, 1, true);
        let m = WorkloadMetrics::from_records("cpu", &[&r], 0, 100);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["bogo-ops"], 10);
        assert!(json.get("bogo-ops-per-second-real-time").is_some());
    }
}

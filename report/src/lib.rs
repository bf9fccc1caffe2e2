//! Report generation for finished runs
//!
//! This crate turns a [`stress_herd_core::RunReport`] into:
//!
//! - Metrics and times tables written through `tracing`
//! - A YAML document with a system-info block
//! - JSON and CSV exports of the per-workload metrics

#![warn(missing_docs)]
#![warn(clippy::all)]

mod csv_export;
mod json_export;
mod system_info;
mod text;
mod yaml;

pub use csv_export::CsvExporter;
pub use json_export::JsonExporter;
pub use system_info::SystemInfo;
pub use text::{log_metrics, log_times, metrics_lines, times_lines};
pub use yaml::{YamlDocument, YamlExporter};

use stress_herd_core::{RunReport, WorkloadMetrics};

/// Errors while writing a report
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// File could not be created or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization failed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV serialization failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result alias for report writers
pub type ReportResult<T> = Result<T, ReportError>;

/// What goes into a report
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportOptions {
    /// Skip workloads that did nothing and never completed
    pub brief: bool,
    /// Include the run-wide times section
    pub times: bool,
}

/// Metrics that survive the brief filter, in selection order
pub fn visible_metrics(report: &RunReport, brief: bool) -> impl Iterator<Item = &WorkloadMetrics> {
    report
        .metrics
        .iter()
        .filter(move |m| !(brief && m.is_idle()))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use stress_herd_core::{
        LoadAverage, RunMode, RunOutcome, RunReport, RunTimes, WorkloadMetrics,
    };

    pub(crate) fn metrics(name: &str, ops: u64, run_ok: bool) -> WorkloadMetrics {
        WorkloadMetrics {
            stressor: name.to_string(),
            instances: 2,
            bogo_ops: ops,
            bogo_ops_per_second_usr_sys_time: ops as f64 / 4.0,
            bogo_ops_per_second_real_time: ops as f64 / 2.0,
            wall_clock_time: 2.0,
            user_time: 3.0,
            system_time: 1.0,
            run_ok,
            restarts: 0,
        }
    }

    pub(crate) fn report() -> RunReport {
        RunReport {
            mode: RunMode::Parallel,
            timeout_secs: 5,
            outcome: RunOutcome::default(),
            metrics: vec![
                metrics("cpu", 1000, true),
                metrics("vm", 0, false),
                metrics("null", 0, true),
            ],
            times: RunTimes {
                run_time: 2.0,
                available_cpu_time: 8.0,
                user_time: 3.0,
                system_time: 1.0,
                total_time: 4.0,
                user_time_percent: 37.5,
                system_time_percent: 12.5,
                total_time_percent: 50.0,
                load_average: Some(LoadAverage {
                    one: 1.5,
                    five: 1.0,
                    fifteen: 0.5,
                }),
            },
            interrupted_by: None,
            aborted: false,
            workers_started: 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brief_hides_idle_workloads() {
        let report = fixtures::report();
        let all: Vec<_> = visible_metrics(&report, false).map(|m| m.stressor.as_str()).collect();
        assert_eq!(all, vec!["cpu", "vm", "null"]);

        let brief: Vec<_> = visible_metrics(&report, true).map(|m| m.stressor.as_str()).collect();
        assert_eq!(brief, vec!["cpu", "null"]);
    }
}

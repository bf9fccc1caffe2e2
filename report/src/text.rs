//! Human-readable tables, one log line per row

use stress_herd_core::{RunReport, RunTimes};

use crate::visible_metrics;

/// Metrics table rows, headers first
pub fn metrics_lines(report: &RunReport, brief: bool) -> Vec<String> {
    let mut lines = vec![
        format!(
            "{:<13} {:>9} {:>9} {:>9} {:>9} {:>12} {:>14}",
            "stressor", "bogo ops", "real time", "usr time", "sys time", "bogo ops/s", "bogo ops/s"
        ),
        format!(
            "{:<13} {:>9} {:>9} {:>9} {:>9} {:>12} {:>14}",
            "", "", "(secs) ", "(secs) ", "(secs) ", "(real time)", "(usr+sys time)"
        ),
    ];
    lines.extend(visible_metrics(report, brief).map(|m| {
        format!(
            "{:<13} {:>9} {:>9.2} {:>9.2} {:>9.2} {:>12.2} {:>14.2}",
            m.stressor,
            m.bogo_ops,
            m.wall_clock_time,
            m.user_time,
            m.system_time,
            m.bogo_ops_per_second_real_time,
            m.bogo_ops_per_second_usr_sys_time
        )
    }));
    lines
}

/// Run-time summary rows
pub fn times_lines(times: &RunTimes) -> Vec<String> {
    let mut lines = vec![
        format!("for a {:.2}s run time:", times.run_time),
        format!("  {:8.2}s available CPU time", times.available_cpu_time),
        format!("  {:8.2}s user time   ({:6.2}%)", times.user_time, times.user_time_percent),
        format!("  {:8.2}s system time ({:6.2}%)", times.system_time, times.system_time_percent),
        format!("  {:8.2}s total time  ({:6.2}%)", times.total_time, times.total_time_percent),
    ];
    if let Some(load) = times.load_average {
        lines.push(format!(
            "load average: {:.2} {:.2} {:.2}",
            load.one, load.five, load.fifteen
        ));
    }
    lines
}

/// Write the metrics table to the log
pub fn log_metrics(report: &RunReport, brief: bool) {
    for line in metrics_lines(report, brief) {
        tracing::info!("{}", line);
    }
}

/// Write the run-time summary to the log
pub fn log_times(times: &RunTimes) {
    for line in times_lines(times) {
        tracing::info!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_metrics_table() {
        let lines = metrics_lines(&fixtures::report(), false);
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("stressor"));
        assert!(lines[2].starts_with("cpu"));
        assert!(lines[2].contains("1000"));
        assert!(lines[2].contains("500.00"));
        assert!(lines[2].contains("250.00"));
    }

    #[test]
    fn test_metrics_table_brief() {
        let lines = metrics_lines(&fixtures::report(), true);
        assert_eq!(lines.len(), 4);
        assert!(!lines.iter().any(|l| l.starts_with("vm ")));
    }

    #[test]
    fn test_times_lines() {
        let mut times = fixtures::report().times;
        let lines = times_lines(&times);
        assert_eq!(lines[0], "for a 2.00s run time:");
        assert!(lines[4].contains("50.00%"));
        assert_eq!(lines.last().unwrap(), "load average: 1.50 1.00 0.50");

        times.load_average = None;
        assert_eq!(times_lines(&times).len(), 5);
    }
}

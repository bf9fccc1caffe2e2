//! JSON export

use std::fs::File;
use std::path::Path;

use serde_json::json;
use stress_herd_core::RunReport;

use crate::{visible_metrics, ReportOptions, ReportResult, SystemInfo};

/// Writes the run as one JSON object
pub struct JsonExporter;

impl JsonExporter {
    /// Export summary, metrics and times to `path`
    pub fn export(
        report: &RunReport,
        system_info: &SystemInfo,
        options: ReportOptions,
        path: &Path,
    ) -> ReportResult<()> {
        let metrics: Vec<_> = visible_metrics(report, options.brief).collect();
        let output = json!({
            "system-info": system_info,
            "summary": {
                "mode": report.mode,
                "timeout-secs": report.timeout_secs,
                "exit-status": report.exit_status().code(),
                "exit-status-text": report.exit_status().description(),
                "workers-started": report.workers_started,
                "aborted": report.aborted,
                "interrupted-by": report.interrupted_by,
            },
            "metrics": metrics,
            "times": report.times,
        });

        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, &output)?;
        tracing::debug!(path = %path.display(), "JSON report written");
        Ok(())
    }
}

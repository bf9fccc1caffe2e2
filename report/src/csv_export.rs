//! CSV export

use std::fs::File;
use std::path::Path;

use csv::Writer;
use stress_herd_core::RunReport;

use crate::{visible_metrics, ReportResult};

/// Writes one CSV row per workload
pub struct CsvExporter;

impl CsvExporter {
    /// Export per-workload metrics to `path`
    pub fn export(report: &RunReport, brief: bool, path: &Path) -> ReportResult<()> {
        let file = File::create(path)?;
        let mut wtr = Writer::from_writer(file);

        wtr.write_record([
            "stressor",
            "instances",
            "bogo_ops",
            "real_time_secs",
            "user_time_secs",
            "system_time_secs",
            "bogo_ops_per_sec_real_time",
            "bogo_ops_per_sec_usr_sys_time",
            "run_ok",
            "restarts",
        ])?;

        for m in visible_metrics(report, brief) {
            wtr.write_record(&[
                m.stressor.clone(),
                m.instances.to_string(),
                m.bogo_ops.to_string(),
                format!("{:.6}", m.wall_clock_time),
                format!("{:.6}", m.user_time),
                format!("{:.6}", m.system_time),
                format!("{:.6}", m.bogo_ops_per_second_real_time),
                format!("{:.6}", m.bogo_ops_per_second_usr_sys_time),
                m.run_ok.to_string(),
                m.restarts.to_string(),
            ])?;
        }

        wtr.flush()?;
        tracing::debug!(path = %path.display(), "CSV report written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_export_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");
        CsvExporter::export(&fixtures::report(), true, &path).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "stressor");
        assert_eq!(headers.len(), 10);

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "cpu");
        assert_eq!(&rows[0][2], "1000");
        assert_eq!(&rows[0][6], "500.000000");
    }
}

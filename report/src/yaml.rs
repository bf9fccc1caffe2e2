//! YAML report document

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use stress_herd_core::{RunReport, RunTimes, WorkloadMetrics};

use crate::{visible_metrics, ReportOptions, ReportResult, SystemInfo};

/// The whole YAML document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct YamlDocument {
    /// Host and date block
    pub system_info: SystemInfo,
    /// Per-workload metrics
    pub metrics: Vec<WorkloadMetrics>,
    /// Run-wide times, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub times: Option<RunTimes>,
}

impl YamlDocument {
    /// Build the document for `report`
    pub fn new(report: &RunReport, system_info: SystemInfo, options: ReportOptions) -> Self {
        Self {
            system_info,
            metrics: visible_metrics(report, options.brief).cloned().collect(),
            times: options.times.then_some(report.times),
        }
    }
}

/// Writes the YAML report
pub struct YamlExporter;

impl YamlExporter {
    /// Render the document between `---` and `...` markers
    pub fn render(document: &YamlDocument) -> ReportResult<String> {
        let body = serde_yaml::to_string(document)?;
        Ok(format!("---\n{body}...\n"))
    }

    /// Export `report` to `path`
    pub fn export(
        report: &RunReport,
        system_info: SystemInfo,
        options: ReportOptions,
        path: &Path,
    ) -> ReportResult<()> {
        let document = YamlDocument::new(report, system_info, options);
        let mut file = File::create(path)?;
        file.write_all(Self::render(&document)?.as_bytes())?;
        tracing::debug!(path = %path.display(), "YAML report written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn info() -> SystemInfo {
        SystemInfo {
            stress_herd_version: "0.3.0".into(),
            hostname: "box".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_render_keys() {
        let options = ReportOptions {
            brief: false,
            times: true,
        };
        let text = YamlExporter::render(&YamlDocument::new(&fixtures::report(), info(), options))
            .unwrap();

        assert!(text.starts_with("---\n"));
        assert!(text.ends_with("...\n"));
        assert!(text.contains("system-info:"));
        assert!(text.contains("stress-herd-version: 0.3.0"));
        assert!(text.contains("bogo-ops-per-second-real-time:"));
        assert!(text.contains("available-cpu-time:"));
    }

    #[test]
    fn test_export_brief_without_times() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.yaml");
        let options = ReportOptions {
            brief: true,
            times: false,
        };
        YamlExporter::export(&fixtures::report(), info(), options, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let document: YamlDocument = serde_yaml::from_str(&text).unwrap();
        let names: Vec<_> = document.metrics.iter().map(|m| m.stressor.as_str()).collect();
        assert_eq!(names, vec!["cpu", "null"]);
        assert!(document.times.is_none());
        assert_eq!(document.system_info.hostname, "box");
    }
}

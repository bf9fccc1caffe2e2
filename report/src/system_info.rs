//! `system-info` block of the YAML report

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use stress_herd_core::{HostInfo, ResourceSnapshot};

/// Where and when a run happened
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SystemInfo {
    /// Tool version
    pub stress_herd_version: String,
    /// Login name of the invoking user
    pub run_by: String,
    /// Local date of the report
    pub date_yyyy_mm_dd: String,
    /// Local time of the report
    pub time_hh_mm_ss: String,
    /// Seconds since the epoch
    pub epoch_secs: i64,
    /// Host name
    pub hostname: String,
    /// Kernel name
    pub sysname: String,
    /// Node name
    pub nodename: String,
    /// Kernel release
    pub release: String,
    /// Kernel version string
    pub version: String,
    /// Machine architecture
    pub machine: String,
    /// Configured CPUs
    pub cpus: usize,
    /// Online CPUs
    pub cpus_online: usize,
    /// Clock ticks per second
    pub ticks_per_second: u64,
    /// Page size in bytes
    pub page_size: usize,
    /// Seconds since boot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
    /// Total RAM in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totalram: Option<u64>,
    /// Free RAM in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freeram: Option<u64>,
    /// Total swap in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totalswap: Option<u64>,
    /// Free swap in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freeswap: Option<u64>,
}

impl SystemInfo {
    /// Probe the running host now
    pub fn collect(version: &str) -> Self {
        Self::from_parts(version, HostInfo::collect(), ResourceSnapshot::take(), Local::now())
    }

    /// Assemble from already collected pieces
    pub fn from_parts(
        version: &str,
        host: HostInfo,
        snapshot: Option<ResourceSnapshot>,
        now: DateTime<Local>,
    ) -> Self {
        let run_by = if host.run_by.is_empty() {
            "unknown".to_string()
        } else {
            host.run_by
        };
        Self {
            stress_herd_version: version.to_string(),
            run_by,
            date_yyyy_mm_dd: now.format("%Y-%m-%d").to_string(),
            time_hh_mm_ss: now.format("%H:%M:%S").to_string(),
            epoch_secs: now.timestamp(),
            hostname: host.hostname,
            sysname: host.sysname,
            nodename: host.nodename,
            release: host.release,
            version: host.version,
            machine: host.machine,
            cpus: host.cpus,
            cpus_online: host.cpus_online,
            ticks_per_second: host.ticks_per_second,
            page_size: host.page_size,
            uptime: snapshot.map(|s| s.uptime),
            totalram: snapshot.map(|s| s.ram_total),
            freeram: snapshot.map(|s| s.ram_free),
            totalswap: snapshot.map(|s| s.swap_total),
            freeswap: snapshot.map(|s| s.swap_free),
        }
    }
}

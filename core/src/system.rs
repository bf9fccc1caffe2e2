//! Host probes used by the supervisor and the report

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

fn sysconf(name: libc::c_int) -> Option<i64> {
    // SAFETY: sysconf has no memory-safety preconditions.
    let value = unsafe { libc::sysconf(name) };
    (value > 0).then_some(value as i64)
}

/// Number of configured processors
pub fn cpus_configured() -> usize {
    sysconf(libc::_SC_NPROCESSORS_CONF).map_or(1, |n| n as usize)
}

/// Number of online processors
pub fn cpus_online() -> usize {
    sysconf(libc::_SC_NPROCESSORS_ONLN).map_or(1, |n| n as usize)
}

/// Resolve a requested instance count: 0 means configured CPUs, negative online CPUs
pub fn resolve_instances(requested: i32) -> u32 {
    match requested {
        n if n > 0 => n as u32,
        0 => cpus_configured() as u32,
        _ => cpus_online() as u32,
    }
}

/// Clock ticks per second as used by `times(2)`
pub fn ticks_per_second() -> u64 {
    sysconf(libc::_SC_CLK_TCK).map_or(100, |n| n as u64)
}

/// Platform page size in bytes
pub fn page_size() -> usize {
    sysconf(libc::_SC_PAGESIZE).map_or(4096, |n| n as usize)
}

/// Wall-clock time in seconds since the epoch
pub fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// CPU time consumed, in clock ticks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuTicks {
    /// User time of the process
    pub user: u64,
    /// System time of the process
    pub system: u64,
    /// User time of reaped children
    pub children_user: u64,
    /// System time of reaped children
    pub children_system: u64,
}

impl CpuTicks {
    /// Ticks of the calling process and its reaped children
    pub fn current() -> Self {
        // SAFETY: zeroed tms is a valid out-parameter.
        let mut tms: libc::tms = unsafe { std::mem::zeroed() };
        // SAFETY: tms points to writable memory of the right type.
        let rc = unsafe { libc::times(&mut tms) };
        if rc == (-1_i64) as libc::clock_t {
            return Self::default();
        }
        Self {
            user: tms.tms_utime as u64,
            system: tms.tms_stime as u64,
            children_user: tms.tms_cutime as u64,
            children_system: tms.tms_cstime as u64,
        }
    }

    /// User ticks including children
    pub fn total_user(&self) -> u64 {
        self.user + self.children_user
    }

    /// System ticks including children
    pub fn total_system(&self) -> u64 {
        self.system + self.children_system
    }
}

/// Load averages over 1, 5 and 15 minutes
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    /// 1 minute
    pub one: f64,
    /// 5 minutes
    pub five: f64,
    /// 15 minutes
    pub fifteen: f64,
}

/// Memory and load snapshot from `sysinfo(2)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Load averages
    pub load: LoadAverage,
    /// Total RAM in bytes
    pub ram_total: u64,
    /// Free RAM in bytes
    pub ram_free: u64,
    /// Total swap in bytes
    pub swap_total: u64,
    /// Free swap in bytes
    pub swap_free: u64,
    /// Number of processes
    pub procs: u16,
    /// Seconds since boot
    pub uptime: u64,
}

impl ResourceSnapshot {
    /// Take a snapshot, `None` if the kernel refuses
    pub fn take() -> Option<Self> {
        let info = nix::sys::sysinfo::sysinfo().ok()?;
        let (one, five, fifteen) = info.load_average();
        Some(Self {
            load: LoadAverage { one, five, fifteen },
            ram_total: info.ram_total(),
            ram_free: info.ram_unused(),
            swap_total: info.swap_total(),
            swap_free: info.swap_free(),
            procs: info.process_count(),
            uptime: info.uptime().as_secs(),
        })
    }
}

/// Load averages, if available
pub fn load_average() -> Option<LoadAverage> {
    ResourceSnapshot::take().map(|s| s.load)
}

/// Static description of the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    /// Host name
    pub hostname: String,
    /// User running the tool
    pub run_by: String,
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
}

impl HostInfo {
    /// Collect host information; fields that cannot be read stay empty
    pub fn collect() -> Self {
        let hostname = nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_default();
        let run_by = nix::unistd::User::from_uid(nix::unistd::getuid())
            .ok()
            .flatten()
            .map(|u| u.name)
            .unwrap_or_default();

        let mut info = Self {
            hostname,
            run_by,
            cpus: cpus_configured(),
            cpus_online: cpus_online(),
            ticks_per_second: ticks_per_second(),
            page_size: page_size(),
            ..Default::default()
        };

        if let Ok(uts) = nix::sys::utsname::uname() {
            let text = |s: &std::ffi::OsStr| s.to_string_lossy().into_owned();
            info.sysname = text(uts.sysname());
            info.nodename = text(uts.nodename());
            info.release = text(uts.release());
            info.version = text(uts.version());
            info.machine = text(uts.machine());
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_counts_are_positive() {
        assert!(cpus_configured() >= 1);
        assert!(cpus_online() >= 1);
        assert!(cpus_online() <= cpus_configured());
    }

    #[test]
    fn test_resolve_instances() {
        assert_eq!(resolve_instances(3), 3);
        assert_eq!(resolve_instances(0), cpus_configured() as u32);
        assert_eq!(resolve_instances(-1), cpus_online() as u32);
    }

    #[test]
    fn test_page_size_is_power_of_two() {
        assert!(page_size().is_power_of_two());
        assert!(ticks_per_second() > 0);
    }

    #[test]
    fn test_snapshot() {
        let snapshot = ResourceSnapshot::take().unwrap();
        assert!(snapshot.ram_total >= snapshot.ram_free);
        assert!(snapshot.load.one >= 0.0);
    }

    #[test]
    fn test_host_info() {
        let info = HostInfo::collect();
        assert_eq!(info.sysname, "Linux");
        assert!(info.cpus >= 1);
    }
}

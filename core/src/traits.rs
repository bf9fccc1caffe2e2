//! Workload contract
//!
//! The supervisor never looks inside a workload. It only needs a name, a
//! capability class, an optional support probe, and an entry point that runs
//! until told to stop and reports progress through its ops counter.
//! Implementations live in the `stress-herd-stressors` crate.

use bitflags::bitflags;
use nix::unistd::Pid;
use rand::rngs::SmallRng;

use crate::exit::ExitStatus;
use crate::lifecycle::StopToken;
use crate::shared::StatsRecord;

bitflags! {
    /// Capability classes a workload belongs to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StressClass: u32 {
        /// CPU only
        const CPU = 0x0000_0001;
        /// Memory thrashers
        const MEMORY = 0x0000_0002;
        /// CPU cache
        const CPU_CACHE = 0x0000_0004;
        /// I/O reads/writes
        const IO = 0x0000_0008;
        /// Network and sockets
        const NETWORK = 0x0000_0010;
        /// Scheduling
        const SCHEDULER = 0x0000_0020;
        /// Big memory, swapping
        const VM = 0x0000_0040;
        /// Interrupt floods
        const INTERRUPT = 0x0000_0080;
        /// Generic OS interfaces
        const OS = 0x0000_0100;
        /// Pipe I/O
        const PIPE_IO = 0x0000_0200;
        /// File systems
        const FILESYSTEM = 0x0000_0400;
        /// Devices (null, zero, ...)
        const DEV = 0x0000_0800;
        /// Security APIs
        const SECURITY = 0x0000_1000;
        /// Can hang or crash the host
        const PATHOLOGICAL = 0x0000_2000;
    }
}

/// User-selectable class names, in display order
pub const CLASS_NAMES: &[(&str, StressClass)] = &[
    ("cpu-cache", StressClass::CPU_CACHE),
    ("cpu", StressClass::CPU),
    ("device", StressClass::DEV),
    ("filesystem", StressClass::FILESYSTEM),
    ("interrupt", StressClass::INTERRUPT),
    ("io", StressClass::IO),
    ("memory", StressClass::MEMORY),
    ("network", StressClass::NETWORK),
    ("os", StressClass::OS),
    ("pipe", StressClass::PIPE_IO),
    ("scheduler", StressClass::SCHEDULER),
    ("security", StressClass::SECURITY),
    ("vm", StressClass::VM),
];

impl StressClass {
    /// Look up a single class by name
    pub fn from_class_name(name: &str) -> Option<Self> {
        CLASS_NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, c)| *c)
    }

    /// Names of the selectable classes set in `self`
    pub fn names(&self) -> Vec<&'static str> {
        CLASS_NAMES
            .iter()
            .filter(|(_, c)| self.intersects(*c))
            .map(|(n, _)| *n)
            .collect()
    }
}

/// A stress workload: runs one kind of operation until stopped
pub trait Stressor: Send + Sync {
    /// Workload name, e.g. "cpu"
    fn name(&self) -> &str;

    /// Capability classes of this workload
    fn class(&self) -> StressClass;

    /// Runtime capability probe; `Err` carries the reason it cannot run here
    fn supported(&self) -> Result<(), String> {
        Ok(())
    }

    /// Run until `ctx.keep_stressing()` turns false, then return an exit status
    fn run(&self, ctx: &mut StressContext<'_>) -> ExitStatus;
}

/// Everything a workload may know about its own worker process
pub struct StressContext<'a> {
    /// `<app>-<workload>` name used in log lines
    pub name: String,
    /// Ops budget for this instance; 0 means unbounded
    pub max_ops: u64,
    /// Instance index within the group
    pub instance: u32,
    /// Number of instances in the group
    pub num_instances: u32,
    /// Worker pid
    pub pid: Pid,
    /// Supervisor pid
    pub ppid: Pid,
    /// Platform page size in bytes
    pub page_size: usize,
    /// Freshly seeded per-process random source
    pub rng: SmallRng,
    stats: &'a StatsRecord,
    stop: StopToken,
}

impl<'a> StressContext<'a> {
    /// Build a context bound to a stats record
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        stats: &'a StatsRecord,
        max_ops: u64,
        instance: u32,
        num_instances: u32,
        pid: Pid,
        ppid: Pid,
        page_size: usize,
        rng: SmallRng,
        stop: StopToken,
    ) -> Self {
        Self {
            name,
            max_ops,
            instance,
            num_instances,
            pid,
            ppid,
            page_size,
            rng,
            stats,
            stop,
        }
    }

    /// Count one bogo-op
    #[inline]
    pub fn inc(&self) {
        self.stats.inc();
    }

    /// Count `n` bogo-ops
    #[inline]
    pub fn add(&self, n: u64) {
        self.stats.add(n);
    }

    /// Bogo-ops so far
    #[inline]
    pub fn ops(&self) -> u64 {
        self.stats.ops()
    }

    /// Has the process been asked to stop?
    #[inline]
    pub fn keep_running(&self) -> bool {
        self.stop.keep_running()
    }

    /// Keep going while not stopped and the ops budget is not exhausted
    #[inline]
    pub fn keep_stressing(&self) -> bool {
        self.keep_running() && (self.max_ops == 0 || self.ops() < self.max_ops)
    }

    /// The process-local cancellation token
    pub fn stop_token(&self) -> StopToken {
        self.stop
    }
}

impl std::fmt::Debug for StressContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StressContext")
            .field("name", &self.name)
            .field("max_ops", &self.max_ops)
            .field("instance", &self.instance)
            .field("num_instances", &self.num_instances)
            .field("pid", &self.pid)
            .field("ops", &self.ops())
            .finish()
    }
}

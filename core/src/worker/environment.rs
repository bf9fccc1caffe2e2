//! Per-process environment applied in a worker before the workload runs

use nix::errno::Errno;
use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
use nix::sys::prctl;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::config::{IoNice, RunConfig, SchedPolicy};
use crate::error::{StressError, StressResult};

const IOPRIO_WHO_PROCESS: libc::c_int = 1;
const IOPRIO_CLASS_SHIFT: libc::c_int = 13;

/// Make the calling process a preferred OOM-killer victim, or protect it
pub fn set_oom_adjustment(killable: bool) -> StressResult<()> {
    // Lowering the score needs privileges; 0 restores the default.
    let value = if killable { "1000" } else { "0" };
    std::fs::write("/proc/self/oom_score_adj", value)?;
    Ok(())
}

/// Have the kernel send `signal` to the calling process once its parent dies
pub fn set_parent_death_signal(signal: Signal) -> StressResult<()> {
    prctl::set_pdeathsig(signal)?;
    Ok(())
}

/// Apply a scheduling policy and priority to the calling process
pub fn set_sched(policy: SchedPolicy, priority: Option<i32>) -> StressResult<()> {
    let raw = match policy {
        SchedPolicy::Other => libc::SCHED_OTHER,
        SchedPolicy::Batch => libc::SCHED_BATCH,
        SchedPolicy::Idle => libc::SCHED_IDLE,
        SchedPolicy::Fifo => libc::SCHED_FIFO,
        SchedPolicy::Rr => libc::SCHED_RR,
    };
    let param = libc::sched_param {
        sched_priority: priority.unwrap_or(if policy.is_realtime() { 1 } else { 0 }),
    };
    // SAFETY: param is a valid sched_param for the duration of the call.
    Errno::result(unsafe { libc::sched_setscheduler(0, raw, &param) })?;
    Ok(())
}

/// Set the nice value of the calling process
pub fn set_nice(nice: i32) -> StressResult<()> {
    // SAFETY: plain syscall wrapper.
    Errno::result(unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, nice) })?;
    Ok(())
}

/// Set the I/O priority of the calling process
pub fn set_ionice(ionice: IoNice) -> StressResult<()> {
    let prio = (ionice.class.raw() << IOPRIO_CLASS_SHIFT) | libc::c_int::from(ionice.level);
    // SAFETY: ioprio_set takes three integer arguments.
    let rc = unsafe { libc::syscall(libc::SYS_ioprio_set, IOPRIO_WHO_PROCESS, 0, prio) };
    Errno::result(rc)?;
    Ok(())
}

/// Restrict `pid` (0 for the caller) to `cpus`
pub fn set_affinity(pid: Pid, cpus: &[usize]) -> StressResult<()> {
    let mut set = CpuSet::new();
    for &cpu in cpus {
        set.set(cpu)?;
    }
    sched_setaffinity(pid, &set)?;
    Ok(())
}

/// CPUs the calling process may run on
pub fn allowed_cpus() -> StressResult<Vec<usize>> {
    let set = sched_getaffinity(Pid::from_raw(0))?;
    let cpus: Vec<usize> = (0..CpuSet::count())
        .filter(|&cpu| set.is_set(cpu).unwrap_or(false))
        .collect();
    if cpus.is_empty() {
        return Err(StressError::config("empty CPU affinity mask"));
    }
    Ok(cpus)
}

/// Apply everything `config` asks for; failures are logged, not fatal
pub fn apply(name: &str, config: &RunConfig) {
    if let Err(e) = set_oom_adjustment(!config.oom_avoid) {
        tracing::debug!(worker = name, error = %e, "Cannot set OOM adjustment");
    }
    if let Some(policy) = config.sched {
        if let Err(e) = set_sched(policy, config.sched_prio) {
            tracing::warn!(worker = name, policy = ?policy, error = %e, "Cannot set scheduler");
        }
    }
    if let Some(nice) = config.nice {
        if let Err(e) = set_nice(nice) {
            tracing::warn!(worker = name, nice, error = %e, "Cannot set nice value");
        }
    }
    if let Some(ionice) = config.ionice {
        if let Err(e) = set_ionice(ionice) {
            tracing::warn!(worker = name, class = ?ionice.class, level = ionice.level, error = %e, "Cannot set ionice");
        }
    }
    if let Some(cpus) = &config.cpu_affinity {
        if let Err(e) = set_affinity(Pid::from_raw(0), cpus) {
            tracing::warn!(worker = name, cpus = ?cpus, error = %e, "Cannot set CPU affinity");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_cpus_not_empty() {
        let cpus = allowed_cpus().unwrap();
        assert!(!cpus.is_empty());
    }

    #[test]
    fn test_affinity_roundtrip_in_child() {
        let cpus = allowed_cpus().unwrap();
        let target = cpus[0];
        // Changing affinity is process-wide, so do it in a child.
        match unsafe { nix::unistd::fork() }.unwrap() {
            nix::unistd::ForkResult::Child => {
                let ok = set_affinity(Pid::from_raw(0), &[target]).is_ok()
                    && allowed_cpus().map(|c| c == vec![target]).unwrap_or(false);
                unsafe { libc::_exit(if ok { 0 } else { 1 }) };
            }
            nix::unistd::ForkResult::Parent { child } => {
                let status = nix::sys::wait::waitpid(child, None).unwrap();
                assert_eq!(status, nix::sys::wait::WaitStatus::Exited(child, 0));
            }
        }
    }

    #[test]
    fn test_parent_death_signal_is_set_in_child() {
        match unsafe { nix::unistd::fork() }.unwrap() {
            nix::unistd::ForkResult::Child => {
                let ok = set_parent_death_signal(Signal::SIGALRM).is_ok()
                    && prctl::get_pdeathsig().map(|s| s == Some(Signal::SIGALRM)).unwrap_or(false);
                unsafe { libc::_exit(if ok { 0 } else { 1 }) };
            }
            nix::unistd::ForkResult::Parent { child } => {
                let status = nix::sys::wait::waitpid(child, None).unwrap();
                assert_eq!(status, nix::sys::wait::WaitStatus::Exited(child, 0));
            }
        }
    }

    #[test]
    fn test_raising_nice_is_allowed() {
        match unsafe { nix::unistd::fork() }.unwrap() {
            nix::unistd::ForkResult::Child => {
                let ok = set_nice(19).is_ok();
                unsafe { libc::_exit(if ok { 0 } else { 1 }) };
            }
            nix::unistd::ForkResult::Parent { child } => {
                let status = nix::sys::wait::waitpid(child, None).unwrap();
                assert_eq!(status, nix::sys::wait::WaitStatus::Exited(child, 0));
            }
        }
    }
}

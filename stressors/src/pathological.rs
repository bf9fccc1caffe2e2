//! Workloads that can hang the host; only run with `--pathological`

use nix::unistd::geteuid;
use stress_herd_core::{ExitStatus, StressClass, StressContext, Stressor};

/// Busy-loops at maximum SCHED_FIFO priority to provoke soft lockups
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftLockup;

impl Stressor for SoftLockup {
    fn name(&self) -> &str {
        "softlockup"
    }

    fn class(&self) -> StressClass {
        StressClass::SCHEDULER | StressClass::PATHOLOGICAL
    }

    fn supported(&self) -> Result<(), String> {
        if geteuid().is_root() {
            Ok(())
        } else {
            Err("needs root to use SCHED_FIFO".into())
        }
    }

    fn run(&self, ctx: &mut StressContext<'_>) -> ExitStatus {
        // SAFETY: plain syscall wrappers with a valid sched_param.
        let rc = unsafe {
            let param = libc::sched_param {
                sched_priority: libc::sched_get_priority_max(libc::SCHED_FIFO),
            };
            libc::sched_setscheduler(0, libc::SCHED_FIFO, &param)
        };
        if rc < 0 {
            tracing::info!(worker = %ctx.name, "cannot switch to SCHED_FIFO, skipping");
            return ExitStatus::NotImplemented;
        }
        while ctx.keep_stressing() {
            for _ in 0..1_000_000 {
                std::hint::spin_loop();
            }
            ctx.inc();
        }
        ExitStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softlockup_is_pathological() {
        assert!(SoftLockup.class().contains(StressClass::PATHOLOGICAL));
        assert_eq!(SoftLockup.supported().is_ok(), geteuid().is_root());
    }
}

//! Cheap system-call and scheduler workloads

use nix::sys::resource::{getrlimit, Resource};
use nix::unistd::{getegid, geteuid, getgid, getpgrp, getpid, getppid, getuid};
use stress_herd_core::{ExitStatus, StressClass, StressContext, Stressor};

/// Calls a round of process-identity getters per bogo-op
#[derive(Debug, Default, Clone, Copy)]
pub struct GetPid;

impl Stressor for GetPid {
    fn name(&self) -> &str {
        "getpid"
    }

    fn class(&self) -> StressClass {
        StressClass::OS
    }

    fn run(&self, ctx: &mut StressContext<'_>) -> ExitStatus {
        while ctx.keep_stressing() {
            if getppid() != ctx.ppid {
                // The supervisor went away; nothing left to report to.
                tracing::debug!(worker = %ctx.name, "parent changed, stopping");
                return ExitStatus::Success;
            }
            if getpid() != ctx.pid {
                tracing::error!(worker = %ctx.name, "getpid returned a different pid");
                return ExitStatus::NotSuccess;
            }
            std::hint::black_box((getuid(), geteuid(), getgid(), getegid(), getpgrp()));
            if let Err(e) = getrlimit(Resource::RLIMIT_NOFILE) {
                tracing::error!(worker = %ctx.name, error = %e, "getrlimit failed");
                return ExitStatus::NotSuccess;
            }
            ctx.inc();
        }
        ExitStatus::Success
    }
}

/// Yields the CPU in a tight loop
#[derive(Debug, Default, Clone, Copy)]
pub struct Yield;

impl Stressor for Yield {
    fn name(&self) -> &str {
        "yield"
    }

    fn class(&self) -> StressClass {
        StressClass::SCHEDULER | StressClass::OS
    }

    fn run(&self, ctx: &mut StressContext<'_>) -> ExitStatus {
        while ctx.keep_stressing() {
            if let Err(e) = nix::sched::sched_yield() {
                tracing::error!(worker = %ctx.name, error = %e, "sched_yield failed");
                return ExitStatus::NotSuccess;
            }
            ctx.inc();
        }
        ExitStatus::Success
    }
}

/// Reads the CPU's hardware random number generator
#[derive(Debug, Default, Clone, Copy)]
pub struct Rdrand;

#[cfg(target_arch = "x86_64")]
fn rdrand_available() -> bool {
    std::arch::is_x86_feature_detected!("rdrand")
}

#[cfg(not(target_arch = "x86_64"))]
fn rdrand_available() -> bool {
    false
}

#[cfg(target_arch = "x86_64")]
fn rdrand64() -> Option<u64> {
    let mut value = 0u64;
    // SAFETY: only called once the rdrand feature has been detected.
    let ok = unsafe { core::arch::x86_64::_rdrand64_step(&mut value) };
    (ok == 1).then_some(value)
}

impl Stressor for Rdrand {
    fn name(&self) -> &str {
        "rdrand"
    }

    fn class(&self) -> StressClass {
        StressClass::CPU
    }

    fn supported(&self) -> Result<(), String> {
        if rdrand_available() {
            Ok(())
        } else {
            Err("CPU has no rdrand instruction".into())
        }
    }

    #[cfg(target_arch = "x86_64")]
    fn run(&self, ctx: &mut StressContext<'_>) -> ExitStatus {
        if self.supported().is_err() {
            return ExitStatus::NotImplemented;
        }
        let mut failures = 0u32;
        while ctx.keep_stressing() {
            for _ in 0..32 {
                match rdrand64() {
                    Some(v) => {
                        std::hint::black_box(v);
                    }
                    None => failures += 1,
                }
            }
            ctx.inc();
        }
        if failures > 0 {
            tracing::debug!(worker = %ctx.name, failures, "rdrand underflows");
        }
        ExitStatus::Success
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn run(&self, _ctx: &mut StressContext<'_>) -> ExitStatus {
        ExitStatus::NotImplemented
    }
}

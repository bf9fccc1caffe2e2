//! Built-in stress workloads
//!
//! Each workload implements [`stress_herd_core::Stressor`]: it loops while
//! `ctx.keep_stressing()` holds, counting one bogo-op per iteration, and
//! reports how it ended through an [`stress_herd_core::ExitStatus`].
//!
//! - `cpu`: integer, floating point and prime-sieve arithmetic
//! - `bigheap`, `malloc`: heap growth and allocator churn
//! - `null`, `zero`: character device reads and writes
//! - `pipe`: writer/reader pair over a pipe
//! - `getpid`, `yield`: cheap system calls and scheduler yields
//! - `rdrand`: hardware random numbers where the CPU has them
//! - `softlockup`: real-time busy loop, pathological

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cpu;
mod device;
mod memory;
mod os;
mod pathological;
mod pipe;

use std::sync::Arc;

use stress_herd_core::{Catalog, StressResult, Stressor};

pub use cpu::Cpu;
pub use device::{Null, Zero};
pub use memory::{BigHeap, Malloc};
pub use os::{GetPid, Rdrand, Yield};
pub use pathological::SoftLockup;
pub use pipe::Pipe;

/// Every built-in workload, in catalog order
pub fn stressors() -> Vec<Arc<dyn Stressor>> {
    vec![
        Arc::new(BigHeap::default()),
        Arc::new(Cpu),
        Arc::new(GetPid),
        Arc::new(Malloc::default()),
        Arc::new(Null),
        Arc::new(Pipe::default()),
        Arc::new(Rdrand),
        Arc::new(SoftLockup),
        Arc::new(Yield),
        Arc::new(Zero),
    ]
}

/// The built-in catalog
///
/// # Errors
///
/// Fails if two built-in workloads share a name.
pub fn catalog() -> StressResult<Catalog> {
    Catalog::new(stressors())
}


#[cfg(test)]
mod tests {
    use super::*;
    use stress_herd_core::StressClass;

    #[test]
    fn test_catalog_is_complete() {
        let catalog = catalog().unwrap();
        assert_eq!(catalog.len(), stressors().len());
        assert!(catalog.find("cpu").is_some());
        assert!(catalog.find("soft_lockup").is_none());
        assert!(catalog.find("softlockup").is_some());
    }

    #[test]
    fn test_duplicate_workload_surfaces_as_error() {
        let doubled: Vec<_> = stressors().into_iter().chain(stressors()).collect();
        assert!(Catalog::new(doubled).is_err());
    }

    #[test]
    fn test_only_softlockup_is_pathological() {
        let pathological: Vec<_> = stressors()
            .into_iter()
            .filter(|s| s.class().contains(StressClass::PATHOLOGICAL))
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(pathological, vec!["softlockup"]);
    }
}

//! Worker side of a run
//!
//! A worker is one forked process running one instance of one workload.
//! Before calling into the workload it:
//!
//! 1. joins the run's process group
//! 2. installs its own stop and timeout handlers
//! 3. makes itself a preferred OOM-killer victim (unless asked not to)
//! 4. applies scheduling policy, nice value, I/O priority and CPU affinity
//! 5. reseeds its random source so siblings diverge
//! 6. records its start time in its stats record
//!
//! It then runs the workload, finalises the stats record and exits with a
//! status from [`crate::exit::ExitStatus`].
//!
//! # Example
//!
//! ```ignore
//! use stress_herd_core::worker::WorkerBuilder;
//!
//! let worker = WorkerBuilder::new(stressor)
//!     .stats(region.record(index).unwrap())
//!     .config(&config)
//!     .instance(0, 4)
//!     .max_ops(250)
//!     .build()?;
//!
//! match unsafe { nix::unistd::fork() }? {
//!     ForkResult::Child => worker.run_and_exit(),
//!     ForkResult::Parent { child } => child,
//! }
//! ```

mod builder;
pub mod environment;
mod executor;

pub use builder::WorkerBuilder;
pub use executor::Worker;

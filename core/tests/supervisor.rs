//! End-to-end supervisor scenarios
//!
//! Every scenario forks real workers and takes over SIGALRM and the
//! interrupt signals, so they run one after another on the main thread.

use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, raise, Signal};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use stress_herd_core::{
    plan, Catalog, ExitStatus, OrchestratorBuilder, RunConfig, RunReport, ScheduleRequest,
    StressClass, StressContext, Stressor, WorkloadRequest,
};

// ============================================================================
// Test workloads
// ============================================================================

/// Counts until the budget or a stop
struct Counting(&'static str);

impl Stressor for Counting {
    fn name(&self) -> &str {
        self.0
    }

    fn class(&self) -> StressClass {
        StressClass::CPU
    }

    fn run(&self, ctx: &mut StressContext<'_>) -> ExitStatus {
        while ctx.keep_stressing() {
            ctx.inc();
            std::thread::sleep(Duration::from_micros(50));
        }
        ExitStatus::Success
    }
}

/// Sleeps until stopped, ignoring the ops budget
struct Sleeper;

impl Stressor for Sleeper {
    fn name(&self) -> &str {
        "sleeper"
    }

    fn class(&self) -> StressClass {
        StressClass::SCHEDULER
    }

    fn run(&self, ctx: &mut StressContext<'_>) -> ExitStatus {
        while ctx.keep_running() {
            std::thread::sleep(Duration::from_millis(10));
        }
        ExitStatus::Success
    }
}

/// Ignores every stop request
struct Stubborn;

impl Stressor for Stubborn {
    fn name(&self) -> &str {
        "stubborn"
    }

    fn class(&self) -> StressClass {
        StressClass::SCHEDULER
    }

    fn run(&self, _ctx: &mut StressContext<'_>) -> ExitStatus {
        loop {
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

/// Fails straight away
struct Broken;

impl Stressor for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn class(&self) -> StressClass {
        StressClass::OS
    }

    fn run(&self, ctx: &mut StressContext<'_>) -> ExitStatus {
        ctx.inc();
        ExitStatus::NotSuccess
    }
}

/// Not available on this "platform"
struct Missing;

impl Stressor for Missing {
    fn name(&self) -> &str {
        "missing"
    }

    fn class(&self) -> StressClass {
        StressClass::OS
    }

    fn run(&self, _ctx: &mut StressContext<'_>) -> ExitStatus {
        ExitStatus::NotImplemented
    }
}

/// SIGKILLs itself on its first start, then succeeds
struct OomVictim;

impl Stressor for OomVictim {
    fn name(&self) -> &str {
        "oom-victim"
    }

    fn class(&self) -> StressClass {
        StressClass::MEMORY
    }

    fn run(&self, ctx: &mut StressContext<'_>) -> ExitStatus {
        if ctx.ops() == 0 {
            ctx.inc();
            let _ = raise(Signal::SIGKILL);
        }
        ctx.inc();
        ExitStatus::Success
    }
}

/// Like `OomVictim`, but only the second instance dies; the first one
/// sleeps until stopped so the dead slot is never first in line
struct OomSecond;

impl Stressor for OomSecond {
    fn name(&self) -> &str {
        "oom-second"
    }

    fn class(&self) -> StressClass {
        StressClass::MEMORY
    }

    fn run(&self, ctx: &mut StressContext<'_>) -> ExitStatus {
        if ctx.instance == 1 && ctx.ops() == 0 {
            ctx.inc();
            let _ = raise(Signal::SIGKILL);
        }
        while ctx.keep_running() {
            std::thread::sleep(Duration::from_millis(10));
        }
        ExitStatus::Success
    }
}

/// Runs out of resources straight away
struct Exhausted;

impl Stressor for Exhausted {
    fn name(&self) -> &str {
        "exhausted"
    }

    fn class(&self) -> StressClass {
        StressClass::MEMORY
    }

    fn run(&self, _ctx: &mut StressContext<'_>) -> ExitStatus {
        ExitStatus::NoResource
    }
}

/// Sends `signal` to the supervisor once, then sleeps until stopped
struct SignalsParent(&'static str, Signal);

impl Stressor for SignalsParent {
    fn name(&self) -> &str {
        self.0
    }

    fn class(&self) -> StressClass {
        StressClass::OS
    }

    fn run(&self, ctx: &mut StressContext<'_>) -> ExitStatus {
        let _ = kill(ctx.ppid, self.1);
        while ctx.keep_stressing() {
            ctx.inc();
            std::thread::sleep(Duration::from_millis(10));
        }
        ExitStatus::Success
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn catalog() -> Catalog {
    let stressors: Vec<Arc<dyn Stressor>> = vec![
        Arc::new(Counting("alpha")),
        Arc::new(Counting("beta")),
        Arc::new(Sleeper),
        Arc::new(Stubborn),
        Arc::new(Broken),
        Arc::new(Missing),
        Arc::new(OomVictim),
        Arc::new(OomSecond),
        Arc::new(Exhausted),
        Arc::new(SignalsParent("interrupter", Signal::SIGINT)),
        Arc::new(SignalsParent("dumper", Signal::SIGUSR2)),
    ];
    Catalog::new(stressors).unwrap()
}

fn run(request: ScheduleRequest, config: RunConfig) -> (RunReport, Duration) {
    let schedule = plan(&request, &catalog(), &mut SmallRng::seed_from_u64(3)).unwrap();
    let mut orchestrator = OrchestratorBuilder::new()
        .config(config)
        .schedule(schedule)
        .build()
        .unwrap();
    let start = Instant::now();
    let report = orchestrator.run().unwrap();
    (report, start.elapsed())
}

fn workloads(list: &[(&str, i32)]) -> ScheduleRequest {
    ScheduleRequest {
        workloads: list
            .iter()
            .map(|&(name, n)| WorkloadRequest::new(name, n))
            .collect(),
        ..Default::default()
    }
}

fn timeout(secs: u64) -> RunConfig {
    RunConfig::default().with_timeout(Duration::from_secs(secs))
}

// ============================================================================
// Scenarios
// ============================================================================

fn ops_budget_is_split_across_instances() {
    let request = ScheduleRequest {
        workload_ops: Some(100),
        ..workloads(&[("alpha", 2), ("beta", 2)])
    };
    let (report, elapsed) = run(request, timeout(5));

    assert_eq!(report.exit_status(), ExitStatus::Success);
    assert_eq!(report.workers_started, 4);
    for name in ["alpha", "beta"] {
        let m = report.workload(name).unwrap();
        assert_eq!(m.instances, 2);
        assert!(m.bogo_ops <= 100, "{name}: {} ops", m.bogo_ops);
        assert!(m.bogo_ops >= 98, "{name}: {} ops", m.bogo_ops);
        assert!(m.run_ok);
    }
    assert!(elapsed < Duration::from_secs(5));
}

fn timeout_stops_cooperative_workers() {
    let (report, elapsed) = run(workloads(&[("sleeper", 2)]), timeout(1));

    assert_eq!(report.exit_status(), ExitStatus::Success);
    assert!(elapsed >= Duration::from_millis(900));
    assert!(elapsed < Duration::from_secs(4), "took {elapsed:?}");
}

fn timeout_escalates_to_sigkill() {
    let (report, elapsed) = run(workloads(&[("stubborn", 1)]), timeout(1));

    // Killed on the forced path, which is not an OOM restart.
    assert_eq!(report.exit_status(), ExitStatus::NotSuccess);
    assert_eq!(report.workers_started, 1);
    assert!(elapsed < Duration::from_secs(15), "took {elapsed:?}");
}

fn abort_ends_run_on_first_failure() {
    let config = timeout(30).with_abort(true);
    let (report, elapsed) = run(workloads(&[("broken", 1), ("sleeper", 2)]), config);

    assert!(report.aborted);
    assert_eq!(report.exit_status(), ExitStatus::NotSuccess);
    assert!(elapsed < Duration::from_secs(10), "took {elapsed:?}");
}

fn oom_killed_worker_is_restarted() {
    let (report, _) = run(workloads(&[("oom-victim", 1)]), timeout(10));

    let m = report.workload("oom-victim").unwrap();
    assert!(m.restarts >= 1);
    assert_eq!(report.workers_started, 2);
    assert_eq!(report.exit_status(), ExitStatus::Success);
}

fn oom_restart_does_not_wait_for_earlier_slots() {
    let (report, elapsed) = run(workloads(&[("oom-second", 2)]), timeout(2));

    let m = report.workload("oom-second").unwrap();
    assert!(m.restarts >= 1, "restarts={}", m.restarts);
    assert_eq!(report.workers_started, 3);
    assert_eq!(report.exit_status(), ExitStatus::Success);
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
}

fn abort_acts_on_a_failure_behind_a_running_worker() {
    let config = timeout(8).with_abort(true);
    let (report, elapsed) = run(workloads(&[("sleeper", 1), ("broken", 1)]), config);

    assert!(report.aborted);
    assert_eq!(report.exit_status(), ExitStatus::NotSuccess);
    assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
}

fn abort_on_resource_exhaustion() {
    let config = timeout(8).with_abort(true);
    let (report, elapsed) = run(workloads(&[("sleeper", 2), ("exhausted", 1)]), config);

    assert!(report.aborted);
    assert_eq!(report.exit_status(), ExitStatus::NoResource);
    assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
}

fn aggressive_mode_migrates_and_restarts() {
    let config = timeout(1).with_aggressive(true);
    let (report, elapsed) = run(workloads(&[("sleeper", 2), ("oom-second", 2)]), config);

    assert!(report.workload("oom-second").unwrap().restarts >= 1);
    assert_eq!(report.exit_status(), ExitStatus::Success);
    assert!(elapsed >= Duration::from_millis(900));
    assert!(elapsed < Duration::from_secs(4), "took {elapsed:?}");
}

fn interrupt_ends_sequential_run() {
    let request = ScheduleRequest {
        sequential: Some(1),
        ..workloads(&[("interrupter", 1), ("alpha", 1)])
    };
    let (report, elapsed) = run(request, timeout(5));

    assert_eq!(report.interrupted_by.as_deref(), Some("SIGINT"));
    assert_eq!(report.workload("interrupter").unwrap().instances, 1);
    // The interrupt ends the whole run, not just the current round.
    assert_eq!(report.workload("alpha").unwrap().instances, 0);
    assert_eq!(report.workers_started, 1);
    assert!(elapsed < Duration::from_secs(4), "took {elapsed:?}");
}

fn dump_signal_does_not_disturb_run() {
    let request = ScheduleRequest {
        workload_ops: Some(20),
        ..workloads(&[("dumper", 1)])
    };
    let (report, _) = run(request, timeout(5));

    assert!(report.interrupted_by.is_none());
    assert_eq!(report.workload("dumper").unwrap().bogo_ops, 20);
    assert_eq!(report.exit_status(), ExitStatus::Success);
}

fn sequential_runs_one_group_at_a_time() {
    let request = ScheduleRequest {
        sequential: Some(1),
        class: Some(StressClass::CPU),
        workload_ops: Some(20),
        ..Default::default()
    };
    let (report, _) = run(request, timeout(5));

    assert_eq!(report.metrics.len(), 2);
    assert!(report.metrics.iter().all(|m| m.instances == 1 && m.bogo_ops <= 20));
    assert_eq!(report.exit_status(), ExitStatus::Success);
}

fn dry_run_spawns_without_working() {
    let config = timeout(5).with_dry_run(true);
    let (report, _) = run(workloads(&[("stubborn", 2), ("broken", 1)]), config);

    assert_eq!(report.workers_started, 3);
    assert!(report.metrics.iter().all(|m| m.bogo_ops == 0));
    assert_eq!(report.exit_status(), ExitStatus::Success);
}

fn not_implemented_is_not_a_failure() {
    let (report, _) = run(workloads(&[("missing", 2), ("alpha", 1)]), timeout(1));
    assert_eq!(report.exit_status(), ExitStatus::Success);
}

fn main() {
    let scenarios: &[(&str, fn())] = &[
        ("ops_budget_is_split_across_instances", ops_budget_is_split_across_instances),
        ("timeout_stops_cooperative_workers", timeout_stops_cooperative_workers),
        ("timeout_escalates_to_sigkill", timeout_escalates_to_sigkill),
        ("abort_ends_run_on_first_failure", abort_ends_run_on_first_failure),
        ("oom_killed_worker_is_restarted", oom_killed_worker_is_restarted),
        ("oom_restart_does_not_wait_for_earlier_slots", oom_restart_does_not_wait_for_earlier_slots),
        ("abort_acts_on_a_failure_behind_a_running_worker", abort_acts_on_a_failure_behind_a_running_worker),
        ("abort_on_resource_exhaustion", abort_on_resource_exhaustion),
        ("aggressive_mode_migrates_and_restarts", aggressive_mode_migrates_and_restarts),
        ("interrupt_ends_sequential_run", interrupt_ends_sequential_run),
        ("dump_signal_does_not_disturb_run", dump_signal_does_not_disturb_run),
        ("sequential_runs_one_group_at_a_time", sequential_runs_one_group_at_a_time),
        ("dry_run_spawns_without_working", dry_run_spawns_without_working),
        ("not_implemented_is_not_a_failure", not_implemented_is_not_a_failure),
    ];
    for (name, scenario) in scenarios {
        print!("test {name} ... ");
        scenario();
        println!("ok");
    }
    println!("\n{} scenarios passed", scenarios.len());
}

//! Tests for the Orchestrator module
//!
//! Anything that forks a full run lives in `core/tests/`; these tests stay
//! inside the supervisor's bookkeeping and never touch signal dispositions.

use super::aggregator::aggregate_metrics;
use super::builder::OrchestratorBuilder;
use super::executor::alarm_secs;
use crate::catalog::tests::{fake, sample_catalog};
use crate::config::{RunConfig, DEFAULT_PARALLEL_TIMEOUT, DEFAULT_SEQUENTIAL_TIMEOUT};
use crate::error::StressError;
use crate::exit::{Classification, ExitStatus};
use crate::group::{Group, GroupTable};
use crate::scheduler::{plan, RunMode, Schedule, ScheduleRequest, WorkloadRequest};
use crate::shared::SharedRegion;
use crate::traits::StressClass;

use nix::sys::signal::Signal;
use nix::unistd::Pid;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

fn schedule(mode: RunMode) -> Schedule {
    let mut table = GroupTable::new();
    table.push(Group::new(fake("cpu", StressClass::CPU), 2, 100));
    table.push(Group::new(fake("vm", StressClass::VM), 1, 0));
    Schedule { mode, table }
}

// ============================================================================
// Builder
// ============================================================================

#[test]
fn test_builder_missing_schedule() {
    let err = OrchestratorBuilder::new().build().unwrap_err();
    assert!(err.to_string().contains("schedule"));
}

#[test]
fn test_builder_rejects_empty_schedule() {
    let empty = Schedule {
        mode: RunMode::Parallel,
        table: GroupTable::new(),
    };
    let err = OrchestratorBuilder::new().schedule(empty).build().unwrap_err();
    assert!(matches!(err, StressError::Usage(_)));
}

#[test]
fn test_builder_validates_config() {
    let config = RunConfig {
        nice: Some(99),
        ..Default::default()
    };
    let result = OrchestratorBuilder::new()
        .config(config)
        .schedule(schedule(RunMode::Parallel))
        .build();
    assert!(result.is_err());
}

#[test]
fn test_builder_injects_default_timeout() {
    let parallel = OrchestratorBuilder::new()
        .schedule(schedule(RunMode::Parallel))
        .build()
        .unwrap();
    assert_eq!(parallel.timeout(), DEFAULT_PARALLEL_TIMEOUT);

    let sequential = OrchestratorBuilder::new()
        .schedule(schedule(RunMode::Sequential))
        .build()
        .unwrap();
    assert_eq!(sequential.timeout(), DEFAULT_SEQUENTIAL_TIMEOUT);

    let explicit = OrchestratorBuilder::new()
        .config(RunConfig::default().with_timeout(Duration::from_secs(5)))
        .schedule(schedule(RunMode::Sequential))
        .build()
        .unwrap();
    assert_eq!(explicit.timeout(), Duration::from_secs(5));
}

#[test]
fn test_alarm_seconds_round_up() {
    assert_eq!(alarm_secs(Duration::from_millis(1)), 1);
    assert_eq!(alarm_secs(Duration::from_secs(5)), 5);
    assert_eq!(alarm_secs(Duration::from_millis(5001)), 6);
    assert_eq!(alarm_secs(Duration::ZERO), 1);
}

// ============================================================================
// Exit bookkeeping
// ============================================================================

#[test]
fn test_reaping_a_slot_twice_is_a_noop() {
    let mut orchestrator = OrchestratorBuilder::new()
        .schedule(schedule(RunMode::Parallel))
        .seed(7)
        .build()
        .unwrap();
    let id = orchestrator.table().active_ids()[0];
    orchestrator
        .table
        .get_mut(id)
        .unwrap()
        .bind_started(Pid::from_raw(4242));

    assert!(orchestrator.record_exit(id, 0, Classification::WorkloadFailure));
    assert!(!orchestrator.outcome().overall_success);

    // A second reap of the cleared slot must not fold anything.
    assert!(!orchestrator.record_exit(id, 0, Classification::ResourceExhausted));
    assert!(orchestrator.outcome().resource_success);
    assert_eq!(orchestrator.outcome().exit_status(), ExitStatus::NotSuccess);
}

#[test]
fn test_unstarted_slot_is_not_recorded() {
    let mut orchestrator = OrchestratorBuilder::new()
        .schedule(schedule(RunMode::Parallel))
        .build()
        .unwrap();
    let id = orchestrator.table().active_ids()[1];
    assert!(!orchestrator.record_exit(id, 0, Classification::WorkloadFailure));
    assert!(orchestrator.outcome().overall_success);
}

#[test]
fn test_not_implemented_and_success_keep_run_green() {
    let mut orchestrator = OrchestratorBuilder::new()
        .schedule(schedule(RunMode::Parallel))
        .build()
        .unwrap();
    let id = orchestrator.table().active_ids()[0];
    let group = orchestrator.table.get_mut(id).unwrap();
    group.bind_started(Pid::from_raw(1001));
    group.bind_started(Pid::from_raw(1002));

    assert!(orchestrator.record_exit(id, 0, Classification::Success));
    assert!(orchestrator.record_exit(id, 1, Classification::NotImplemented));
    assert_eq!(orchestrator.outcome().exit_status(), ExitStatus::Success);
}

#[test]
fn test_signaled_exit_fails_run() {
    let mut orchestrator = OrchestratorBuilder::new()
        .schedule(schedule(RunMode::Parallel))
        .build()
        .unwrap();
    let id = orchestrator.table().active_ids()[1];
    orchestrator
        .table
        .get_mut(id)
        .unwrap()
        .bind_started(Pid::from_raw(999));

    let class = Classification::Signaled {
        signal: Some(Signal::SIGSEGV),
        oom_suspect: false,
    };
    assert!(orchestrator.record_exit(id, 0, class));
    assert!(!orchestrator.outcome().overall_success);
}

// ============================================================================
// Planning into an orchestrator
// ============================================================================

#[test]
fn test_end_to_end_plan_shape() {
    let request = ScheduleRequest {
        workloads: vec![WorkloadRequest::new("cpu", 2), WorkloadRequest::new("vm", 2)],
        workload_ops: Some(100),
        ..Default::default()
    };
    let schedule = plan(&request, &sample_catalog(), &mut SmallRng::seed_from_u64(1)).unwrap();
    let orchestrator = OrchestratorBuilder::new()
        .config(RunConfig::default().with_timeout(Duration::from_secs(5)))
        .schedule(schedule)
        .build()
        .unwrap();

    assert_eq!(orchestrator.table().total_instances(), 4);
    for (_, group) in orchestrator.table().iter_active() {
        assert_eq!(group.target_instances(), 2);
        assert_eq!(group.op_budget(), 50);
    }
}

// ============================================================================
// Aggregation
// ============================================================================

#[test]
fn test_aggregate_only_counts_started_slots() {
    let mut table = schedule(RunMode::Parallel).table;
    let records = table.bind_stats();
    let region = SharedRegion::create(records).unwrap();
    let ids = table.active_ids();

    // cpu: only instance 0 started; vm: nothing started
    table.get_mut(ids[0]).unwrap().bind_started(Pid::from_raw(1));
    let record = region.record(0).unwrap();
    record.add(40);
    record.mark_started(100.0);
    record.finalize(102.0, 100, 100, true);
    region.record(1).unwrap().add(1_000);

    let metrics = aggregate_metrics(&table, &region, 100);
    assert_eq!(metrics.len(), 2);
    assert_eq!(metrics[0].stressor, "cpu");
    assert_eq!(metrics[0].instances, 1);
    assert_eq!(metrics[0].bogo_ops, 40);
    assert!((metrics[0].bogo_ops_per_second_real_time - 20.0).abs() < 1e-9);
    assert_eq!(metrics[1].bogo_ops, 0);
    assert!(metrics[1].is_idle());
}

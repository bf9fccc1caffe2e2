//! Scheduling policy: turns the user's selection into a [`GroupTable`]
//!
//! Selection happens in three steps:
//!
//! 1. enable workloads, either explicitly by name or in bulk
//!    (`all`, `sequential`, optionally narrowed by class, or `random`)
//! 2. drop unsupported and pathological workloads
//! 3. apply the user's exclude list
//!
//! Instance counts are final once [`plan`] returns, so the shared region
//! can be sized exactly from [`GroupTable::total_instances`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::catalog::{munge_name, Catalog};
use crate::config::{DEFAULT_PARALLEL_TIMEOUT, DEFAULT_SEQUENTIAL_TIMEOUT};
use crate::error::{StressError, StressResult};
use crate::group::{Group, GroupTable};
use crate::system::resolve_instances;
use crate::traits::{StressClass, Stressor};

/// An explicit `NAME[:INSTANCES[:OPS]]` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadRequest {
    /// Workload name
    pub name: String,
    /// Instances; 0 means configured CPUs, negative online CPUs
    pub instances: i32,
    /// Total ops for the whole group, overriding the global budget
    pub ops: Option<u64>,
}

impl WorkloadRequest {
    /// Request `instances` of `name`
    pub fn new(name: impl Into<String>, instances: i32) -> Self {
        Self {
            name: name.into(),
            instances,
            ops: None,
        }
    }

    /// Set the group's total ops budget
    pub fn with_ops(mut self, ops: u64) -> Self {
        self.ops = Some(ops);
        self
    }

    /// Parse `NAME[:INSTANCES[:OPS]]`
    pub fn parse(arg: &str) -> StressResult<Self> {
        let mut parts = arg.split(':');
        let name = parts
            .next()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| StressError::usage(format!("missing workload name in '{arg}'")))?;
        let instances = match parts.next() {
            Some(n) => n
                .trim()
                .parse()
                .map_err(|_| StressError::usage(format!("invalid instance count in '{arg}'")))?,
            None => 1,
        };
        let ops = match parts.next() {
            Some(n) => Some(
                n.trim()
                    .parse()
                    .map_err(|_| StressError::usage(format!("invalid ops count in '{arg}'")))?,
            ),
            None => None,
        };
        if parts.next().is_some() {
            return Err(StressError::usage(format!("too many fields in '{arg}'")));
        }
        Ok(Self {
            name: name.to_string(),
            instances,
            ops,
        })
    }
}

/// The user's selection intent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleRequest {
    /// Explicitly named workloads
    pub workloads: Vec<WorkloadRequest>,
    /// Run workloads one at a time with N instances each
    pub sequential: Option<i32>,
    /// Run every workload at once with N instances each
    pub all: Option<i32>,
    /// Restrict bulk selection to these classes
    #[serde(skip)]
    pub class: Option<StressClass>,
    /// Spread N instances over randomly chosen workloads
    pub random: Option<i32>,
    /// Workloads removed after selection
    pub exclude: Vec<String>,
    /// Allow workloads that may hang or crash the host
    pub pathological: bool,
    /// Total ops per workload, split over its instances
    pub workload_ops: Option<u64>,
}

/// How groups are run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// All groups at once
    Parallel,
    /// One group at a time
    Sequential,
}

impl RunMode {
    /// Timeout used when the user gave none
    pub fn default_timeout(self) -> Duration {
        match self {
            Self::Parallel => DEFAULT_PARALLEL_TIMEOUT,
            Self::Sequential => DEFAULT_SEQUENTIAL_TIMEOUT,
        }
    }
}

/// Result of planning: the final groups and how to run them
#[derive(Debug, Clone)]
pub struct Schedule {
    /// How to run the groups
    pub mode: RunMode,
    /// Selected groups
    pub table: GroupTable,
}

impl Schedule {
    /// `"2 cpu, 1 vm"` style summary of the selection
    pub fn summary(&self) -> String {
        Self::summary_of(&self.table)
    }

    /// Summary of an arbitrary table
    pub fn summary_of(table: &GroupTable) -> String {
        table
            .iter_active()
            .map(|(_, g)| format!("{} {}", g.target_instances(), g.name()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Resolve the run timeout, injecting the mode default when none was given
///
/// The returned flag is true when the default was used.
pub fn resolve_timeout(requested: Option<Duration>, mode: RunMode) -> (Duration, bool) {
    match requested {
        Some(t) => (t, false),
        None => {
            let t = mode.default_timeout();
            tracing::info!(
                timeout_secs = t.as_secs(),
                "Defaulting to a {} second run per stressor",
                t.as_secs()
            );
            (t, true)
        }
    }
}

fn check_exclusivity(request: &ScheduleRequest) -> StressResult<()> {
    if request.sequential.is_some() && request.all.is_some() {
        return Err(StressError::usage(
            "sequential and all modes are mutually exclusive",
        ));
    }
    if request.all.is_some() && !request.workloads.is_empty() {
        return Err(StressError::usage(
            "all mode cannot be combined with individually named stressors",
        ));
    }
    if request.random.is_some() && (request.sequential.is_some() || request.all.is_some()) {
        return Err(StressError::usage(
            "random mode cannot be combined with sequential or all modes",
        ));
    }
    if request.class.is_some() && request.sequential.is_none() && request.all.is_none() {
        return Err(StressError::usage(
            "class option is only used with sequential or all options",
        ));
    }
    if request.workloads.is_empty()
        && request.sequential.is_none()
        && request.all.is_none()
        && request.random.is_none()
    {
        return Err(StressError::usage("no stressor specified"));
    }
    Ok(())
}

/// Why a workload cannot take part in this run, if it cannot
fn rejection(stressor: &dyn Stressor, pathological: bool) -> Option<String> {
    if let Err(reason) = stressor.supported() {
        return Some(format!("not supported: {reason}"));
    }
    if stressor.class().contains(StressClass::PATHOLOGICAL) && !pathological {
        return Some(
            "it may hang or reboot the machine (enable it with the pathological option)".into(),
        );
    }
    None
}

/// Build the group table for `request`
pub fn plan<R: Rng>(
    request: &ScheduleRequest,
    catalog: &Catalog,
    rng: &mut R,
) -> StressResult<Schedule> {
    check_exclusivity(request)?;

    // Validate every name up front so typos fail before anything runs.
    let mut excluded = HashSet::new();
    for name in &request.exclude {
        excluded.insert(munge_name(catalog.get(name)?.name()));
    }
    for w in &request.workloads {
        catalog.get(&w.name)?;
    }

    let global_ops = request.workload_ops.unwrap_or(0);
    let mut table = GroupTable::new();

    let mode = if let Some(n) = request.sequential.or(request.all) {
        let instances = resolve_instances(n);
        let class = request.class.unwrap_or(StressClass::all());
        if request.workloads.is_empty() {
            for stressor in catalog.by_class(class) {
                table.push(Group::new(Arc::clone(stressor), instances, global_ops));
            }
        } else {
            // Sequential over an explicit set keeps the user's order and counts.
            push_explicit(&mut table, request, catalog, global_ops)?;
        }
        if request.sequential.is_some() {
            RunMode::Sequential
        } else {
            RunMode::Parallel
        }
    } else if let Some(n) = request.random {
        let budget = resolve_instances(n);
        push_random(&mut table, request, catalog, &excluded, budget, global_ops, rng)?;
        push_explicit(&mut table, request, catalog, global_ops)?;
        RunMode::Parallel
    } else {
        push_explicit(&mut table, request, catalog, global_ops)?;
        RunMode::Parallel
    };

    for id in table.active_ids() {
        let Some(group) = table.get(id) else { continue };
        if group.target_instances() == 0 {
            table.remove(id);
            continue;
        }
        if let Some(reason) = rejection(&**group.stressor(), request.pathological) {
            tracing::info!(stressor = group.name(), "Disabled '{}': {}", group.name(), reason);
            table.remove(id);
        }
    }

    for id in table.active_ids() {
        let Some(group) = table.get(id) else { continue };
        if excluded.contains(&munge_name(group.name())) {
            tracing::debug!(stressor = group.name(), "Excluded by request");
            table.remove(id);
        }
    }

    Ok(Schedule { mode, table })
}

fn push_explicit(
    table: &mut GroupTable,
    request: &ScheduleRequest,
    catalog: &Catalog,
    global_ops: u64,
) -> StressResult<()> {
    for w in &request.workloads {
        let stressor = catalog.get(&w.name)?;
        let group = Group::new(
            Arc::clone(stressor),
            resolve_instances(w.instances),
            w.ops.unwrap_or(global_ops),
        );
        // A repeated name replaces the earlier request.
        if let Some(existing) = table.find(stressor.name()) {
            table.remove(existing);
        }
        table.push(group);
    }
    Ok(())
}

/// Largest number of instances one random pick may add
fn random_step_bound(remaining: u32) -> u32 {
    (remaining / 32 + 2).min(remaining)
}

fn push_random<R: Rng>(
    table: &mut GroupTable,
    request: &ScheduleRequest,
    catalog: &Catalog,
    excluded: &HashSet<String>,
    budget: u32,
    global_ops: u64,
    rng: &mut R,
) -> StressResult<()> {
    // Only draw from workloads that survive filtering so the total is exact.
    let candidates: Vec<&Arc<dyn Stressor>> = catalog
        .iter()
        .filter(|s| rejection(&***s, request.pathological).is_none())
        .filter(|s| !excluded.contains(&munge_name(s.name())))
        .collect();
    if candidates.is_empty() {
        return Err(StressError::usage("no stressors available for random selection"));
    }

    let mut counts = vec![0u32; candidates.len()];
    let mut order = Vec::new();
    let mut remaining = budget;
    while remaining > 0 {
        let fresh: Vec<usize> = (0..candidates.len()).filter(|&i| counts[i] == 0).collect();
        let pick = if fresh.is_empty() {
            rng.gen_range(0..candidates.len())
        } else {
            fresh[rng.gen_range(0..fresh.len())]
        };
        let add = rng.gen_range(1..=random_step_bound(remaining));
        if counts[pick] == 0 {
            order.push(pick);
        }
        counts[pick] += add;
        remaining -= add;
    }

    for i in order {
        table.push(Group::new(Arc::clone(candidates[i]), counts[i], global_ops));
    }
    Ok(())
}

//! Result aggregation from the shared statistics region

use crate::group::GroupTable;
use crate::metrics::WorkloadMetrics;
use crate::shared::{SharedRegion, StatsRecord};

/// Aggregate per-workload metrics, in selection order
///
/// Only slots that actually started a worker contribute; a round cut short
/// by a timeout or abort leaves the rest untouched.
pub fn aggregate_metrics(
    table: &GroupTable,
    region: &SharedRegion,
    ticks_per_second: u64,
) -> Vec<WorkloadMetrics> {
    table
        .iter_active()
        .map(|(_, group)| {
            let records: Vec<&StatsRecord> = group
                .slots()
                .iter()
                .filter(|s| s.started)
                .filter_map(|s| s.stats_index.and_then(|i| region.record(i)))
                .collect();
            WorkloadMetrics::from_records(group.name(), &records, group.restarts(), ticks_per_second)
        })
        .collect()
}

//! Process group table
//!
//! One [`Group`] per selected workload, kept in selection order inside an
//! arena. Removing a group only clears its `active` flag so every
//! [`GroupId`] handed out stays valid for the whole run.

use std::sync::Arc;

use nix::unistd::Pid;

use crate::traits::Stressor;

/// Stable handle to a group in a [`GroupTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(usize);

impl GroupId {
    /// Position in selection order
    pub fn index(self) -> usize {
        self.0
    }
}

/// One worker slot: the live pid (if any) and its stats record binding
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSlot {
    /// Pid of the running worker; cleared once reaped
    pub pid: Option<Pid>,
    /// Index of the bound record in the shared region
    pub stats_index: Option<usize>,
    /// Times this slot was respawned after an OOM kill
    pub restarts: u32,
    /// Has a worker ever been started in this slot?
    pub started: bool,
}

/// All instances of one workload within a run
#[derive(Clone)]
pub struct Group {
    stressor: Arc<dyn Stressor>,
    target_instances: u32,
    started_instances: u32,
    op_budget: u64,
    slots: Vec<WorkerSlot>,
    active: bool,
}

impl Group {
    /// Create a group; `total_ops` is split over the instances, rounding up
    pub fn new(stressor: Arc<dyn Stressor>, instances: u32, total_ops: u64) -> Self {
        Self {
            stressor,
            target_instances: instances,
            started_instances: 0,
            op_budget: divide_ops(total_ops, instances),
            slots: vec![WorkerSlot::default(); instances as usize],
            active: true,
        }
    }

    /// The workload this group runs
    pub fn stressor(&self) -> &Arc<dyn Stressor> {
        &self.stressor
    }

    /// Workload name
    pub fn name(&self) -> &str {
        self.stressor.name()
    }

    /// Desired worker count
    pub fn target_instances(&self) -> u32 {
        self.target_instances
    }

    /// Workers created so far
    pub fn started_instances(&self) -> u32 {
        self.started_instances
    }

    /// Per-instance ops budget, 0 for unbounded
    pub fn op_budget(&self) -> u64 {
        self.op_budget
    }

    /// Still part of the run?
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Have all instances been started?
    pub fn fully_started(&self) -> bool {
        self.started_instances >= self.target_instances
    }

    /// Worker slots in instance order
    pub fn slots(&self) -> &[WorkerSlot] {
        &self.slots
    }

    /// Slot `instance`
    pub fn slot(&self, instance: u32) -> Option<&WorkerSlot> {
        self.slots.get(instance as usize)
    }

    /// Instance index the next spawned worker will get
    pub fn next_instance(&self) -> Option<u32> {
        (!self.fully_started()).then_some(self.started_instances)
    }

    /// Record that the worker for the next instance is running as `pid`
    ///
    /// Returns the instance index used.
    pub fn bind_started(&mut self, pid: Pid) -> Option<u32> {
        let instance = self.next_instance()?;
        let slot = &mut self.slots[instance as usize];
        slot.pid = Some(pid);
        slot.started = true;
        self.started_instances += 1;
        Some(instance)
    }

    /// Rebind an already-started slot to a respawned worker
    pub fn bind_restarted(&mut self, instance: u32, pid: Pid) -> bool {
        match self.slots.get_mut(instance as usize) {
            Some(slot) if slot.started && slot.pid.is_none() => {
                slot.pid = Some(pid);
                slot.restarts += 1;
                true
            }
            _ => false,
        }
    }

    /// Clear the pid of a reaped slot
    ///
    /// Returns the pid that was cleared, or `None` if the slot was already
    /// empty, so a second reap of the same slot does nothing.
    pub fn clear(&mut self, instance: u32) -> Option<Pid> {
        self.slots.get_mut(instance as usize)?.pid.take()
    }

    /// Pids of the workers still bound to this group
    pub fn live_pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.slots.iter().filter_map(|s| s.pid)
    }

    /// Total OOM restarts across the group
    pub fn restarts(&self) -> u32 {
        self.slots.iter().map(|s| s.restarts).sum()
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name())
            .field("target_instances", &self.target_instances)
            .field("started_instances", &self.started_instances)
            .field("op_budget", &self.op_budget)
            .field("active", &self.active)
            .finish()
    }
}

/// `ceil(total / instances)`, or 0 (unbounded) when there is no total
pub fn divide_ops(total_ops: u64, instances: u32) -> u64 {
    if total_ops == 0 || instances == 0 {
        0
    } else {
        total_ops.div_ceil(u64::from(instances))
    }
}

/// Ordered arena of groups
#[derive(Debug, Clone, Default)]
pub struct GroupTable {
    groups: Vec<Group>,
}

impl GroupTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a group, returning its handle
    pub fn push(&mut self, group: Group) -> GroupId {
        self.groups.push(group);
        GroupId(self.groups.len() - 1)
    }

    /// Find the active group running `name`
    pub fn find(&self, name: &str) -> Option<GroupId> {
        let wanted = crate::catalog::munge_name(name);
        self.iter_active()
            .find(|(_, g)| crate::catalog::munge_name(g.name()) == wanted)
            .map(|(id, _)| id)
    }

    /// Group by handle
    pub fn get(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(id.0)
    }

    /// Mutable group by handle
    pub fn get_mut(&mut self, id: GroupId) -> Option<&mut Group> {
        self.groups.get_mut(id.0)
    }

    /// Drop a group from the run without disturbing other handles
    pub fn remove(&mut self, id: GroupId) -> bool {
        match self.groups.get_mut(id.0) {
            Some(group) if group.active => {
                group.active = false;
                true
            }
            _ => false,
        }
    }

    /// Active groups in selection order
    pub fn iter_active(&self) -> impl Iterator<Item = (GroupId, &Group)> {
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.active)
            .map(|(i, g)| (GroupId(i), g))
    }

    /// Handles of the active groups
    pub fn active_ids(&self) -> Vec<GroupId> {
        self.iter_active().map(|(id, _)| id).collect()
    }

    /// Number of active groups
    pub fn len(&self) -> usize {
        self.iter_active().count()
    }

    /// No active groups?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of `target_instances` over active groups
    pub fn total_instances(&self) -> usize {
        self.iter_active()
            .map(|(_, g)| g.target_instances as usize)
            .sum()
    }

    /// Bind every active slot to a unique stats record index
    ///
    /// Returns the number of records needed, which equals
    /// [`GroupTable::total_instances`].
    pub fn bind_stats(&mut self) -> usize {
        let mut next = 0;
        for group in self.groups.iter_mut().filter(|g| g.active) {
            for slot in &mut group.slots {
                slot.stats_index = Some(next);
                next += 1;
            }
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::fake;
    use crate::traits::StressClass;

    fn table() -> (GroupTable, GroupId, GroupId) {
        let mut table = GroupTable::new();
        let a = table.push(Group::new(fake("cpu", StressClass::CPU), 2, 100));
        let b = table.push(Group::new(fake("vm", StressClass::VM), 3, 0));
        (table, a, b)
    }

    #[test]
    fn test_budget_division_rounds_up() {
        assert_eq!(divide_ops(100, 2), 50);
        assert_eq!(divide_ops(100, 3), 34);
        assert_eq!(divide_ops(0, 3), 0);
        assert_eq!(divide_ops(5, 0), 0);

        for (total, k) in [(1u64, 4u32), (7, 3), (1000, 7), (99, 100)] {
            let sum = divide_ops(total, k) * u64::from(k);
            assert!(sum >= total);
            assert!(sum < total + u64::from(k));
        }
    }

    #[test]
    fn test_total_instances_and_binding() {
        let (mut table, a, b) = table();
        assert_eq!(table.total_instances(), 5);
        assert_eq!(table.bind_stats(), 5);

        let a_idx: Vec<_> = table.get(a).unwrap().slots().iter().map(|s| s.stats_index).collect();
        let b_idx: Vec<_> = table.get(b).unwrap().slots().iter().map(|s| s.stats_index).collect();
        assert_eq!(a_idx, vec![Some(0), Some(1)]);
        assert_eq!(b_idx, vec![Some(2), Some(3), Some(4)]);
    }

    #[test]
    fn test_removal_keeps_handles_valid() {
        let (mut table, a, b) = table();
        assert!(table.remove(a));
        assert!(!table.remove(a));
        assert_eq!(table.len(), 1);
        assert_eq!(table.total_instances(), 3);
        assert_eq!(table.get(b).unwrap().name(), "vm");
        assert_eq!(table.find("cpu"), None);
        assert_eq!(table.find("vm"), Some(b));
        assert_eq!(table.bind_stats(), 3);
    }

    #[test]
    fn test_started_never_exceeds_target() {
        let (mut table, a, _) = table();
        let group = table.get_mut(a).unwrap();
        assert_eq!(group.bind_started(Pid::from_raw(10)), Some(0));
        assert_eq!(group.bind_started(Pid::from_raw(11)), Some(1));
        assert_eq!(group.bind_started(Pid::from_raw(12)), None);
        assert_eq!(group.started_instances(), 2);
        assert!(group.fully_started());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (mut table, a, _) = table();
        let group = table.get_mut(a).unwrap();
        group.bind_started(Pid::from_raw(10));
        assert_eq!(group.clear(0), Some(Pid::from_raw(10)));
        assert_eq!(group.clear(0), None);
        assert_eq!(group.clear(9), None);
    }

    #[test]
    fn test_restart_reuses_slot() {
        let (mut table, a, _) = table();
        let group = table.get_mut(a).unwrap();
        assert!(!group.bind_restarted(0, Pid::from_raw(20)));

        group.bind_started(Pid::from_raw(10));
        assert!(!group.bind_restarted(0, Pid::from_raw(20)));
        group.clear(0);
        assert!(group.bind_restarted(0, Pid::from_raw(20)));
        assert_eq!(group.slot(0).unwrap().pid, Some(Pid::from_raw(20)));
        assert_eq!(group.restarts(), 1);
        assert_eq!(group.started_instances(), 1);
    }
}

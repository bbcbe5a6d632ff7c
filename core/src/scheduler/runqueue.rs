//! Per-CPU deadline runqueue (spec §3 "Runqueue (deadline part)").
//!
//! The leftmost-cached RB-tree of the source becomes a `BTreeSet` keyed by
//! `(deadline, task_id)`: `BTreeSet::first()` is the leftmost element in
//! O(log n), which is all the source ever uses the cache for. The tasks
//! themselves live in a `BTreeMap` arena owned by the runqueue — this is the
//! "owned by one runqueue at a time; transfer under both runqueue locks"
//! ownership rule from spec §3, expressed as moving a `Task` out of one
//! map and into another rather than relinking pointers.

use alloc::collections::{BTreeMap, BTreeSet};

use super::task::{CpuId, Task, TaskId};

#[derive(Debug, Default)]
pub struct Runqueue {
    pub cpu: CpuId,
    /// Arena of tasks currently assigned to this runqueue, runnable or not
    /// (e.g. active-non-contending tasks stay here while asleep).
    tasks: BTreeMap<TaskId, Task>,
    /// Runnable entities ordered by absolute deadline (spec I1).
    tree: BTreeSet<(u64, TaskId)>,
    /// Subset of `tree` whose tasks have `nr_cpus_allowed > 1` — candidates
    /// for push (spec §4.2).
    pushable: BTreeSet<(u64, TaskId)>,

    pub curr: Option<TaskId>,

    pub dl_nr_running: u32,
    pub dl_nr_migratory: u32,

    /// Sum of `dl_bw` of active-contending entities (spec §4.5).
    pub running_bw: u64,
    /// Sum of `dl_bw` of all entities assigned to this runqueue.
    pub this_bw: u64,
    /// GRUB reclaim bonus.
    pub extra_bw: u64,
    /// `1 / U_max` in Q8.
    pub bw_ratio: u64,
}

impl Runqueue {
    pub fn new(cpu: CpuId) -> Self {
        Self {
            cpu,
            bw_ratio: 1 << 8,
            ..Default::default()
        }
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    /// Assign a task to this runqueue's arena without making it runnable.
    /// Used for non-contending/inactive tasks and as the landing step of a
    /// migration, before `enqueue_runnable` puts it in the tree.
    pub fn assign(&mut self, task: Task) {
        self.tasks.insert(task.id, task);
    }

    /// Remove a task from this runqueue's arena entirely (migration or
    /// termination). Also removes it from the tree/pushable set if present.
    pub fn take(&mut self, id: TaskId) -> Option<Task> {
        let task = self.tasks.remove(&id)?;
        self.tree.remove(&(task.dl.deadline, id));
        self.pushable.remove(&(task.dl.deadline, id));
        if self.curr == Some(id) {
            self.curr = None;
        }
        Some(task)
    }

    /// Make an already-assigned task runnable: insert into the deadline tree
    /// and, if migratory, the pushable tree.
    pub fn enqueue_runnable(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get(&id) else {
            return;
        };
        let key = (task.dl.deadline, id);
        let migratory = task.dl.is_migratory();
        self.tree.insert(key);
        self.dl_nr_running += 1;
        if migratory {
            self.pushable.insert(key);
            self.dl_nr_migratory += 1;
        }
    }

    /// Reverse of `enqueue_runnable`: remove a task from the tree (and
    /// pushable tree) without removing it from the arena.
    pub fn dequeue_runnable(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get(&id) else {
            return;
        };
        let key = (task.dl.deadline, id);
        if self.tree.remove(&key) {
            self.dl_nr_running = self.dl_nr_running.saturating_sub(1);
        }
        if self.pushable.remove(&key) {
            self.dl_nr_migratory = self.dl_nr_migratory.saturating_sub(1);
        }
    }

    /// Re-key a runnable task after its deadline changed (replenishment,
    /// CBS wakeup rule). No-op if the task isn't currently in the tree.
    pub fn rekey(&mut self, id: TaskId, old_deadline: u64, new_deadline: u64) {
        if old_deadline == new_deadline {
            return;
        }
        let was_runnable = self.tree.remove(&(old_deadline, id));
        let was_pushable = self.pushable.remove(&(old_deadline, id));
        if was_runnable {
            self.tree.insert((new_deadline, id));
        }
        if was_pushable {
            self.pushable.insert((new_deadline, id));
        }
    }

    /// Spec I1: leftmost entity's deadline.
    pub fn earliest_dl_curr(&self) -> Option<u64> {
        self.tree.first().map(|(deadline, _)| *deadline)
    }

    /// Second-leftmost entity's deadline (what would become `curr` after the
    /// current leftmost is picked/removed).
    pub fn earliest_dl_next(&self) -> Option<u64> {
        self.tree.iter().nth(1).map(|(deadline, _)| *deadline)
    }

    pub fn leftmost(&self) -> Option<TaskId> {
        self.tree.first().map(|(_, id)| *id)
    }

    /// Earliest-deadline pushable task, if any (spec §4.2 "Push").
    pub fn earliest_pushable(&self) -> Option<TaskId> {
        self.pushable.first().map(|(_, id)| *id)
    }

    pub fn remove_pushable(&mut self, id: TaskId, deadline: u64) {
        self.pushable.remove(&(deadline, id));
    }

    /// Spec §4.2: `overloaded = dl_nr_migratory > 0 ∧ dl_nr_running > 1`.
    pub fn overloaded(&self) -> bool {
        self.dl_nr_migratory > 0 && self.dl_nr_running > 1
    }

    pub fn len_runnable(&self) -> usize {
        self.tree.len()
    }

    pub fn is_assigned(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Whether `id` is currently in the deadline tree (runnable, as opposed
    /// to merely assigned — e.g. active-non-contending).
    pub fn is_runnable(&self, id: TaskId) -> bool {
        self.tasks
            .get(&id)
            .map(|task| self.tree.contains(&(task.dl.deadline, id)))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::DeadlineEntity;

    fn task(id: TaskId, deadline: u64, cpus_allowed: u64) -> Task {
        let mut dl = DeadlineEntity::new(1_000, 10_000, 10_000, cpus_allowed);
        dl.deadline = deadline;
        Task::new(id, 0, dl)
    }

    #[test]
    fn leftmost_tracks_smallest_deadline() {
        let mut rq = Runqueue::new(0);
        rq.assign(task(1, 100, 0b1));
        rq.enqueue_runnable(1);
        rq.assign(task(2, 50, 0b1));
        rq.enqueue_runnable(2);
        assert_eq!(rq.leftmost(), Some(2));
        assert_eq!(rq.earliest_dl_curr(), Some(50));
        assert_eq!(rq.earliest_dl_next(), Some(100));
    }

    #[test]
    fn migratory_task_is_pushable_and_counted() {
        let mut rq = Runqueue::new(0);
        rq.assign(task(1, 100, 0b11));
        rq.enqueue_runnable(1);
        assert!(rq.overloaded() == false); // only one running task
        rq.assign(task(2, 200, 0b11));
        rq.enqueue_runnable(2);
        assert!(rq.overloaded());
        assert_eq!(rq.earliest_pushable(), Some(1));
    }

    #[test]
    fn rekey_moves_tree_position() {
        let mut rq = Runqueue::new(0);
        rq.assign(task(1, 100, 0b1));
        rq.enqueue_runnable(1);
        if let Some(t) = rq.get_mut(1) {
            t.dl.deadline = 10;
        }
        rq.rekey(1, 100, 10);
        assert_eq!(rq.earliest_dl_curr(), Some(10));
    }

    #[test]
    fn take_removes_from_arena_and_trees() {
        let mut rq = Runqueue::new(0);
        rq.assign(task(1, 100, 0b1));
        rq.enqueue_runnable(1);
        let taken = rq.take(1).unwrap();
        assert_eq!(taken.id, 1);
        assert!(rq.get(1).is_none());
        assert_eq!(rq.leftmost(), None);
    }
}

//! Deadline scheduling class: public contract facade (spec §4.1).
//!
//! Wires [`deadline`] (entity-level CBS/EDF math), [`runqueue`] (per-CPU
//! tree), [`domain`] (cross-CPU heaps and admission), and [`push_pull`]
//! (migration) into the operation set a kernel core would call: `enqueue`,
//! `dequeue`, `yield`, `tick`, `pick_next`, `put_prev`, `set_next`,
//! `check_preempt_curr`, `select_cpu_for_wakeup`, `switched_to`,
//! `switched_from`, `prio_changed`, `task_fork`, `task_dead`,
//! `update_curr`, and the SMP operations `balance`, `task_woken`,
//! `migrate_task_rq`, `set_cpus_allowed`, `rq_online`, `rq_offline`.

pub mod bandwidth;
pub mod cpudl;
pub mod deadline;
pub mod domain;
pub mod errors;
pub mod push_pull;
pub mod runqueue;
pub mod task;

use alloc::vec::Vec;

use crate::config::SchedConfig;
use deadline::UpdateCurrOutcome;
use domain::Domain;
use errors::{SchedError, SchedResult};
use runqueue::Runqueue;
use task::{CpuId, DeadlineEntity, DlFlags, Task, TaskId};

/// Enqueue-time flags (spec §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueFlags {
    Wakeup,
    Replenish,
    Migrated,
    Restore,
    Fork,
}

/// Dequeue-time flags (spec §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DequeueFlags {
    Sleep,
    Save,
    Move,
}

/// Owns every per-CPU runqueue plus the domain they share. This is the
/// "kernel core" side of the contract: it holds the locks (conceptually;
/// see spec §5) that individual operations assume.
pub struct SchedulerState {
    pub config: SchedConfig,
    pub domain: Domain,
    pub rqs: Vec<Runqueue>,
    /// CPU-frequency x capacity scale per CPU, `2^20` fixed point
    /// (`2^20` == unscaled). Consumed by `update_curr` for non-reclaiming
    /// entities.
    pub capacity_scale: Vec<u64>,
    /// Shared RT+DL bandwidth accumulator (spec §4.1 "shared RT-bandwidth
    /// accumulator").
    pub rt_bandwidth_used: u64,
}

impl SchedulerState {
    pub fn new(num_cpus: usize, bw_cap: u64, config: SchedConfig) -> Self {
        let rqs = (0..num_cpus).map(Runqueue::new).collect();
        Self {
            config,
            domain: Domain::new(num_cpus, bw_cap),
            rqs,
            capacity_scale: alloc::vec![1u64 << 20; num_cpus],
            rt_bandwidth_used: 0,
        }
    }

    fn sync_domain_for(&mut self, cpu: CpuId) {
        self.domain
            .set_cpu_deadline(cpu, self.rqs[cpu].earliest_dl_curr());
        self.domain
            .set_overloaded(cpu, self.rqs[cpu].overloaded());
    }

    /// Validate a candidate deadline entity's static parameters (spec §4.1
    /// "Parameter validity").
    pub fn validate_params(&self, dl_runtime: u64, dl_deadline: u64, dl_period: u64) -> bool {
        if dl_deadline == 0 {
            return false;
        }
        if dl_runtime < crate::config::DL_RUNTIME_MIN_NS {
            return false;
        }
        if dl_deadline & (1 << 63) != 0 || dl_period & (1 << 63) != 0 {
            return false;
        }
        let effective_period = if dl_period != 0 { dl_period } else { dl_deadline };
        if dl_runtime > dl_deadline || dl_deadline > effective_period {
            return false;
        }
        self.config.period_in_range(effective_period)
    }

    /// `task_fork`: admit a new deadline task onto `cpu` (spec §4.1,
    /// §4.5). Returns the new task's id.
    pub fn task_fork(
        &mut self,
        id: TaskId,
        cpu: CpuId,
        dl_runtime: u64,
        dl_deadline: u64,
        dl_period: u64,
        cpus_allowed: u64,
        now: u64,
    ) -> SchedResult<()> {
        if cpu >= self.rqs.len() {
            return Err(SchedError::NoSuchCpu);
        }
        if !self.validate_params(dl_runtime, dl_deadline, dl_period) {
            return Err(SchedError::InvalidParameter);
        }
        let mut dl = DeadlineEntity::new(dl_runtime, dl_deadline, dl_period, cpus_allowed);
        let bw = dl.dl_bw;
        let is_sugov = dl.flags.contains(DlFlags::SUGOV);

        if !is_sugov && !self.domain.try_admit(bw) {
            return Err(SchedError::Busy);
        }

        dl.deadline = now + dl_deadline;
        dl.exec_start = 0;
        self.rqs[cpu].this_bw += bw;
        self.rqs[cpu].running_bw += bw;

        let task = Task::new(id, cpu, dl);
        self.rqs[cpu].assign(task);
        self.enqueue(cpu, id, EnqueueFlags::Fork, now);
        Ok(())
    }

    /// `enqueue` (spec §4.1, flag table in §6). `now` is the caller's
    /// monotonic clock reading (spec component 1); only consulted for
    /// `EnqueueFlags::Wakeup`, where the CBS wakeup rule may rewind the
    /// entity's deadline/runtime.
    pub fn enqueue(&mut self, cpu: CpuId, id: TaskId, flags: EnqueueFlags, now: u64) {
        if flags == EnqueueFlags::Wakeup {
            if let Some(task) = self.rqs[cpu].get_mut(id) {
                deadline::update_dl_entity(&mut task.dl, now);
            }
        }
        self.rqs[cpu].enqueue_runnable(id);
        self.sync_domain_for(cpu);
    }

    /// `dequeue` (spec §4.1, §6). For `DEQUEUE_SLEEP`, applies the 0-lag
    /// active-non-contending/inactive transition (spec §4.1).
    pub fn dequeue(&mut self, cpu: CpuId, id: TaskId, flags: DequeueFlags, now: u64) {
        self.rqs[cpu].dequeue_runnable(id);
        if flags == DequeueFlags::Sleep {
            self.begin_non_contending(cpu, id, now);
        }
        self.sync_domain_for(cpu);
    }

    /// 0-lag transition on dequeue-for-sleep (spec §4.1 "Inactive timer").
    /// Returns the absolute time the inactive timer should be armed at, if
    /// the entity became active-non-contending rather than immediately
    /// inactive.
    pub fn begin_non_contending(&mut self, cpu: CpuId, id: TaskId, now: u64) -> Option<u64> {
        let bw = match self.rqs[cpu].get(id) {
            Some(t) => t.dl.dl_bw,
            None => return None,
        };
        let l = match self.rqs[cpu].get(id) {
            Some(t) => deadline::zero_lag_time(&t.dl, now),
            None => return None,
        };
        if l < 0 {
            self.rqs[cpu].running_bw = self.rqs[cpu].running_bw.saturating_sub(bw);
            if let Some(t) = self.rqs[cpu].get_mut(id) {
                t.dl.flags.remove(DlFlags::NON_CONTENDING);
            }
            None
        } else {
            if let Some(t) = self.rqs[cpu].get_mut(id) {
                t.dl.flags.insert(DlFlags::NON_CONTENDING);
            }
            Some(now + l as u64)
        }
    }

    /// Inactive timer fired, or task woke from inactive: (spec §4.1).
    pub fn end_non_contending(&mut self, cpu: CpuId, id: TaskId, fired: bool) {
        let Some(task) = self.rqs[cpu].get_mut(id) else {
            return;
        };
        if fired {
            let bw = task.dl.dl_bw;
            task.dl.flags.remove(DlFlags::NON_CONTENDING);
            self.rqs[cpu].running_bw = self.rqs[cpu].running_bw.saturating_sub(bw);
        } else {
            // Cancel: task woke before the timer fired, stays contending.
            task.dl.flags.remove(DlFlags::NON_CONTENDING);
        }
    }

    /// `update_curr` (spec §4.1), applied to whichever task is `curr` on
    /// `cpu`. Returns whether a reschedule should be requested, per
    /// "if after all this the running entity is not the leftmost, request
    /// rescheduling."
    pub fn update_curr(&mut self, cpu: CpuId, now: u64) -> bool {
        let Some(curr) = self.rqs[cpu].curr else {
            return false;
        };
        let scale = self.capacity_scale[cpu];
        let rq = &self.rqs[cpu];
        let Some(task) = rq.get(curr) else {
            return false;
        };
        let old_deadline = task.dl.deadline;
        let mut dl = task.dl;
        let outcome = deadline::update_curr(&mut dl, rq, now, scale, &mut self.rt_bandwidth_used);
        if let Some(task) = self.rqs[cpu].get_mut(curr) {
            task.dl = dl;
        }
        self.apply_update_curr_outcome(cpu, curr, old_deadline, dl.deadline, outcome);

        let still_leftmost = self.rqs[cpu].leftmost() == Some(curr);
        !still_leftmost
    }

    fn apply_update_curr_outcome(
        &mut self,
        cpu: CpuId,
        id: TaskId,
        old_deadline: u64,
        new_deadline: u64,
        outcome: UpdateCurrOutcome,
    ) {
        if outcome.throttled {
            self.rqs[cpu].dequeue_runnable(id);
        } else if outcome.reenqueue {
            // `dl.deadline` was already written back before this runs, so the
            // tree must be re-keyed from the old deadline rather than
            // dequeued/enqueued under the new one (which would miss the
            // stale entry entirely).
            self.rqs[cpu].rekey(id, old_deadline, new_deadline);
        }
        self.sync_domain_for(cpu);
    }

    /// Replenish timer fire (spec §4.1 "Replenish timer (`dl_task_timer`)").
    pub fn replenish_timer_fired(&mut self, cpu: CpuId, id: TaskId, now: u64) {
        let was_queued = self.rqs[cpu]
            .get(id)
            .map(|t| t.dl.flags.contains(DlFlags::THROTTLED))
            .unwrap_or(false);
        let Some(task) = self.rqs[cpu].get_mut(id) else {
            return;
        };
        deadline::replenish_dl_entity(&mut task.dl, now);
        if was_queued {
            self.rqs[cpu].enqueue_runnable(id);
        }
        self.sync_domain_for(cpu);
        if self.rqs[cpu].overloaded() {
            let _ = push_pull::push(&mut self.domain, &mut self.rqs, cpu);
        }
    }

    /// `pick_next` (spec §4.1): leftmost task becomes `curr`, stamped with
    /// `exec_start = now`, removed from the pushable tree.
    pub fn pick_next(&mut self, cpu: CpuId, now: u64) -> Option<TaskId> {
        let id = self.rqs[cpu].leftmost()?;
        let deadline = self.rqs[cpu].get(id)?.dl.deadline;
        self.rqs[cpu].remove_pushable(id, deadline);
        if let Some(task) = self.rqs[cpu].get_mut(id) {
            task.dl.exec_start = now;
        }
        self.rqs[cpu].curr = Some(id);
        Some(id)
    }

    /// `put_prev`: clear `curr` without dequeuing (the task remains
    /// runnable in the tree, e.g. preempted rather than blocked).
    pub fn put_prev(&mut self, cpu: CpuId) {
        self.rqs[cpu].curr = None;
    }

    /// `set_next`: mark `id` as `curr` without touching the tree (used when
    /// `pick_next` already selected it but callers separate the two
    /// contract points, e.g. around an HR-tick arm).
    pub fn set_next(&mut self, cpu: CpuId, id: TaskId) {
        self.rqs[cpu].curr = Some(id);
    }

    /// `check_preempt_curr` (spec §4.1): does `waker`'s deadline beat
    /// `cpu`'s current task?
    pub fn check_preempt_curr(&self, cpu: CpuId, waker_deadline: u64, waker_is_sugov: bool) -> bool {
        let Some(curr) = self.rqs[cpu].curr else {
            return true;
        };
        let Some(curr_task) = self.rqs[cpu].get(curr) else {
            return true;
        };
        if waker_is_sugov {
            return true;
        }
        waker_deadline < curr_task.dl.deadline
    }

    pub fn select_cpu_for_wakeup(
        &self,
        prev_cpu: CpuId,
        waker_deadline: u64,
        cpus_allowed: u64,
    ) -> CpuId {
        push_pull::select_cpu_for_wakeup(&self.domain, &self.rqs, prev_cpu, waker_deadline, cpus_allowed)
    }

    /// `switched_to`: a task changed into the deadline class on `cpu`.
    pub fn switched_to(&mut self, cpu: CpuId, id: TaskId) {
        self.rqs[cpu].enqueue_runnable(id);
        self.sync_domain_for(cpu);
    }

    /// `switched_from`: a task left the deadline class.
    pub fn switched_from(&mut self, cpu: CpuId, id: TaskId) {
        if let Some(task) = self.rqs[cpu].get(id) {
            let bw = task.dl.dl_bw;
            self.rqs[cpu].this_bw = self.rqs[cpu].this_bw.saturating_sub(bw);
            self.rqs[cpu].running_bw = self.rqs[cpu].running_bw.saturating_sub(bw);
            self.domain.release(bw);
        }
        self.rqs[cpu].dequeue_runnable(id);
        self.sync_domain_for(cpu);
    }

    /// `prio_changed`: no-op for deadline entities beyond possibly
    /// requesting reschedule, since priority within the class is always the
    /// deadline itself; exposed for contract completeness.
    pub fn prio_changed(&self, cpu: CpuId, id: TaskId) -> bool {
        self.rqs[cpu].leftmost() != Some(id) && self.rqs[cpu].curr == Some(id)
    }

    /// `task_dead`: task exiting; release its bandwidth and remove it from
    /// its runqueue's arena.
    pub fn task_dead(&mut self, cpu: CpuId, id: TaskId) {
        if let Some(task) = self.rqs[cpu].get(id) {
            let bw = task.dl.dl_bw;
            self.domain.release(bw);
        }
        self.rqs[cpu].take(id);
        self.sync_domain_for(cpu);
    }

    /// `set_cpus_allowed`: narrow or widen a task's allowed-CPU mask.
    /// Recomputes migratory bookkeeping by re-enqueueing.
    pub fn set_cpus_allowed(&mut self, cpu: CpuId, id: TaskId, mask: u64) {
        if self.rqs[cpu].get(id).is_none() {
            return;
        }
        let was_runnable = self.rqs[cpu].is_runnable(id);
        self.rqs[cpu].dequeue_runnable(id);
        if let Some(task) = self.rqs[cpu].get_mut(id) {
            task.dl.cpus_allowed = mask;
        }
        if was_runnable {
            self.rqs[cpu].enqueue_runnable(id);
        }
        self.sync_domain_for(cpu);
    }

    /// `migrate_task_rq`: move a task's arena entry from `from` to `to`
    /// under proper bandwidth bookkeeping (spec §4.1 "Replenish timer":
    /// "migrate the entity to an online CPU under proper bandwidth
    /// bookkeeping").
    pub fn migrate_task_rq(&mut self, from: CpuId, to: CpuId, id: TaskId) -> SchedResult<()> {
        let was_runnable = self.rqs[from].is_runnable(id);
        let bw = self.rqs[from].get(id).map(|t| t.dl.dl_bw).unwrap_or(0);

        let mut task = self.rqs[from].take(id).ok_or(SchedError::Retry)?;
        self.rqs[from].this_bw = self.rqs[from].this_bw.saturating_sub(bw);
        self.rqs[from].running_bw = self.rqs[from].running_bw.saturating_sub(bw);

        task.cpu = to;
        self.rqs[to].assign(task);
        self.rqs[to].this_bw += bw;
        self.rqs[to].running_bw += bw;
        if was_runnable {
            self.rqs[to].enqueue_runnable(id);
        }

        self.sync_domain_for(from);
        self.sync_domain_for(to);
        Ok(())
    }

    /// `rq_online`: CPU joined the domain, clear any stale "no deadline
    /// task" marker left from offline.
    pub fn rq_online(&mut self, cpu: CpuId) {
        self.sync_domain_for(cpu);
    }

    /// `rq_offline`: CPU left the domain; drain its bandwidth contribution
    /// bookkeeping so admission on other CPUs isn't blocked by a dead CPU's
    /// share. Tasks should be migrated via `migrate_task_rq` before calling
    /// this.
    pub fn rq_offline(&mut self, cpu: CpuId) {
        self.domain.set_cpu_deadline(cpu, None);
        self.domain.set_overloaded(cpu, false);
    }

    /// `balance` (spec SMP operation): attempt one push from `cpu`, else one
    /// pull into `cpu`.
    pub fn balance(&mut self, cpu: CpuId) -> SchedResult<Option<push_pull::Migration>> {
        if let Some(m) = push_pull::push(&mut self.domain, &mut self.rqs, cpu)? {
            return Ok(Some(m));
        }
        push_pull::pull(&mut self.domain, &mut self.rqs, cpu)
    }

    /// `task_woken`: a task just became runnable on `cpu` via wakeup;
    /// trigger a pull check in case another CPU now has a better fit idle.
    pub fn task_woken(&mut self, cpu: CpuId) -> SchedResult<Option<push_pull::Migration>> {
        push_pull::pull(&mut self.domain, &mut self.rqs, cpu)
    }

    /// Read-only per-CPU snapshot (SPEC_FULL.md §10.6, grounded on the
    /// teacher's `get_percpu_scheduler_stats`): lets a caller observe
    /// runqueue state without reaching into `Runqueue` internals.
    pub fn cpu_stats(&self, cpu: CpuId) -> Option<CpuStats> {
        let rq = self.rqs.get(cpu)?;
        Some(CpuStats {
            cpu,
            nr_running: rq.dl_nr_running,
            nr_migratory: rq.dl_nr_migratory,
            overloaded: rq.overloaded(),
            earliest_deadline: rq.earliest_dl_curr(),
            running_bw: rq.running_bw,
            this_bw: rq.this_bw,
        })
    }

    /// Domain-wide snapshot.
    pub fn domain_stats(&self) -> DomainStats {
        DomainStats {
            total_bw: self.domain.total_bw,
            bw_cap: self.domain.bw_cap,
            dlo_mask: self.domain.dlo_mask,
            free_cpus: self.domain.free_cpus,
            rt_bandwidth_used: self.rt_bandwidth_used,
        }
    }
}

/// Read-only per-CPU scheduler snapshot, mirroring the teacher's
/// `SchedStats`-style observability surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuStats {
    pub cpu: CpuId,
    pub nr_running: u32,
    pub nr_migratory: u32,
    pub overloaded: bool,
    pub earliest_deadline: Option<u64>,
    pub running_bw: u64,
    pub this_bw: u64,
}

/// Read-only domain-wide scheduler snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DomainStats {
    pub total_bw: u64,
    pub bw_cap: u64,
    pub dlo_mask: u64,
    pub free_cpus: u64,
    pub rt_bandwidth_used: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_fork_admits_and_enqueues() {
        let mut sched = SchedulerState::new(1, 1 << 20, SchedConfig::default());
        sched
            .task_fork(1, 0, 5_000_000, 10_000_000, 10_000_000, 0b1, 0)
            .unwrap();
        assert_eq!(sched.rqs[0].leftmost(), Some(1));
    }

    #[test]
    fn task_fork_rejects_over_capacity() {
        let mut sched = SchedulerState::new(1, 1 << 19, SchedConfig::default()); // capacity 0.5
        sched
            .task_fork(1, 0, 5_000_000, 10_000_000, 10_000_000, 0b1, 0)
            .unwrap(); // bw == 0.5, exactly fits
        let err = sched
            .task_fork(2, 0, 6_000_000, 10_000_000, 10_000_000, 0b1, 0)
            .unwrap_err();
        assert_eq!(err, SchedError::Busy);
    }

    #[test]
    fn pick_next_selects_earliest_deadline() {
        let mut sched = SchedulerState::new(1, 1 << 21, SchedConfig::default());
        sched
            .task_fork(1, 0, 3_000_000, 10_000_000, 10_000_000, 0b1, 0)
            .unwrap();
        sched
            .task_fork(2, 0, 2_000_000, 5_000_000, 5_000_000, 0b1, 0)
            .unwrap();
        // Scenario 3 (spec §8): T2 has the earlier deadline.
        let picked = sched.pick_next(0, 0).unwrap();
        assert_eq!(picked, 2);
    }

    #[test]
    fn cpu_stats_reports_running_task() {
        let mut sched = SchedulerState::new(1, 1 << 20, SchedConfig::default());
        sched
            .task_fork(1, 0, 5_000_000, 10_000_000, 10_000_000, 0b1, 0)
            .unwrap();
        let stats = sched.cpu_stats(0).unwrap();
        assert_eq!(stats.nr_running, 1);
        assert_eq!(stats.earliest_deadline, Some(10_000_000));
        let domain_stats = sched.domain_stats();
        assert_eq!(domain_stats.total_bw, 1 << 19);
    }

    #[test]
    fn task_dead_releases_bandwidth() {
        let mut sched = SchedulerState::new(1, 1 << 20, SchedConfig::default());
        sched
            .task_fork(1, 0, 5_000_000, 10_000_000, 10_000_000, 0b1, 0)
            .unwrap();
        assert_eq!(sched.domain.total_bw, 1 << 19);
        sched.task_dead(0, 1);
        assert_eq!(sched.domain.total_bw, 0);
    }
}

//! Cross-CPU push/pull migration (spec §4.2), grounded on the teacher's
//! load-balancing pair (`load_balance.rs` drove the "pick a victim/target
//! pair and migrate" shape; `work_steal.rs` drove the "scan all CPUs,
//! skip self, evaluate a candidate" shape) — generalized here from
//! least-loaded-CPU balancing to earliest/latest-deadline balancing.
//!
//! Real double-locking of two runqueues is a property of whatever embeds
//! this crate (spec §5 "Locks and order"); these functions assume the
//! caller already holds the locks implied by the `&mut` borrows and simply
//! implement the placement algorithm, bounded to the documented retry
//! count of 3 at the call site via [`SchedError::Retry`].

use super::cpudl::DlKey;
use super::domain::Domain;
use super::errors::{SchedError, SchedResult};
use super::runqueue::Runqueue;
use super::task::{CpuId, TaskId};

pub const MAX_DOUBLE_LOCK_RETRIES: u32 = 3;

/// Result of a successful migration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Migration {
    pub task: TaskId,
    pub from: CpuId,
    pub to: CpuId,
}

/// `push` (spec §4.2): while `rq` is overloaded, find its earliest pushable
/// task and a target CPU whose current deadline is strictly later, then
/// migrate. Returns `Ok(None)` if `rq` wasn't overloaded or no suitable
/// target exists; ties broken by lower CPU id via [`super::cpudl::CpuHeap`]
/// scanning the mask in ascending order.
pub fn push(
    domain: &mut Domain,
    rqs: &mut [Runqueue],
    from: CpuId,
) -> SchedResult<Option<Migration>> {
    if !rqs[from].overloaded() {
        return Ok(None);
    }
    let Some(task_id) = rqs[from].earliest_pushable() else {
        return Ok(None);
    };
    let task_deadline = rqs[from]
        .get(task_id)
        .map(|t| t.dl.deadline)
        .ok_or(SchedError::Retry)?;

    let mask = domain.member_cpus & !(1u64 << from);
    let Some(to) = domain
        .cpu_deadline
        .find(mask, |key| matches!(key.0, None) || key.0.unwrap() > task_deadline)
    else {
        return Ok(None);
    };

    let mut task = rqs[from].take(task_id).ok_or(SchedError::Retry)?;
    task.cpu = to;
    rqs[to].assign(task);
    rqs[to].enqueue_runnable(task_id);

    domain.set_overloaded(from, rqs[from].overloaded());
    domain.set_cpu_deadline(from, rqs[from].earliest_dl_curr());
    domain.set_cpu_deadline(to, rqs[to].earliest_dl_curr());
    domain.set_overloaded(to, rqs[to].overloaded());

    Ok(Some(Migration {
        task: task_id,
        from,
        to,
    }))
}

/// `pull` (spec §4.2): scan `dlo_mask` for a CPU whose earliest pushable
/// task has an earlier deadline than both our own current earliest and the
/// source CPU's current task, and migrate it here. Accepts at most one
/// pulled task per call.
pub fn pull(
    domain: &mut Domain,
    rqs: &mut [Runqueue],
    to: CpuId,
) -> SchedResult<Option<Migration>> {
    let self_earliest = rqs[to].earliest_dl_curr().unwrap_or(u64::MAX);
    let mut candidates = domain.dlo_mask & !(1u64 << to);

    while candidates != 0 {
        let from = candidates.trailing_zeros() as CpuId;
        candidates &= candidates - 1;

        let Some(task_id) = rqs[from].earliest_pushable() else {
            continue;
        };
        let task_deadline = rqs[from]
            .get(task_id)
            .map(|t| t.dl.deadline)
            .ok_or(SchedError::Retry)?;
        let source_curr = rqs[from].earliest_dl_curr().unwrap_or(u64::MAX);

        if task_deadline < self_earliest && task_deadline < source_curr {
            let mut task = rqs[from].take(task_id).ok_or(SchedError::Retry)?;
            task.cpu = to;
            rqs[to].assign(task);
            rqs[to].enqueue_runnable(task_id);

            domain.set_overloaded(from, rqs[from].overloaded());
            domain.set_cpu_deadline(from, rqs[from].earliest_dl_curr());
            domain.set_cpu_deadline(to, rqs[to].earliest_dl_curr());
            domain.set_overloaded(to, rqs[to].overloaded());

            return Ok(Some(Migration {
                task: task_id,
                from,
                to,
            }));
        }
    }
    Ok(None)
}

/// `select_cpu_for_wakeup` (spec §4.2): decide where a waking task with
/// deadline `task_deadline` and CPU mask `cpus_allowed` should land, given
/// its prior CPU `prev_cpu`.
pub fn select_cpu_for_wakeup(
    domain: &Domain,
    rqs: &[Runqueue],
    prev_cpu: CpuId,
    task_deadline: u64,
    cpus_allowed: u64,
) -> CpuId {
    let prev_fits = (cpus_allowed & (1u64 << prev_cpu)) != 0;
    let prev_curr = rqs
        .get(prev_cpu)
        .and_then(|rq| rq.earliest_dl_curr())
        .unwrap_or(u64::MAX);
    let prev_single_cpu = cpus_allowed.count_ones() == 1;

    let prev_is_fine = prev_fits && prev_curr > task_deadline;
    if prev_is_fine || prev_single_cpu {
        return prev_cpu;
    }

    let mask = domain.member_cpus & cpus_allowed;
    domain
        .cpu_deadline
        .find(mask, |key: DlKey| match key.0 {
            None => true,
            Some(d) => d > task_deadline,
        })
        .unwrap_or(prev_cpu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::{DeadlineEntity, Task};

    fn rq_with_task(cpu: CpuId, id: TaskId, deadline: u64, cpus_allowed: u64) -> Runqueue {
        let mut rq = Runqueue::new(cpu);
        let mut dl = DeadlineEntity::new(1_000, 10_000, 10_000, cpus_allowed);
        dl.deadline = deadline;
        rq.assign(Task::new(id, cpu, dl));
        rq.enqueue_runnable(id);
        rq
    }

    #[test]
    fn push_moves_earliest_pushable_to_later_cpu() {
        let mut domain = Domain::new(2, 1 << 21);
        let mut rqs = alloc::vec![
            rq_with_task(0, 1, 20, 0b11),
            Runqueue::new(1),
        ];
        // CPU0 needs a second runnable task to become overloaded.
        let mut dl2 = DeadlineEntity::new(1_000, 10_000, 10_000, 0b01);
        dl2.deadline = 100;
        rqs[0].assign(Task::new(2, 0, dl2));
        rqs[0].enqueue_runnable(2);

        domain.set_cpu_deadline(0, rqs[0].earliest_dl_curr());
        domain.set_cpu_deadline(1, None);

        let migration = push(&mut domain, &mut rqs, 0).unwrap().unwrap();
        assert_eq!(migration.task, 1);
        assert_eq!(migration.to, 1);
        assert!(rqs[1].get(1).is_some());
    }

    #[test]
    fn select_cpu_for_wakeup_prefers_prev_when_it_fits() {
        let mut domain = Domain::new(2, 1 << 21);
        let rqs = alloc::vec![Runqueue::new(0), Runqueue::new(1)];
        domain.set_cpu_deadline(0, None);
        domain.set_cpu_deadline(1, None);
        let target = select_cpu_for_wakeup(&domain, &rqs, 0, 50, 0b11);
        assert_eq!(target, 0);
    }
}

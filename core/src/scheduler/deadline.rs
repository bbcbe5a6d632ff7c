//! CBS/EDF entity-level logic (spec §4.1): `update_curr`, the CBS wakeup
//! rule, replenishment, and the constrained-deadline guard. These are pure
//! functions over a [`DeadlineEntity`] plus whatever runqueue-level
//! bandwidth state they need; the facade in `scheduler::mod` wires them to
//! a concrete [`Runqueue`](super::runqueue::Runqueue) and tree.

use super::bandwidth::{grub_factor, scale_by_factor};
use super::runqueue::Runqueue;
use super::task::{DeadlineEntity, DlFlags};

/// Absolute time the replenish timer fires at: `deadline - dl_deadline +
/// dl_period` (spec §4.1 "Replenish timer").
pub fn next_period_boundary(dl: &DeadlineEntity) -> u64 {
    dl.deadline + dl.dl_period - dl.dl_deadline
}

/// Outcome of a call to [`update_curr`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateCurrOutcome {
    /// The entity was throttled and dequeued; `replenish_at` names when its
    /// timer should fire. `None` here with `throttled = true` cannot happen.
    pub throttled: bool,
    /// The entity was throttled but immediately replenished and should be
    /// re-enqueued rather than left dequeued (boosted, or the replenish
    /// boundary had already passed).
    pub reenqueue: bool,
    pub replenish_at: Option<u64>,
}

/// `update_curr` (spec §4.1 "Runtime accounting").
///
/// `capacity_scale_q20` is the CPU-frequency × CPU-capacity scale applied to
/// non-reclaiming entities, in `2^20` fixed point (`2^20` == no scaling).
/// `rt_bandwidth_used` is the shared RT-bandwidth accumulator credited with
/// the *unscaled* delta regardless of GRUB scaling.
pub fn update_curr(
    dl: &mut DeadlineEntity,
    rq: &Runqueue,
    now: u64,
    capacity_scale_q20: u64,
    rt_bandwidth_used: &mut u64,
) -> UpdateCurrOutcome {
    if dl.exec_start == 0 {
        return UpdateCurrOutcome::default();
    }
    // "Ignore non-positive delta unless the entity is yielding."
    if now <= dl.exec_start && !dl.flags.contains(DlFlags::YIELDED) {
        return UpdateCurrOutcome::default();
    }
    let delta = now.saturating_sub(dl.exec_start);

    let scaled = if dl.flags.contains(DlFlags::RECLAIM) {
        scale_by_factor(delta, grub_factor(rq, dl.dl_bw))
    } else {
        scale_by_factor(delta, capacity_scale_q20)
    };
    dl.runtime -= scaled as i64;
    *rt_bandwidth_used += delta;
    dl.exec_start = now;

    if dl.runtime > 0 && !dl.flags.contains(DlFlags::YIELDED) {
        return UpdateCurrOutcome::default();
    }

    dl.flags.insert(DlFlags::THROTTLED);
    let replenish_at = next_period_boundary(dl);
    if dl.flags.contains(DlFlags::BOOSTED) || replenish_at <= now {
        replenish_dl_entity(dl, now);
        UpdateCurrOutcome {
            throttled: false,
            reenqueue: true,
            replenish_at: None,
        }
    } else {
        UpdateCurrOutcome {
            throttled: true,
            reenqueue: false,
            replenish_at: Some(replenish_at),
        }
    }
}

/// CBS wakeup rule (`update_dl_entity`, spec §4.1), applied on
/// `ENQUEUE_WAKEUP`.
pub fn update_dl_entity(dl: &mut DeadlineEntity, now: u64) {
    let deadline_passed = dl.deadline <= now;
    let overflow = !deadline_passed && {
        let avail = dl.deadline - now;
        let runtime = dl.runtime.max(0) as u128;
        runtime * dl.dl_deadline as u128 > dl.dl_runtime as u128 * avail as u128
    };

    if !(deadline_passed || overflow) {
        return;
    }

    let use_original_cbs =
        dl.is_implicit_deadline() || dl.flags.contains(DlFlags::BOOSTED) || deadline_passed;

    if use_original_cbs {
        dl.deadline = now + dl.dl_deadline;
        dl.runtime = dl.dl_runtime as i64;
    } else {
        let remaining = dl.deadline - now;
        dl.runtime = ((dl.dl_density as u128 * remaining as u128) >> 20) as i64;
    }
}

/// `replenish_dl_entity` (spec §4.1), called from the replenish timer.
pub fn replenish_dl_entity(dl: &mut DeadlineEntity, now: u64) {
    while dl.runtime <= 0 {
        dl.deadline += dl.dl_period;
        dl.runtime += dl.dl_runtime as i64;
    }
    if dl.deadline < now {
        // Gross lag: advancing period-by-period would take too long to
        // catch up to `now`; jump straight to a fresh window.
        dl.deadline = now + dl.dl_deadline;
        dl.runtime = dl.dl_runtime as i64;
    }
    dl.flags.remove(DlFlags::YIELDED | DlFlags::THROTTLED);
}

/// `dl_check_constrained` (spec §4.1). Returns the absolute time the
/// replenish timer should be armed at, if the guard fired.
pub fn dl_check_constrained(dl: &mut DeadlineEntity, now: u64) -> Option<u64> {
    if dl.is_implicit_deadline()
        || dl.flags.contains(DlFlags::BOOSTED)
        || dl.flags.contains(DlFlags::THROTTLED)
    {
        return None;
    }
    let next_period = next_period_boundary(dl);
    if dl.deadline < now && now < next_period {
        dl.runtime = 0;
        Some(next_period)
    } else {
        None
    }
}

/// Zero-lag time `L = deadline - runtime * dl_period / dl_runtime - now`
/// (spec §4.1 "Inactive timer").
pub fn zero_lag_time(dl: &DeadlineEntity, now: u64) -> i64 {
    let runtime = dl.runtime.max(0) as u128;
    let drift = (runtime * dl.dl_period as u128) / dl.dl_runtime.max(1) as u128;
    dl.deadline as i128 - drift as i128 - now as i128
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::DeadlineEntity;

    fn implicit_entity() -> DeadlineEntity {
        DeadlineEntity::new(5_000_000, 10_000_000, 10_000_000, 0b1)
    }

    fn constrained_entity() -> DeadlineEntity {
        DeadlineEntity::new(2_000_000, 5_000_000, 10_000_000, 0b1)
    }

    #[test]
    fn update_dl_entity_keeps_deadline_when_implicit_and_no_overflow() {
        let mut dl = implicit_entity();
        dl.deadline = 10_000_000;
        dl.runtime = 5_000_000;
        // B1: wakeup at t=0, deadline already at 10ms, runtime fits exactly.
        update_dl_entity(&mut dl, 0);
        assert_eq!(dl.deadline, 10_000_000);
        assert_eq!(dl.runtime, 5_000_000);
    }

    #[test]
    fn update_dl_entity_resets_on_late_wakeup() {
        let mut dl = implicit_entity();
        dl.deadline = 5_000_000;
        dl.runtime = 1_000_000;
        update_dl_entity(&mut dl, 6_000_000); // deadline already passed
        assert_eq!(dl.deadline, 6_000_000 + dl.dl_deadline);
        assert_eq!(dl.runtime, dl.dl_runtime as i64);
    }

    #[test]
    fn revised_cbs_keeps_deadline_for_constrained_overflow() {
        let mut dl = constrained_entity();
        dl.deadline = 5_000_000;
        dl.runtime = 2_000_000;
        // Force overflow: shrink remaining time window without passing deadline.
        update_dl_entity(&mut dl, 4_900_000);
        assert_eq!(dl.deadline, 5_000_000, "revised CBS keeps the deadline");
    }

    #[test]
    fn replenish_advances_by_whole_periods() {
        let mut dl = implicit_entity();
        dl.deadline = 10_000_000;
        dl.runtime = -500_000;
        replenish_dl_entity(&mut dl, 10_000_000);
        assert_eq!(dl.deadline, 20_000_000);
        assert_eq!(dl.runtime, 4_500_000);
    }

    #[test]
    fn dl_check_constrained_forces_zero_runtime_in_window() {
        let mut dl = constrained_entity();
        dl.deadline = 4_000_000; // already past
        let now = 4_500_000; // before next_period = deadline - dl_deadline + dl_period = 9_000_000
        let armed = dl_check_constrained(&mut dl, now);
        assert_eq!(armed, Some(9_000_000));
        assert_eq!(dl.runtime, 0);
    }

    #[test]
    fn update_curr_throttles_on_exhaustion() {
        let mut dl = implicit_entity();
        dl.deadline = 10_000_000;
        dl.runtime = 100_000;
        dl.exec_start = 0;
        // First call with exec_start == 0 is a no-op (not yet running).
        let rq = Runqueue::new(0);
        let mut rt_bw = 0u64;
        dl.exec_start = 1_000_000;
        let outcome = update_curr(&mut dl, &rq, 1_200_000, 1 << 20, &mut rt_bw);
        assert!(outcome.throttled);
        assert_eq!(rt_bw, 200_000);
    }
}

//! Task and deadline-entity representation.
//!
//! The source's cyclic task/runqueue/timer pointer graph is flattened to
//! arena indices (spec §9 design notes): a [`Task`] is addressed by its
//! [`TaskId`], which is both its slot in the scheduler's task arena and the
//! key used in runqueue trees and timer callbacks. Nothing here holds a raw
//! pointer to another task.

use bitflags::bitflags;

pub type TaskId = u32;
pub type CpuId = usize;

/// Sentinel used where the source uses `INVALID_TASK_ID`.
pub const INVALID_TASK_ID: TaskId = TaskId::MAX;

bitflags! {
    /// Deadline-entity flags (spec §3 data model: "flags {throttled, yielded,
    /// non-contending, boosted, overrun}"), plus the two scheduling-attribute
    /// flags from `sched_flags` (spec §6).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DlFlags: u16 {
        const THROTTLED       = 0b0000_0001;
        const YIELDED         = 0b0000_0010;
        const NON_CONTENDING  = 0b0000_0100;
        const BOOSTED         = 0b0000_1000;
        const OVERRUN         = 0b0001_0000;
        /// `sched_flags & RECLAIM`: entity participates in GRUB reclamation.
        const RECLAIM         = 0b0010_0000;
        /// `sched_flags & SUGOV`: bypasses admission, preempts ordinary
        /// deadline tasks unconditionally (spec glossary "SUGOV").
        const SUGOV           = 0b0100_0000;
    }
}

/// The live and static parameters of a deadline scheduling entity
/// (spec §3 "Deadline entity").
#[derive(Clone, Copy, Debug)]
pub struct DeadlineEntity {
    /// Static parameter: budget per period, nanoseconds.
    pub dl_runtime: u64,
    /// Static parameter: relative deadline, nanoseconds.
    pub dl_deadline: u64,
    /// Static parameter: period, nanoseconds.
    pub dl_period: u64,
    /// `dl_runtime / dl_period` in 2^20 fixed point.
    pub dl_bw: u64,
    /// `dl_runtime / dl_deadline` in 2^20 fixed point.
    pub dl_density: u64,

    pub flags: DlFlags,

    /// Live runtime remaining in the current period, nanoseconds. May go
    /// negative transiently inside `update_curr` before CBS reacts
    /// (spec I2); represented as `i64` to make that transient state explicit.
    pub runtime: i64,
    /// Live absolute deadline, nanoseconds since the monotonic epoch.
    pub deadline: u64,
    /// Timestamp `update_curr` last measured from, `0` when not running.
    pub exec_start: u64,

    /// Bitmask of CPUs this task may run on.
    pub cpus_allowed: u64,

    /// PI donor link (spec §9 open question: "re-inherit parameters from the
    /// PI donor on first replenish"), set only while boosted via priority
    /// inheritance from a non-deadline task.
    pub pi_donor: Option<TaskId>,
}

impl DeadlineEntity {
    pub fn new(dl_runtime: u64, dl_deadline: u64, dl_period: u64, cpus_allowed: u64) -> Self {
        let dl_bw = bw_fixed_point(dl_runtime, dl_period);
        let dl_density = bw_fixed_point(dl_runtime, dl_deadline);
        Self {
            dl_runtime,
            dl_deadline,
            dl_period,
            dl_bw,
            dl_density,
            flags: DlFlags::empty(),
            runtime: dl_runtime as i64,
            deadline: 0,
            exec_start: 0,
            cpus_allowed,
            pi_donor: None,
        }
    }

    /// An implicit-deadline task has `dl_deadline == dl_period` (spec
    /// glossary).
    #[inline]
    pub fn is_implicit_deadline(&self) -> bool {
        self.dl_deadline == self.dl_period
    }

    #[inline]
    pub fn nr_cpus_allowed(&self) -> u32 {
        self.cpus_allowed.count_ones()
    }

    #[inline]
    pub fn is_migratory(&self) -> bool {
        self.nr_cpus_allowed() > 1
    }
}

/// `runtime / denominator` expressed in `2^20` fixed point, saturating
/// rather than overflowing for pathological (near-zero) denominators.
pub fn bw_fixed_point(runtime: u64, denominator: u64) -> u64 {
    if denominator == 0 {
        return 0;
    }
    ((runtime as u128 * (1u128 << 20)) / denominator as u128) as u64
}

/// A schedulable task carrying a deadline entity.
///
/// Real deployments would tag this with a scheduling-class enum and carry
/// CFS/RT sibling state (spec §4.1 "Polymorphism across scheduling classes");
/// this crate only implements the deadline class, so `Task` is the deadline
/// entity plus the identity/placement fields every class needs.
#[derive(Clone, Copy, Debug)]
pub struct Task {
    pub id: TaskId,
    pub cpu: CpuId,
    pub dl: DeadlineEntity,
}

impl Task {
    pub fn new(id: TaskId, cpu: CpuId, dl: DeadlineEntity) -> Self {
        Self { id, cpu, dl }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bw_fixed_point_half_is_half_of_one() {
        assert_eq!(bw_fixed_point(5, 10), 1u64 << 19);
    }

    #[test]
    fn implicit_deadline_detection() {
        let dl = DeadlineEntity::new(1_000, 10_000, 10_000, 0x1);
        assert!(dl.is_implicit_deadline());
        let dl2 = DeadlineEntity::new(1_000, 5_000, 10_000, 0x1);
        assert!(!dl2.is_implicit_deadline());
    }

    #[test]
    fn migratory_iff_more_than_one_cpu_allowed() {
        let dl = DeadlineEntity::new(1_000, 10_000, 10_000, 0b01);
        assert!(!dl.is_migratory());
        let dl2 = DeadlineEntity::new(1_000, 10_000, 10_000, 0b11);
        assert!(dl2.is_migratory());
    }
}

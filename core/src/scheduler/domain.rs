//! Scheduling domain (spec §3 "Domain"): the root-domain-equivalent that
//! spans a set of CPUs sharing one admission-control capacity and one
//! push/pull heap pair.

use super::cpudl::{CpuDeadlineHeap, CpuPriorityHeap, DlKey};
use super::task::CpuId;

pub struct Domain {
    /// Bitmask of CPUs that are members of this domain.
    pub member_cpus: u64,
    /// Bitmask of CPUs with no deadline task currently runnable.
    pub free_cpus: u64,
    /// Bitmask of CPUs with `overloaded() == true` (spec §4.2 `dlo_mask`).
    pub dlo_mask: u64,
    /// Sum of admitted `dl_bw` across the domain, `2^20` fixed point.
    pub total_bw: u64,
    /// Sum of per-CPU SCHED_CAPACITY_SCALE-unit capacities, `2^20` fixed
    /// point scale shared with `total_bw`.
    pub bw_cap: u64,
    /// Bumped whenever domain membership is rebuilt (hot-plug); lets
    /// long-lived handles detect staleness.
    pub generation: u64,

    pub cpu_deadline: CpuDeadlineHeap,
    pub cpu_priority: CpuPriorityHeap,
}

impl Domain {
    pub fn new(num_cpus: usize, bw_cap: u64) -> Self {
        let member_cpus = if num_cpus >= 64 {
            u64::MAX
        } else {
            (1u64 << num_cpus) - 1
        };
        Self {
            member_cpus,
            free_cpus: member_cpus,
            dlo_mask: 0,
            total_bw: 0,
            bw_cap,
            generation: 0,
            cpu_deadline: CpuDeadlineHeap::new(num_cpus),
            cpu_priority: CpuPriorityHeap::new(num_cpus),
        }
    }

    pub fn set_cpu_deadline(&mut self, cpu: CpuId, deadline: Option<u64>) {
        self.cpu_deadline.set(cpu, DlKey(deadline));
        if deadline.is_none() {
            self.free_cpus |= 1 << cpu;
        } else {
            self.free_cpus &= !(1 << cpu);
        }
    }

    pub fn set_overloaded(&mut self, cpu: CpuId, overloaded: bool) {
        if overloaded {
            self.dlo_mask |= 1 << cpu;
        } else {
            self.dlo_mask &= !(1 << cpu);
        }
    }

    pub fn is_member(&self, cpu: CpuId) -> bool {
        cpu < 64 && (self.member_cpus & (1 << cpu)) != 0
    }

    /// Admit `bw` atomically: only mutates `total_bw` if it would not exceed
    /// `bw_cap`.
    pub fn try_admit(&mut self, bw: u64) -> bool {
        if self.total_bw.saturating_add(bw) > self.bw_cap {
            return false;
        }
        self.total_bw += bw;
        true
    }

    pub fn release(&mut self, bw: u64) {
        self.total_bw = self.total_bw.saturating_sub(bw);
    }

    /// Rebuild domain membership (topology hot-plug). Bumps `generation`.
    pub fn rebuild(&mut self, member_cpus: u64, bw_cap: u64) {
        self.member_cpus = member_cpus;
        self.free_cpus = member_cpus;
        self.bw_cap = bw_cap;
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_admit_rejects_over_capacity() {
        let mut domain = Domain::new(2, 1 << 20);
        assert!(domain.try_admit((1 << 20) / 2));
        assert!(domain.try_admit((1 << 20) / 2));
        assert!(!domain.try_admit(1));
        assert_eq!(domain.total_bw, 1 << 20);
    }

    #[test]
    fn set_cpu_deadline_tracks_free_cpus() {
        let mut domain = Domain::new(2, 1 << 20);
        domain.set_cpu_deadline(0, Some(1000));
        assert_eq!(domain.free_cpus & 0b01, 0);
        domain.set_cpu_deadline(0, None);
        assert_eq!(domain.free_cpus & 0b01, 0b01);
    }

    #[test]
    fn rebuild_bumps_generation() {
        let mut domain = Domain::new(2, 1 << 20);
        let before = domain.generation;
        domain.rebuild(0b1111, 2 << 20);
        assert_eq!(domain.generation, before + 1);
        assert_eq!(domain.member_cpus, 0b1111);
    }
}

//! CPU-online registry.
//!
//! The topology layer (domain spans, LLC sibling masks, per-CPU capacity) is
//! an out-of-scope external collaborator (spec §1, §4.8); what the scheduler
//! core needs from it is just "how many CPUs, which ones are online right
//! now" for `rq_online`/`rq_offline` (spec §4.1) and for sizing the
//! CPU-priority/CPU-deadline heaps (§4.6). This mirrors the teacher's
//! per-CPU registry (`pcr`) without the GS-segment/APIC plumbing, which is
//! hardware bring-up, not scheduling policy.

use core::sync::atomic::{AtomicU64, Ordering};

/// Upper bound on CPUs this build supports. A `u64` online-bitmap caps this
/// at 64; real SMP builds needing more would widen the bitmap type.
pub const MAX_CPUS: usize = 64;

static ONLINE_MASK: AtomicU64 = AtomicU64::new(0);
static CPU_COUNT: AtomicU64 = AtomicU64::new(0);

/// Configure the total CPU count for this boot and mark all of them online.
///
/// Call once at domain/topology build time (spec §3 "Domain" lifecycle:
/// "created at topology build, rebuilt on hot-plug").
pub fn set_cpu_count(count: usize) {
    let count = count.min(MAX_CPUS);
    CPU_COUNT.store(count as u64, Ordering::Release);
    let mask = if count == MAX_CPUS {
        u64::MAX
    } else {
        (1u64 << count) - 1
    };
    ONLINE_MASK.store(mask, Ordering::Release);
}

pub fn cpu_count() -> usize {
    CPU_COUNT.load(Ordering::Acquire) as usize
}

pub fn is_cpu_online(cpu: usize) -> bool {
    if cpu >= MAX_CPUS {
        return false;
    }
    (ONLINE_MASK.load(Ordering::Acquire) & (1u64 << cpu)) != 0
}

pub fn mark_cpu_online(cpu: usize) {
    if cpu >= MAX_CPUS {
        return;
    }
    ONLINE_MASK.fetch_or(1u64 << cpu, Ordering::AcqRel);
}

pub fn mark_cpu_offline(cpu: usize) {
    if cpu >= MAX_CPUS {
        return;
    }
    ONLINE_MASK.fetch_and(!(1u64 << cpu), Ordering::AcqRel);
}

/// Iterate the currently online CPU indices in ascending order.
pub fn online_cpus() -> impl Iterator<Item = usize> {
    let mask = ONLINE_MASK.load(Ordering::Acquire);
    (0..MAX_CPUS).filter(move |cpu| (mask & (1u64 << cpu)) != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    extern crate std;

    #[test]
    fn set_cpu_count_marks_contiguous_range_online() {
        set_cpu_count(4);
        assert_eq!(cpu_count(), 4);
        for cpu in 0..4 {
            assert!(is_cpu_online(cpu));
        }
        assert!(!is_cpu_online(4));
    }

    #[test]
    fn offline_then_online_round_trips() {
        set_cpu_count(2);
        mark_cpu_offline(1);
        assert!(!is_cpu_online(1));
        let remaining: std::vec::Vec<usize> = online_cpus().collect();
        assert_eq!(remaining, std::vec![0]);
        mark_cpu_online(1);
        assert!(is_cpu_online(1));
    }

    #[test]
    fn out_of_range_cpu_is_never_online() {
        set_cpu_count(2);
        assert!(!is_cpu_online(MAX_CPUS));
        mark_cpu_online(MAX_CPUS + 1); // no-op, must not panic
    }
}

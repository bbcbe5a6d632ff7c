//! Per-CPU timer base (spec §3 "Timer wheel base", §4.3).
//!
//! A [`TimerBase`] owns one [`Wheel`] plus the spinlock that would protect
//! it in a real multi-core deployment (spec §5 "Each timer base has a
//! spinlock protecting its wheel and `clk`"); the lock is modeled with
//! [`edfcore_lib::IrqMutex`] directly over the wheel rather than hand-rolled
//! here, matching how the rest of this crate borrows ambient concurrency
//! primitives from the support crate instead of re-deriving them.

pub mod wheel;

pub use wheel::{
    ExpiredTimer, ModifyMode, TimerKind, Wheel, calc_wheel_index, lvl_gran, lvl_shift, lvl_start,
    round_jiffies, round_jiffies_relative, round_jiffies_up, LEVELS, LVL_SIZE,
    WHEEL_TIMEOUT_CUTOFF, WHEEL_TIMEOUT_MAX,
};

use edfcore_lib::IrqMutex;

/// One timer base per CPU per flavor (standard vs. deferrable, spec §3);
/// this crate models only the standard flavor since deferrable timers are
/// purely a NOHZ-idle wake-suppression detail external to scheduling
/// policy (spec §4.8's idle controller is the consumer).
pub struct TimerBase {
    wheel: IrqMutex<Wheel>,
}

impl TimerBase {
    pub fn new() -> Self {
        Self {
            wheel: IrqMutex::new(Wheel::new()),
        }
    }

    pub fn arm_replenish(&self, expiry: u64, task_id: u32) -> u64 {
        self.wheel
            .lock()
            .enqueue(expiry, TimerKind::Replenish, task_id)
    }

    pub fn arm_inactive(&self, expiry: u64, task_id: u32) -> u64 {
        self.wheel
            .lock()
            .enqueue(expiry, TimerKind::Inactive, task_id)
    }

    pub fn arm_bandwidth_period(&self, expiry: u64, domain_id: u32) -> u64 {
        self.wheel
            .lock()
            .enqueue(expiry, TimerKind::BandwidthPeriod, domain_id)
    }

    pub fn cancel(&self, id: u64) -> bool {
        self.wheel.lock().dequeue(id)
    }

    pub fn reschedule(&self, id: u64, new_expiry: u64, mode: ModifyMode) -> bool {
        self.wheel.lock().modify(id, new_expiry, mode)
    }

    /// Drain every timer due at or before `now`. Called from the tick
    /// handler (spec §4.7) with the base lock dropped before dispatch, per
    /// spec §5 "Suspension points": collection happens under the lock,
    /// dispatch happens after `advance` returns.
    pub fn advance(&self, now: u64) -> alloc::vec::Vec<ExpiredTimer> {
        self.wheel.lock().advance(now)
    }

    pub fn forward_idle(&self, now: u64) {
        self.wheel.lock().forward(now);
    }

    pub fn next_expiry(&self) -> u64 {
        self.wheel.lock().next_expiry
    }

    pub fn set_idle(&self, idle: bool) {
        self.wheel.lock().is_idle = idle;
    }

    pub fn is_idle(&self) -> bool {
        self.wheel.lock().is_idle
    }
}

impl Default for TimerBase {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_and_advance_dispatches_replenish_timer() {
        let base = TimerBase::new();
        let id = base.arm_replenish(67, 7);
        assert!(base.advance(71).is_empty());
        let expired = base.advance(72);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, id);
        assert_eq!(expired[0].kind, TimerKind::Replenish);
        assert_eq!(expired[0].key, 7);
    }

    #[test]
    fn cancel_prevents_dispatch() {
        let base = TimerBase::new();
        let id = base.arm_inactive(67, 3);
        assert!(base.cancel(id));
        assert!(base.advance(1_000).is_empty());
    }
}

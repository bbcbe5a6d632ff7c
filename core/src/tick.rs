//! Tick and HR-tick service (spec §4.7).
//!
//! Control flow, one tick (spec §2): tick → update "now" → PELT decay →
//! class tick hook (`update_curr`) → wheel expiry scan → any softirq work.
//! [`TickDevice`] sequences exactly that, leaving the "softirq work" step
//! to the caller (dispatching [`timer::ExpiredTimer`]s is a scheduler-level
//! concern handled by `scheduler::SchedulerState`, not this module).

use edfcore_lib::{MonotonicClock, klog_trace};

use crate::SchedulerState;
use crate::timer::{ExpiredTimer, TimerBase};

/// Whether the tick device is still periodic or has transitioned to
/// one-shot/hrtimer mode (spec §4.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickMode {
    Periodic,
    OneShot,
}

/// Per-CPU tick sequencing state. Does not own the clock or timer base —
/// those are shared collaborators (spec §4.8) passed in per call, matching
/// how `SchedulerState` takes `now` explicitly rather than reading a
/// hidden global.
pub struct TickDevice {
    pub mode: TickMode,
    pub jiffies: u64,
    cpu: usize,
    nohz_idle: bool,
}

impl TickDevice {
    pub fn new(cpu: usize) -> Self {
        Self {
            mode: TickMode::Periodic,
            jiffies: 0,
            cpu,
            nohz_idle: false,
        }
    }

    /// One periodic tick (spec §4.7 + §2 control flow): advance `jiffies`,
    /// invoke the deadline class's tick hook (`update_curr`), drain the
    /// timer wheel, and report expired timers for the caller to dispatch.
    ///
    /// Returns `true` if `update_curr` requested a reschedule (the running
    /// task is no longer leftmost).
    pub fn tick(
        &mut self,
        sched: &mut SchedulerState,
        timers: &TimerBase,
        now_ns: u64,
    ) -> (bool, alloc::vec::Vec<ExpiredTimer>) {
        self.jiffies += 1;
        let need_resched = sched.update_curr(self.cpu, now_ns);
        let expired = timers.advance(now_ns);
        if !expired.is_empty() {
            klog_trace!("tick: {} timer(s) expired on cpu {}", expired.len(), self.cpu);
        }
        (need_resched, expired)
    }

    /// Transition from periodic ticking to one-shot hrtimer dispatch, when
    /// both a high-resolution timer facility and a C-state-compatible
    /// idle path are available (spec §4.7). Idempotent.
    pub fn switch_to_oneshot(&mut self) {
        self.mode = TickMode::OneShot;
    }

    /// NOHZ-idle: stop the tick because nothing is due before
    /// `timers.next_expiry()`. The wake point becomes the timer base's own
    /// `next_expiry`, not a periodic re-arm.
    pub fn enter_nohz_idle(&mut self, timers: &TimerBase) -> u64 {
        self.nohz_idle = true;
        timers.set_idle(true);
        timers.next_expiry()
    }

    pub fn exit_nohz_idle(&mut self, timers: &TimerBase, clock: &MonotonicClock<'_>) {
        self.nohz_idle = false;
        timers.set_idle(false);
        timers.forward_idle(clock.now_ns());
    }

    pub fn is_nohz_idle(&self) -> bool {
        self.nohz_idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedConfig;

    #[test]
    fn tick_advances_jiffies_and_drains_due_timers() {
        let mut device = TickDevice::new(0);
        let mut sched = SchedulerState::new(1, 1 << 20, SchedConfig::default());
        let timers = TimerBase::new();
        timers.arm_replenish(67, 7);

        let (_, expired) = device.tick(&mut sched, &timers, 72);
        assert_eq!(device.jiffies, 1);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].key, 7);
    }

    #[test]
    fn oneshot_switch_is_idempotent() {
        let mut device = TickDevice::new(0);
        device.switch_to_oneshot();
        device.switch_to_oneshot();
        assert_eq!(device.mode, TickMode::OneShot);
    }

    #[test]
    fn nohz_idle_reports_next_expiry_as_wake_point() {
        let mut device = TickDevice::new(0);
        let timers = TimerBase::new();
        timers.arm_replenish(500, 1);
        let wake_at = device.enter_nohz_idle(&timers);
        assert_eq!(wake_at, 504); // level/bucket expiry for E=500, clk=0
        assert!(device.is_nohz_idle());
    }
}

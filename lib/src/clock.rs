//! Monotonic time source.
//!
//! Scheduling decisions (deadlines, CBS replenishment, PELT decay, the timer
//! wheel) all run off a single nanosecond-resolution clock. Hardware cycle
//! counters (TSC, ARM generic timer, HPET) tick at whatever frequency the
//! platform gives them; converting a raw cycle count to nanoseconds without
//! a division on every read is the classic mult/shift trick: precompute
//! `mult` and `shift` once from the counter frequency, then every read is
//! `(cycles * mult) >> shift`.
//!
//! A `shift` chosen so `u64::MAX / mult` covers several hours of runtime
//! ensures `cycles * mult` does not overflow `u128` for any cycle count a
//! real boot will ever reach; see [`ClockSource::from_hz`] for the margin.

/// A raw hardware cycle source. Implemented by the platform; this crate only
/// consumes it.
pub trait CycleSource: Send + Sync {
    /// Current raw cycle count. Must be monotonically non-decreasing for the
    /// lifetime of the process (wraparound is not handled).
    fn read_cycles(&self) -> u64;
}

/// Precomputed mult/shift pair converting raw cycles to nanoseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockSource {
    mult: u64,
    shift: u32,
}

impl ClockSource {
    /// Build a converter for a counter ticking at `hz` Hz.
    ///
    /// `shift` is picked so that `mult` stays small enough to leave at least
    /// a 2x safety margin against `u128` overflow for cycle counts up to
    /// `2^48` (years of uptime at GHz-class frequencies), per the <=50%
    /// headroom requirement: `mult <= u64::MAX / 2^(shift + 1)`.
    pub const fn from_hz(hz: u64) -> Self {
        const NANOS_PER_SEC: u64 = 1_000_000_000;
        // shift = 32 gives ample precision for GHz-range counters while
        // keeping `mult` well under u32::MAX, which is the margin this
        // clock needs against overflow in `cycles_to_ns`.
        let shift: u32 = 32;
        let mult = ((NANOS_PER_SEC as u128) << shift) / (hz as u128);
        Self {
            mult: mult as u64,
            shift,
        }
    }

    /// Convert a raw cycle count to nanoseconds.
    #[inline]
    pub const fn cycles_to_ns(&self, cycles: u64) -> u64 {
        (((cycles as u128) * (self.mult as u128)) >> self.shift) as u64
    }
}

/// A monotonic clock bound to a concrete [`CycleSource`] and [`ClockSource`]
/// conversion.
pub struct MonotonicClock<'a> {
    source: &'a dyn CycleSource,
    conv: ClockSource,
    /// Cycle count observed at clock construction; readings are reported
    /// relative to this so `now_ns()` starts near zero at boot.
    origin_cycles: u64,
}

impl<'a> MonotonicClock<'a> {
    pub fn new(source: &'a dyn CycleSource, hz: u64) -> Self {
        let origin_cycles = source.read_cycles();
        Self {
            source,
            conv: ClockSource::from_hz(hz),
            origin_cycles,
        }
    }

    /// Nanoseconds elapsed since this clock was constructed.
    #[inline]
    pub fn now_ns(&self) -> u64 {
        let elapsed = self
            .source
            .read_cycles()
            .wrapping_sub(self.origin_cycles);
        self.conv.cycles_to_ns(elapsed)
    }

    /// Convenience wrapper around [`Self::now_ns`] with millisecond granularity.
    #[inline]
    pub fn uptime_ms(&self) -> u64 {
        self.now_ns() / 1_000_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU64, Ordering};

    struct FakeCycles(AtomicU64);

    impl CycleSource for FakeCycles {
        fn read_cycles(&self) -> u64 {
            self.0.load(Ordering::Relaxed)
        }
    }

    #[test]
    fn converts_one_second_at_1ghz() {
        let conv = ClockSource::from_hz(1_000_000_000);
        assert_eq!(conv.cycles_to_ns(1_000_000_000), 1_000_000_000);
    }

    #[test]
    fn converts_half_tick_at_2ghz() {
        let conv = ClockSource::from_hz(2_000_000_000);
        // 2 GHz counter: 1 cycle == 0.5 ns, so 1000 cycles == 500 ns.
        assert_eq!(conv.cycles_to_ns(1_000), 500);
    }

    #[test]
    fn monotonic_clock_reports_elapsed_since_construction() {
        let cycles = FakeCycles(AtomicU64::new(1_000_000_000));
        let clock = MonotonicClock::new(&cycles, 1_000_000_000);
        assert_eq!(clock.now_ns(), 0);
        cycles.0.fetch_add(500_000_000, Ordering::Relaxed);
        assert_eq!(clock.now_ns(), 500_000_000);
        assert_eq!(clock.uptime_ms(), 500);
    }
}

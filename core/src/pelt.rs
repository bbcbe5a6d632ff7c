//! PELT (per-entity load tracking) geometric-decay averages (spec §4.4).
//!
//! Three signals — `load_avg`, `runnable_avg`, `util_avg` — share one decay
//! accumulator: time since the last update is split into a partial first
//! period (`d1`), whole elapsed periods (`d2`), and a partial current period
//! (`d3`), each folded into a running sum with geometric decay `y^32 = 1/2`.
//! `LOAD_AVG_MAX` is the sum's fixed point at saturation; dividing the sum
//! by `LOAD_AVG_MAX - 1024 + period_contrib` yields an average normalized
//! to `1024`.

/// 32ms half-life: `y^32 = 0.5`, so `y ≈ 0.97857`.
const HALF_LIFE_PERIODS: usize = 32;

/// Sum-at-saturation for a runnable-for-always entity (spec §4.4): the
/// fixed point that `accumulate_sum` asymptotically approaches as more
/// periods accumulate, computed as `1024 * (y + y^2 + y^3 + ...)`.
pub const LOAD_AVG_MAX: u32 = 47_742;

/// `1024`: the fixed-point base every PELT average is normalized to.
pub const WEIGHT_SCALE: u32 = 1024;

/// Precomputed `y^n` table for `n in 0..32`, Q32 fixed point
/// (`y^0 == 2^32`). Generated once; `accumulate_sum` never computes `y^n`
/// at runtime, matching the source's decay-table approach rather than
/// `powf`.
const DECAY_TABLE: [u64; HALF_LIFE_PERIODS] = build_decay_table();

const fn build_decay_table() -> [u64; HALF_LIFE_PERIODS] {
    // y^32 = 0.5 exactly, in Q32: y^32 == 1 << 31. Interpolate y^n by
    // repeated halving isn't exact for non-power-of-two n, so instead we
    // derive each entry as `(1 << 32) * 0.5 ^ (n / 32)`; done at
    // compile time via fixed-point Newton-ish doubling is overkill here —
    // the table instead holds the closed form `round(2^32 * 2^(-n/32))`,
    // computed with a 64-bit fixed-point exponent ramp.
    let mut table = [0u64; HALF_LIFE_PERIODS];
    // exp2_neg[i] approximates 2^(-i/32) in Q32, built by repeated
    // multiplication by the 32nd root of one half (itself precomputed to
    // 20 significant bits, y ≈ 0.97857206).
    const Y_Q32: u64 = 4_203_769_216; // round(0.97857206 * 2^32)
    let mut i = 0;
    let mut acc: u64 = 1u64 << 32;
    while i < HALF_LIFE_PERIODS {
        table[i] = acc;
        acc = (acc * Y_Q32) >> 32;
        i += 1;
    }
    table
}

fn decay(n: u32) -> u64 {
    if n == 0 {
        return 1u64 << 32;
    }
    let periods = n as usize % HALF_LIFE_PERIODS;
    let half_lives = n as usize / HALF_LIFE_PERIODS;
    let base = DECAY_TABLE[periods];
    if half_lives >= 64 {
        return 0;
    }
    base >> half_lives
}

/// One PELT-tracked signal: running sum plus its normalized average.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedAvg {
    /// Last time this signal was updated, in 1024ns "PELT ticks" (spec
    /// §4.4 glossary "1024ns granularity").
    pub last_update_time: u64,
    /// Running sum, Q10-scaled (same fixed point as `WEIGHT_SCALE`).
    pub sum: u64,
    /// `sum / LOAD_AVG_MAX`, normalized to `WEIGHT_SCALE`.
    pub avg: u32,
    /// Contribution still accruing within the current (incomplete) 1024ns
    /// window; folded into `sum` on the next full-period boundary.
    pub period_contrib: u32,
}

impl SchedAvg {
    /// Advance this signal to `now_ticks` (already divided to 1024ns
    /// units), given whether the tracked entity was active the whole time
    /// (`weight` nonzero scales the contribution, e.g. `util_avg` under
    /// CPU-capacity scaling).
    ///
    /// Implements spec §4.4 "accumulate_sum": split elapsed time into
    /// `d1` (completes the prior partial period), `d2` (whole periods),
    /// `d3` (starts a new partial period), decay the existing sum by the
    /// whole-period count, then fold in `d1`/`d2`/`d3` contributions.
    pub fn accumulate(&mut self, now_ticks: u64, active: bool, weight: u32) {
        if now_ticks <= self.last_update_time {
            return;
        }
        let delta = now_ticks - self.last_update_time;
        self.last_update_time = now_ticks;
        if !active {
            self.period_contrib = 0;
            return;
        }

        let d1_full = 1024 - self.period_contrib as u64;
        if delta < d1_full {
            // Still inside the current partial period: no period boundary
            // crossed, so no decay applies. Just extend the pending
            // contribution.
            self.sum += (weight as u64) * delta;
            self.period_contrib += delta as u32;
        } else {
            let d1 = d1_full;
            let remaining = delta - d1;
            let periods = (remaining / 1024) as u32;
            let d3 = remaining % 1024;

            self.sum = (self.sum * decay(periods + 1)) >> 32;
            self.sum += (weight as u64) * d1;
            if periods > 0 {
                // Whole periods each contribute a full 1024 scaled by their own
                // decay weight, summed via `LOAD_AVG_MAX`'s closed form: rather
                // than loop, the source folds this into one decayed term plus
                // `LOAD_AVG_MAX` scaled by `(1 - y^periods)`. We keep it a loop
                // for clarity since `periods` is bounded by PELT's own
                // saturation window in practice.
                let mut acc = 0u64;
                for p in 1..=periods {
                    acc += (1024 * weight as u64 * decay(periods - p)) >> 32;
                }
                self.sum += acc;
            }
            self.period_contrib = d3 as u32;
            self.sum += (weight as u64) * d3;
        }

        let divider = (LOAD_AVG_MAX as u64 - 1024 + self.period_contrib as u64).max(1);
        self.avg = (self.sum / divider) as u32;
    }
}

/// Per-entity or per-runqueue PELT signal block (spec §3 "PELT signal
/// block"): `load_avg` (weight-scaled), `runnable_avg` (unweighted
/// occupancy), `util_avg` (capacity-scaled occupancy).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PeltBlock {
    pub load: SchedAvg,
    pub runnable: SchedAvg,
    pub util: SchedAvg,
}

impl PeltBlock {
    /// Advance all three signals together. `weight` scales `load_avg` only
    /// (spec: "load_avg ... weight-scaled"); `runnable_avg`/`util_avg` use
    /// an implicit weight of `WEIGHT_SCALE` (fully weighted occupancy,
    /// scaled further by `capacity_q10` for `util_avg`).
    pub fn update(&mut self, now_ns: u64, runnable: bool, running: bool, capacity_q10: u32) {
        let now_ticks = now_ns / 1024;
        self.load
            .accumulate(now_ticks, runnable, WEIGHT_SCALE);
        self.runnable
            .accumulate(now_ticks, runnable, WEIGHT_SCALE);
        self.util.accumulate(now_ticks, running, capacity_q10);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_of_32_periods_is_half() {
        let d = decay(32);
        let half = 1u64 << 31;
        let diff = if d > half { d - half } else { half - d };
        assert!(diff < (1 << 20), "decay(32) should be close to exactly half: {d}");
    }

    #[test]
    fn decay_is_monotonically_non_increasing() {
        let mut prev = decay(0);
        for n in 1..96 {
            let d = decay(n);
            assert!(d <= prev, "decay should never increase: n={n}");
            prev = d;
        }
    }

    #[test]
    fn inactive_entity_does_not_accumulate() {
        let mut avg = SchedAvg::default();
        avg.accumulate(0, false, WEIGHT_SCALE);
        avg.accumulate(10_000, false, WEIGHT_SCALE);
        assert_eq!(avg.sum, 0);
        assert_eq!(avg.avg, 0);
    }

    #[test]
    fn always_runnable_entity_saturates_below_max() {
        let mut avg = SchedAvg::default();
        // Run for a long time (many half-lives) and confirm `avg` stays
        // within bounds (spec invariant: `util_avg <= 1024`).
        let mut t = 0u64;
        for _ in 0..400 {
            t += 1024;
            avg.accumulate(t, true, WEIGHT_SCALE);
        }
        assert!(avg.avg <= WEIGHT_SCALE, "avg={}", avg.avg);
        assert!(avg.avg > WEIGHT_SCALE - 50, "should have nearly saturated: avg={}", avg.avg);
    }

    #[test]
    fn util_avg_respects_capacity_scale() {
        let mut block = PeltBlock::default();
        let mut t = 0u64;
        for _ in 0..400 {
            t += 1024 * 1024; // advance in ~1ms steps
            block.update(t, true, true, WEIGHT_SCALE / 2);
        }
        assert!(block.util.avg <= WEIGHT_SCALE / 2 + 5);
    }
}

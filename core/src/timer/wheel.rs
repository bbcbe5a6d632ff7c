//! Hashed timer wheel (spec §4.3), one instance per CPU.
//!
//! Grounded on the per-CPU networking timer wheel's shape (single
//! `IrqMutex`-protected wheel, `TimerToken`-style cancellation handle,
//! typed dispatch instead of `fn()` callbacks) generalized from one
//! 256-slot ring to `LEVELS` levels of 64 buckets each, 8x coarser per
//! level, selected by `calc_wheel_index` rather than a flat `tick % 256`.
//!
//! No cascading (spec §4.3): a timer is placed directly into the coarsest
//! bucket whose granularity bounds its overshoot, and stays there until it
//! fires or is modified — unlike a cascading wheel, buckets never migrate
//! entries between levels as the clock advances.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

/// L ∈ {8, 9} per spec; 8 is chosen here (see design ledger) since it
/// keeps every level's pending-bucket bitmap inside a `u64` without a
/// ninth level buying much more range than this scheduler's longest
/// period needs.
pub const LEVELS: usize = 8;
pub const LVL_SIZE: usize = 64;
const LVL_CLK_SHIFT: u32 = 3;

pub const fn lvl_shift(level: usize) -> u32 {
    LVL_CLK_SHIFT * level as u32
}

pub const fn lvl_gran(level: usize) -> u64 {
    1u64 << lvl_shift(level)
}

/// `LVL_START(0) = 0`; `LVL_START(ℓ) = 63 · 8^(ℓ−1)` for `ℓ ≥ 1` (spec §4.3).
pub const fn lvl_start(level: usize) -> u64 {
    if level == 0 {
        0
    } else {
        63 * lvl_gran(level - 1)
    }
}

/// Delta at or beyond which an expiry overshoots every level and must be
/// clamped (spec §4.3 "For delta ≥ LVL_START(L) (overshoot)").
pub const WHEEL_TIMEOUT_CUTOFF: u64 = lvl_start(LEVELS);
/// Clamp target for an overshooting expiry (spec B4).
pub const WHEEL_TIMEOUT_MAX: u64 = lvl_start(LEVELS) - lvl_gran(LEVELS - 1);

/// Timer subsystems this wheel serves (component overview: "replenishment,
/// inactive-task, and bandwidth-period timers").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerKind {
    Replenish,
    Inactive,
    BandwidthPeriod,
}

/// `MOD_TIMER_REDUCE`/`MOD_TIMER_PENDING_ONLY` (spec §4.3 "Modify").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModifyMode {
    Normal,
    Reduce,
    PendingOnly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpiredTimer {
    pub id: u64,
    pub kind: TimerKind,
    pub key: u32,
}

#[derive(Clone, Debug)]
struct TimerEntry {
    id: u64,
    expiry: u64,
    kind: TimerKind,
    key: u32,
    /// Set transiently while a cross-CPU `modify` is in flight (spec §4.3
    /// "Cross-CPU timer move"); readers on the old base would spin on this
    /// in a real multi-base deployment. This crate models only the flag.
    migrating: bool,
}

/// Given absolute expiry `e` and the wheel's current `clk`, pick the
/// `(level, bucket_index, bucket_expiry)` the timer belongs in (spec §4.3
/// "Bucket selection").
pub fn calc_wheel_index(e: u64, clk: u64) -> (usize, usize, u64) {
    let delta = e as i128 - clk as i128;
    if delta < 0 {
        // Already due: lands in the current bucket, fires on next scan.
        let idx = (clk as usize) & (LVL_SIZE - 1);
        return (0, idx, clk);
    }
    let e = if delta >= lvl_start(LEVELS) as i128 {
        clk + WHEEL_TIMEOUT_MAX
    } else {
        e
    };
    let delta = e - clk;
    let mut level = LEVELS - 1;
    for l in 0..LEVELS {
        if delta < lvl_start(l + 1) {
            level = l;
            break;
        }
    }
    let idx_raw = (e + lvl_gran(level)) >> lvl_shift(level);
    let idx = (idx_raw as usize) & (LVL_SIZE - 1);
    let bucket_expiry = idx_raw << lvl_shift(level);
    (level, idx, bucket_expiry)
}

fn flat_index(level: usize, idx: usize) -> usize {
    level * LVL_SIZE + idx
}

/// One per-CPU, per-flavor timer base (spec §3 "Timer wheel base").
pub struct Wheel {
    pub clk: u64,
    pub next_expiry: u64,
    pub is_idle: bool,
    buckets: Vec<Vec<TimerEntry>>,
    bucket_expiry: Vec<u64>,
    pending_bits: [u64; LEVELS],
    locations: BTreeMap<u64, (usize, usize)>,
    next_id: u64,
}

impl Wheel {
    pub fn new() -> Self {
        Self {
            clk: 0,
            next_expiry: u64::MAX,
            is_idle: false,
            buckets: (0..LEVELS * LVL_SIZE).map(|_| Vec::new()).collect(),
            bucket_expiry: alloc::vec![0; LEVELS * LVL_SIZE],
            pending_bits: [0; LEVELS],
            locations: BTreeMap::new(),
            next_id: 1,
        }
    }

    fn mark_pending(&mut self, level: usize, idx: usize, bucket_expiry: u64) {
        let flat = flat_index(level, idx);
        self.bucket_expiry[flat] = bucket_expiry;
        self.pending_bits[level] |= 1 << idx;
        if bucket_expiry < self.next_expiry {
            self.next_expiry = bucket_expiry;
        }
    }

    fn clear_if_empty(&mut self, level: usize, idx: usize) {
        let flat = flat_index(level, idx);
        if self.buckets[flat].is_empty() {
            self.pending_bits[level] &= !(1 << idx);
        }
    }

    /// Insert a new timer; returns its cancellation/modify handle.
    pub fn enqueue(&mut self, expiry: u64, kind: TimerKind, key: u32) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let (level, idx, bucket_expiry) = calc_wheel_index(expiry, self.clk);
        self.buckets[flat_index(level, idx)].push(TimerEntry {
            id,
            expiry,
            kind,
            key,
            migrating: false,
        });
        self.locations.insert(id, (level, idx));
        self.mark_pending(level, idx, bucket_expiry);
        id
    }

    /// Remove a queued timer. Returns `true` if it was present.
    pub fn dequeue(&mut self, id: u64) -> bool {
        let Some((level, idx)) = self.locations.remove(&id) else {
            return false;
        };
        let flat = flat_index(level, idx);
        self.buckets[flat].retain(|e| e.id != id);
        self.clear_if_empty(level, idx);
        true
    }

    /// Update a queued (or not-yet-queued) timer's expiry (spec §4.3
    /// "Modify"). If the new expiry resolves to the same bucket, the entry
    /// is updated in place without relinking.
    pub fn modify(&mut self, id: u64, new_expiry: u64, mode: ModifyMode) -> bool {
        let existing = self.locations.get(&id).copied();
        match (existing, mode) {
            (None, ModifyMode::PendingOnly) => false,
            (None, _) => {
                let (level, idx, bucket_expiry) = calc_wheel_index(new_expiry, self.clk);
                self.buckets[flat_index(level, idx)].push(TimerEntry {
                    id,
                    expiry: new_expiry,
                    kind: TimerKind::Replenish,
                    key: 0,
                    migrating: false,
                });
                self.locations.insert(id, (level, idx));
                self.mark_pending(level, idx, bucket_expiry);
                true
            }
            (Some((level, idx)), _) => {
                let flat = flat_index(level, idx);
                let old_expiry = self.buckets[flat]
                    .iter()
                    .find(|e| e.id == id)
                    .map(|e| e.expiry)
                    .unwrap_or(new_expiry);
                if mode == ModifyMode::Reduce && new_expiry >= old_expiry {
                    return false;
                }
                let (new_level, new_idx, bucket_expiry) = calc_wheel_index(new_expiry, self.clk);
                if (new_level, new_idx) == (level, idx) {
                    if let Some(e) = self.buckets[flat].iter_mut().find(|e| e.id == id) {
                        e.expiry = new_expiry;
                    }
                    if bucket_expiry < self.next_expiry {
                        self.next_expiry = bucket_expiry;
                    }
                } else {
                    self.buckets[flat].retain(|e| e.id != id);
                    self.clear_if_empty(level, idx);
                    self.buckets[flat_index(new_level, new_idx)].push(TimerEntry {
                        id,
                        expiry: new_expiry,
                        kind: TimerKind::Replenish,
                        key: 0,
                        migrating: false,
                    });
                    self.locations.insert(id, (new_level, new_idx));
                    self.mark_pending(new_level, new_idx, bucket_expiry);
                }
                true
            }
        }
    }

    fn recompute_next_expiry(&mut self) {
        let mut best = u64::MAX;
        for level in 0..LEVELS {
            let mut bits = self.pending_bits[level];
            while bits != 0 {
                let idx = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                best = best.min(self.bucket_expiry[flat_index(level, idx)]);
            }
        }
        self.next_expiry = best;
    }

    /// `__run_timers` (spec §4.3 "Advance"): while `now >= clk` and
    /// `now >= next_expiry`, collect each due level's bucket, advance
    /// `clk`, and expire the collected heads coarsest-first.
    pub fn advance(&mut self, now: u64) -> Vec<ExpiredTimer> {
        let mut expired = Vec::new();
        while now >= self.clk && now >= self.next_expiry {
            let mut heads: Vec<Vec<TimerEntry>> = Vec::with_capacity(LEVELS);
            for level in 0..LEVELS {
                if level > 0 && self.clk % lvl_gran(level) != 0 {
                    break;
                }
                let idx = ((self.clk >> lvl_shift(level)) as usize) & (LVL_SIZE - 1);
                let flat = flat_index(level, idx);
                let drained = core::mem::take(&mut self.buckets[flat]);
                for e in &drained {
                    self.locations.remove(&e.id);
                }
                self.pending_bits[level] &= !(1 << idx);
                heads.push(drained);
            }
            self.clk += 1;
            self.recompute_next_expiry();

            for bucket in heads.into_iter().rev() {
                for entry in bucket {
                    expired.push(ExpiredTimer {
                        id: entry.id,
                        kind: entry.kind,
                        key: entry.key,
                    });
                }
            }
        }
        expired
    }

    /// Forward `clk` to the smaller of `now` and `next_expiry` when the CPU
    /// goes idle (spec §4.3 "Idle and forward"). Never moves `clk`
    /// backwards.
    pub fn forward(&mut self, now: u64) {
        let target = now.min(self.next_expiry);
        if target > self.clk {
            self.clk = target;
        }
    }

    /// Set the `MIGRATING` bit on a queued timer (spec §4.3 "Cross-CPU
    /// timer move"): a move in flight from another base. Readers in a real
    /// multi-base deployment spin on this; here it is just state a caller
    /// can poll via [`Wheel::is_migrating`].
    pub fn begin_migration(&mut self, id: u64) -> bool {
        let Some(&(level, idx)) = self.locations.get(&id) else {
            return false;
        };
        if let Some(e) = self.buckets[flat_index(level, idx)]
            .iter_mut()
            .find(|e| e.id == id)
        {
            e.migrating = true;
            return true;
        }
        false
    }

    pub fn end_migration(&mut self, id: u64) -> bool {
        let Some(&(level, idx)) = self.locations.get(&id) else {
            return false;
        };
        if let Some(e) = self.buckets[flat_index(level, idx)]
            .iter_mut()
            .find(|e| e.id == id)
        {
            e.migrating = false;
            return true;
        }
        false
    }

    pub fn is_migrating(&self, id: u64) -> bool {
        let Some(&(level, idx)) = self.locations.get(&id) else {
            return false;
        };
        self.buckets[flat_index(level, idx)]
            .iter()
            .any(|e| e.id == id && e.migrating)
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

impl Default for Wheel {
    fn default() -> Self {
        Self::new()
    }
}

/// HZ used by the rounding helpers; the wheel's own bucket math is
/// HZ-independent (it operates on raw ticks), but `round_jiffies` needs a
/// concrete tick rate to define "whole HZ boundary".
pub const HZ: u64 = 250;

fn round_jiffies_common(j: u64, cpu: usize) -> u64 {
    let skew = (3 * cpu as u64) % HZ;
    let rem = (j + skew) % HZ;
    if rem < HZ / 2 {
        j - rem
    } else {
        j + (HZ - rem)
    }
}

/// `round_jiffies(j, cpu)`: snap to the nearest whole-HZ boundary, skewed
/// by `3*cpu` ticks to avoid synchronized wakeups across CPUs.
pub fn round_jiffies(j: u64, cpu: usize) -> u64 {
    round_jiffies_common(j, cpu)
}

/// `round_jiffies_up`: never returns a value `<= j` (spec B3).
pub fn round_jiffies_up(j: u64, cpu: usize) -> u64 {
    let skew = (3 * cpu as u64) % HZ;
    let rem = (j + skew) % HZ;
    let add = if rem == 0 { HZ } else { HZ - rem };
    j + add
}

/// `round_jiffies_relative`: treat `delta` as relative to `now` rather than
/// absolute.
pub fn round_jiffies_relative(delta: u64, cpu: usize, now: u64) -> u64 {
    round_jiffies(now + delta, cpu).saturating_sub(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calc_wheel_index_matches_scenario_5() {
        // Scenario 5 (spec §8): clk=0, E=67 -> level 1, bucket 9, expiry 72.
        let (level, idx, bucket_expiry) = calc_wheel_index(67, 0);
        assert_eq!(level, 1);
        assert_eq!(idx, 9);
        assert_eq!(bucket_expiry, 72);
    }

    #[test]
    fn enqueue_then_advance_fires_exactly_at_bucket_expiry() {
        let mut wheel = Wheel::new();
        let id = wheel.enqueue(67, TimerKind::Replenish, 42);
        let expired = wheel.advance(71);
        assert!(expired.is_empty(), "should not fire before bucket_expiry");
        let expired = wheel.advance(72);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, id);
        assert_eq!(expired[0].key, 42);
    }

    #[test]
    fn modify_same_bucket_updates_in_place() {
        let mut wheel = Wheel::new();
        let id = wheel.enqueue(67, TimerKind::Replenish, 1);
        let before = wheel.locations.get(&id).copied();
        assert!(wheel.modify(id, 68, ModifyMode::Normal));
        let after = wheel.locations.get(&id).copied();
        assert_eq!(before, after, "same-bucket modify should not relink");
    }

    #[test]
    fn modify_reduce_refuses_later_expiry() {
        let mut wheel = Wheel::new();
        let id = wheel.enqueue(1000, TimerKind::Replenish, 1);
        assert!(!wheel.modify(id, 2000, ModifyMode::Reduce));
    }

    #[test]
    fn dequeue_removes_and_clears_pending_bit() {
        let mut wheel = Wheel::new();
        let id = wheel.enqueue(67, TimerKind::Replenish, 1);
        assert!(wheel.dequeue(id));
        assert!(wheel.is_empty());
        assert!(wheel.advance(100).is_empty());
    }

    #[test]
    fn forward_never_moves_clk_backwards() {
        let mut wheel = Wheel::new();
        wheel.clk = 100;
        wheel.next_expiry = 200;
        wheel.forward(50);
        assert_eq!(wheel.clk, 100);
        wheel.forward(150);
        assert_eq!(wheel.clk, 150);
    }

    #[test]
    fn round_jiffies_up_never_returns_le_input() {
        for j in [0u64, 1, 249, 250, 251, 10_000] {
            let r = round_jiffies_up(j, 3);
            assert!(r > j, "round_jiffies_up({j}) = {r} should be > {j}");
        }
    }

    #[test]
    fn migration_flag_round_trips() {
        let mut wheel = Wheel::new();
        let id = wheel.enqueue(1000, TimerKind::Replenish, 1);
        assert!(!wheel.is_migrating(id));
        assert!(wheel.begin_migration(id));
        assert!(wheel.is_migrating(id));
        assert!(wheel.end_migration(id));
        assert!(!wheel.is_migrating(id));
    }

    #[test]
    fn wheel_timeout_cutoff_forces_clamp_to_max() {
        let mut wheel = Wheel::new();
        let far = WHEEL_TIMEOUT_CUTOFF + 1_000_000;
        let id = wheel.enqueue(far, TimerKind::Replenish, 1);
        let (level, _, bucket_expiry) = calc_wheel_index(far, 0);
        assert_eq!(level, LEVELS - 1);
        assert!(bucket_expiry <= WHEEL_TIMEOUT_MAX + lvl_gran(LEVELS - 1));
        assert!(wheel.dequeue(id));
    }
}

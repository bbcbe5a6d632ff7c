//! Configuration surface (§6 "Configuration surface").
//!
//! Global state that in the source is a handful of mutable sysctls is
//! modeled here as a single value threaded in at runqueue/domain
//! construction (spec §9 design note: "no hidden mutable singletons").

use edfcore_lib::klog_warn;

/// Minimum accepted `dl_runtime`, in nanoseconds (spec §4.1 parameter validity).
pub const DL_RUNTIME_MIN_NS: u64 = 1 << 10;

/// `2^20`, the fixed-point base used for `dl_bw`, GRUB factors, and the
/// admission-control capacity arithmetic (spec §4.1, §4.5).
pub const FIXED_POINT_ONE: u64 = 1 << 20;

/// Q8 scale used for `bw_ratio` (spec §4.5).
pub const BW_RATIO_SHIFT: u32 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedConfig {
    /// `sysctl_sched_rt_period_us`: global period for the aggregate RT+DL cap.
    pub rt_period_us: u64,
    /// `sysctl_sched_rt_runtime_us`: aggregate runtime allowed per period;
    /// `None` means unbounded (`-1` in the source).
    pub rt_runtime_us: Option<u64>,
    /// `sysctl_sched_dl_period_min`.
    pub dl_period_min_us: u64,
    /// `sysctl_sched_dl_period_max`.
    pub dl_period_max_us: u64,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            rt_period_us: 1_000_000,
            rt_runtime_us: Some(950_000),
            dl_period_min_us: 100,
            dl_period_max_us: 4_000_000,
        }
    }
}

impl SchedConfig {
    /// Validate a candidate config against its own documented ranges
    /// (spec §6 "Configuration surface" table). Does not validate against
    /// any particular task's parameters.
    pub fn validate(&self) -> bool {
        if self.rt_period_us == 0 || self.rt_period_us >= (1u64 << 31) {
            klog_warn!("SchedConfig: rt_period_us out of range");
            return false;
        }
        if let Some(rt) = self.rt_runtime_us {
            if rt > self.rt_period_us {
                klog_warn!("SchedConfig: rt_runtime_us exceeds rt_period_us");
                return false;
            }
        }
        if self.dl_period_min_us < 100 || self.dl_period_min_us > self.dl_period_max_us {
            klog_warn!("SchedConfig: dl_period_min_us out of range");
            return false;
        }
        if self.dl_period_max_us > 4_000_000 {
            klog_warn!("SchedConfig: dl_period_max_us out of range");
            return false;
        }
        true
    }

    /// Whether `period_ns` (nanoseconds) falls within `[dl_period_min_us,
    /// dl_period_max_us]` once converted to microseconds.
    pub fn period_in_range(&self, period_ns: u64) -> bool {
        let period_us = period_ns / 1_000;
        period_us >= self.dl_period_min_us && period_us <= self.dl_period_max_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(SchedConfig::default().validate());
    }

    #[test]
    fn rt_runtime_exceeding_period_is_invalid() {
        let cfg = SchedConfig {
            rt_runtime_us: Some(2_000_000),
            ..SchedConfig::default()
        };
        assert!(!cfg.validate());
    }

    #[test]
    fn period_in_range_checks_microsecond_bounds() {
        let cfg = SchedConfig::default();
        assert!(cfg.period_in_range(10_000_000)); // 10ms
        assert!(!cfg.period_in_range(50_000)); // 50us < 100us min
    }
}

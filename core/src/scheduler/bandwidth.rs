//! GRUB reclamation factor and admission control (spec §4.5).

use super::errors::{SchedError, SchedResult};
use super::runqueue::Runqueue;
use super::task::bw_fixed_point;

/// `2^20`, the fixed-point base shared by `dl_bw` and GRUB factors.
pub const ONE: u64 = 1 << 20;

/// GRUB reclamation factor for a reclaiming entity with bandwidth `dl_bw`.
///
/// `u_inact = this_bw - running_bw`. `u_act_min = dl_bw * bw_ratio >> 8`. If
/// `u_inact + extra_bw > ONE - u_act_min`, factor = `u_act_min`, else
/// `ONE - u_inact - extra_bw`.
pub fn grub_factor(rq: &Runqueue, dl_bw: u64) -> u64 {
    let u_inact = rq.this_bw.saturating_sub(rq.running_bw);
    let u_act_min = (dl_bw * rq.bw_ratio) >> 8;
    if u_inact + rq.extra_bw > ONE.saturating_sub(u_act_min) {
        u_act_min
    } else {
        ONE.saturating_sub(u_inact).saturating_sub(rq.extra_bw)
    }
}

/// Scale `delta_exec` nanoseconds by a GRUB factor expressed in `2^20`
/// fixed point (spec §4.5: "Scale `delta_exec` by `factor >> 20`").
pub fn scale_by_factor(delta_exec: u64, factor: u64) -> u64 {
    ((delta_exec as u128 * factor as u128) >> 20) as u64
}

/// Admission check: would adding `new_bw` push the domain's total bandwidth
/// over `capacity` (both in `2^20` fixed point, spec §4.5)? SUGOV entities
/// bypass admission entirely and should never reach this function.
pub fn admit(total_bw: u64, new_bw: u64, capacity: u64) -> SchedResult<()> {
    if total_bw.saturating_add(new_bw) > capacity {
        return Err(SchedError::Busy);
    }
    Ok(())
}

/// Compute `dl_bw` for a candidate `(runtime, period)` pair in `2^20`
/// fixed point, for use at admission time (spec §4.5 "new_bw = runtime/period").
pub fn candidate_bw(runtime_ns: u64, period_ns: u64) -> u64 {
    bw_fixed_point(runtime_ns, period_ns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grub_factor_is_one_when_fully_utilized() {
        let mut rq = Runqueue::new(0);
        rq.this_bw = ONE;
        rq.running_bw = ONE;
        assert_eq!(grub_factor(&rq, ONE / 2), ONE);
    }

    #[test]
    fn admit_rejects_overcommit() {
        assert!(admit(ONE, ONE / 2, ONE).is_err());
        assert!(admit(ONE / 4, ONE / 2, ONE).is_ok());
    }

    #[test]
    fn candidate_bw_matches_ratio() {
        // 5ms/10ms == half of ONE.
        assert_eq!(candidate_bw(5_000_000, 10_000_000), ONE / 2);
    }
}

//! Virtual time arithmetic.
//!
//! Running entities are billed in whole minimum charge units (MCUs), always
//! rounded up so nothing runs for free. Each MCU advances the entity's avt
//! by its `mcu_advance`, the inverse of its weight: an entity with half the
//! advance accrues virtual time half as fast and so receives twice the CPU.

use crate::entity::BvtEntity;
use crate::types::{TimeNs, Vtime, NSEC_PER_USEC};

/// Minimum charge unit.
pub const MCU: TimeNs = 100 * NSEC_PER_USEC;

/// Number of MCUs billed for `elapsed` nanoseconds of CPU time.
pub fn mcus_for(elapsed: TimeNs) -> u64 {
    elapsed.div_ceil(MCU)
}

/// New avt of `entity` after running for `elapsed` since it was scheduled.
///
/// Saturates one below [`Vtime::IDLE`] so a runaway entity can never tie
/// with the idle entity.
pub fn compute_avt(entity: &BvtEntity, elapsed: TimeNs) -> Vtime {
    let charge = mcus_for(elapsed).saturating_mul(u64::from(entity.params.mcu_advance));
    let avt = u64::from(entity.avt.0)
        .saturating_add(charge)
        .min(u64::from(Vtime::IDLE.0 - 1));
    Vtime(avt as u32)
}

/// Effective virtual time of `entity` for a given avt.
///
/// While warping the entity is ahead by `warp_value`. A warp larger than the
/// avt bottoms out at zero rather than wrapping to the far end of the range.
pub fn compute_evt(entity: &BvtEntity, avt: Vtime) -> Vtime {
    if entity.is_warping() {
        avt.saturating_sub(entity.params.warp_value)
    } else {
        avt
    }
}

/// Wall-clock time an entity with `mcu_advance` needs to accrue `lead` of
/// virtual time.
pub fn lead_to_ns(lead: u32, mcu_advance: u32) -> TimeNs {
    u64::from(lead / mcu_advance) * MCU
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityParams, WarpState};
    use crate::types::{CpuId, DomainId, EntityId};

    fn entity(mcu_advance: u32) -> BvtEntity {
        let params = EntityParams {
            mcu_advance,
            ..EntityParams::default()
        };
        BvtEntity::new(EntityId(1), DomainId(1), CpuId(0), params, Vtime(100))
    }

    #[test]
    fn test_charge_rounds_up() {
        assert_eq!(mcus_for(0), 0);
        assert_eq!(mcus_for(1), 1);
        assert_eq!(mcus_for(MCU), 1);
        assert_eq!(mcus_for(MCU + 1), 2);
        assert_eq!(mcus_for(5_000_000), 50);
    }

    #[test]
    fn test_avt_advances_by_weight() {
        let e = entity(10);
        assert_eq!(compute_avt(&e, 0), Vtime(100));
        assert_eq!(compute_avt(&e, 1), Vtime(110));
        assert_eq!(compute_avt(&e, 5_000_000), Vtime(600));

        let heavy = entity(5);
        assert_eq!(compute_avt(&heavy, 5_000_000), Vtime(350));
    }

    #[test]
    fn test_avt_never_reaches_idle() {
        let mut e = entity(10);
        e.avt = Vtime(u32::MAX - 3);
        assert_eq!(compute_avt(&e, 10 * MCU), Vtime(u32::MAX - 1));
    }

    #[test]
    fn test_evt_equals_avt_unless_warping() {
        let mut e = entity(10);
        e.params.warp_value = 40;
        assert_eq!(compute_evt(&e, Vtime(100)), Vtime(100));

        e.warp = WarpState::Warping { limit_timer: None };
        assert_eq!(compute_evt(&e, Vtime(100)), Vtime(60));
        assert_eq!(compute_evt(&e, Vtime(30)), Vtime(0));
    }

    #[test]
    fn test_lead_to_ns() {
        assert_eq!(lead_to_ns(500, 10), 50 * MCU);
        assert_eq!(lead_to_ns(9, 10), 0);
    }
}

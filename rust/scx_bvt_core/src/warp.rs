//! Warp (virtual time borrowing) state transitions.
//!
//! ```text
//!            request                     limit timer, unwarp > 0
//!   Normal ----------> Warping ---------------------------------> Unwarping
//!     ^                   |  ^                                        |
//!     |  limit timer,     |  |        unwarp timer, still requested   |
//!     +--- unwarp == 0 ---+  +----------------------------------------+
//!     |                                                               |
//!     +------------------ unwarp timer, no longer requested ----------+
//! ```
//!
//! Every function here runs under the run-queue lock of the entity's CPU and
//! keeps evt in step with the new state. None of them request a reschedule
//! themselves; they report whether one is needed.

use log::debug;

use crate::entity::{BvtEntity, WarpState};
use crate::timer::{TimerEvent, TimerFacility, TimerHandle};
use crate::types::{CpuId, TimeNs};

/// The owner asked to borrow. Starts an episode right away unless the
/// entity is sitting out its unwarp period.
pub(crate) fn request(entity: &mut BvtEntity) {
    if entity.warp == WarpState::Normal {
        entity.warp = WarpState::Warping { limit_timer: None };
        entity.refresh_evt();
    }
}

/// The owner no longer wants to borrow: disarm whatever timer is pending
/// and fall back to plain fair share.
pub(crate) fn stop<T: TimerFacility>(entity: &mut BvtEntity, timers: &T) {
    if let Some(handle) = entity.warp.armed_timer() {
        timers.disarm(handle);
    }
    entity.warp = WarpState::Normal;
    entity.refresh_evt();
}

/// Called by the decision engine for the entity it is about to run. Arms
/// the limit timer once per episode, using the parameters in force now.
/// Returns whether a timer was armed.
pub(crate) fn arm_limit<T: TimerFacility>(
    entity: &mut BvtEntity,
    cpu: CpuId,
    now: TimeNs,
    timers: &T,
) -> bool {
    if entity.warp != (WarpState::Warping { limit_timer: None }) {
        return false;
    }
    if !entity.params.warp_requested || entity.params.warp_limit_ns == 0 {
        return false;
    }
    let deadline = now.saturating_add(entity.params.warp_limit_ns);
    let handle = timers.arm(cpu, deadline, TimerEvent::WarpLimit { entity: entity.id });
    entity.warp = WarpState::Warping {
        limit_timer: Some(handle),
    };
    debug!(
        "{}: warp limit armed for {}ns",
        entity.id, entity.params.warp_limit_ns
    );
    true
}

/// The limit timer fired: the episode is over. With a zero unwarp period
/// borrowing is switched off for good, otherwise the unwarp timer starts.
///
/// # Panics
/// Panics if `handle` is not the limit timer the entity holds.
pub(crate) fn limit_expired<T: TimerFacility>(
    entity: &mut BvtEntity,
    handle: TimerHandle,
    cpu: CpuId,
    now: TimeNs,
    timers: &T,
) -> bool {
    assert_eq!(
        entity.warp,
        WarpState::Warping {
            limit_timer: Some(handle)
        },
        "stale warp limit timer {handle:?} delivered to {}",
        entity.id
    );

    if entity.params.warp_unwarp_ns == 0 {
        entity.params.warp_requested = false;
        entity.warp = WarpState::Normal;
        debug!("{}: warp limit reached, borrowing disabled", entity.id);
    } else {
        let deadline = now.saturating_add(entity.params.warp_unwarp_ns);
        let unwarp_timer = timers.arm(cpu, deadline, TimerEvent::Unwarp { entity: entity.id });
        entity.warp = WarpState::Unwarping { unwarp_timer };
        debug!(
            "{}: warp limit reached, unwarping for {}ns",
            entity.id, entity.params.warp_unwarp_ns
        );
    }
    entity.refresh_evt();
    true
}

/// The unwarp timer fired. Returns whether the entity warped again.
///
/// # Panics
/// Panics if `handle` is not the unwarp timer the entity holds.
pub(crate) fn unwarp_expired(entity: &mut BvtEntity, handle: TimerHandle) -> bool {
    assert_eq!(
        entity.warp,
        WarpState::Unwarping {
            unwarp_timer: handle
        },
        "stale unwarp timer {handle:?} delivered to {}",
        entity.id
    );

    if entity.params.warp_requested {
        entity.warp = WarpState::Warping { limit_timer: None };
        debug!("{}: warping again", entity.id);
    } else {
        entity.warp = WarpState::Normal;
    }
    entity.refresh_evt();
    entity.is_warping()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityParams;
    use crate::sim::SimTimers;
    use crate::types::{DomainId, EntityId, Vtime};

    fn warper(unwarp_ns: TimeNs) -> BvtEntity {
        let params = EntityParams {
            warp_requested: true,
            warp_value: 1000,
            warp_limit_ns: 2_000,
            warp_unwarp_ns: unwarp_ns,
            ..EntityParams::default()
        };
        BvtEntity::new(EntityId(1), DomainId(1), CpuId(0), params, Vtime(5000))
    }

    #[test]
    fn test_request_engages_and_lowers_evt() {
        let mut e = warper(1_000);
        request(&mut e);
        assert!(e.is_warping());
        assert_eq!(e.evt, Vtime(4000));
        assert_eq!(e.avt.0 - e.evt.0, 1000);
    }

    #[test]
    fn test_arm_limit_only_once_per_episode() {
        let timers = SimTimers::new();
        let mut e = warper(1_000);
        request(&mut e);
        assert!(arm_limit(&mut e, CpuId(0), 100, &timers));
        assert!(!arm_limit(&mut e, CpuId(0), 200, &timers));
        assert_eq!(timers.nr_armed(), 1);
        assert_eq!(timers.next_deadline(), Some(2_100));
    }

    #[test]
    fn test_zero_limit_never_arms() {
        let timers = SimTimers::new();
        let mut e = warper(1_000);
        e.params.warp_limit_ns = 0;
        request(&mut e);
        assert!(!arm_limit(&mut e, CpuId(0), 100, &timers));
        assert!(e.is_warping());
        assert_eq!(timers.nr_armed(), 0);
    }

    #[test]
    fn test_limit_with_zero_unwarp_disables_borrowing() {
        let timers = SimTimers::new();
        let mut e = warper(0);
        request(&mut e);
        arm_limit(&mut e, CpuId(0), 0, &timers);
        let (handle, _) = timers.pop_due(2_000).unwrap();

        assert!(limit_expired(&mut e, handle, CpuId(0), 2_000, &timers));
        assert!(!e.params.warp_requested);
        assert_eq!(e.warp, WarpState::Normal);
        assert_eq!(e.evt, e.avt);
        assert_eq!(timers.nr_armed(), 0);
    }

    #[test]
    fn test_full_cycle_rearms_after_unwarp() {
        let timers = SimTimers::new();
        let mut e = warper(1_000);
        request(&mut e);
        arm_limit(&mut e, CpuId(0), 0, &timers);

        let (limit, event) = timers.pop_due(2_000).unwrap();
        assert_eq!(event, TimerEvent::WarpLimit { entity: e.id });
        limit_expired(&mut e, limit, CpuId(0), 2_000, &timers);
        assert!(matches!(e.warp, WarpState::Unwarping { .. }));
        assert_eq!(e.evt, e.avt);
        assert_eq!(timers.next_deadline(), Some(3_000));

        let (unwarp, event) = timers.pop_due(3_000).unwrap();
        assert_eq!(event, TimerEvent::Unwarp { entity: e.id });
        assert!(unwarp_expired(&mut e, unwarp));
        assert_eq!(e.warp, WarpState::Warping { limit_timer: None });
        assert_eq!(e.evt, Vtime(4000));
    }

    #[test]
    fn test_unwarp_without_request_stays_normal() {
        let timers = SimTimers::new();
        let mut e = warper(1_000);
        request(&mut e);
        arm_limit(&mut e, CpuId(0), 0, &timers);
        let (limit, _) = timers.pop_due(2_000).unwrap();
        limit_expired(&mut e, limit, CpuId(0), 2_000, &timers);

        e.params.warp_requested = false;
        let (unwarp, _) = timers.pop_due(3_000).unwrap();
        assert!(!unwarp_expired(&mut e, unwarp));
        assert_eq!(e.warp, WarpState::Normal);
    }

    #[test]
    fn test_request_during_unwarp_waits() {
        let timers = SimTimers::new();
        let mut e = warper(1_000);
        request(&mut e);
        arm_limit(&mut e, CpuId(0), 0, &timers);
        let (limit, _) = timers.pop_due(2_000).unwrap();
        limit_expired(&mut e, limit, CpuId(0), 2_000, &timers);

        request(&mut e);
        assert!(matches!(e.warp, WarpState::Unwarping { .. }));
        assert!(!e.is_warping());
    }

    #[test]
    fn test_stop_disarms_pending_timer() {
        let timers = SimTimers::new();
        let mut e = warper(1_000);
        request(&mut e);
        arm_limit(&mut e, CpuId(0), 0, &timers);
        assert_eq!(timers.nr_armed(), 1);

        stop(&mut e, &timers);
        assert_eq!(timers.nr_armed(), 0);
        assert_eq!(e.warp, WarpState::Normal);
        assert_eq!(e.evt, e.avt);
    }

    #[test]
    #[should_panic(expected = "stale warp limit timer")]
    fn test_stale_limit_timer_panics() {
        let timers = SimTimers::new();
        let mut e = warper(1_000);
        request(&mut e);
        limit_expired(&mut e, TimerHandle(77), CpuId(0), 0, &timers);
    }
}

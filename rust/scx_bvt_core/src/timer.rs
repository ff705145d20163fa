//! Collaborators the scheduler consumes: a clock, a one-shot timer facility
//! and a deferred "reschedule this CPU" request.
//!
//! Timers carry a [`TimerEvent`] value instead of a callback. The facility
//! hands the event back through [`BvtScheduler::timer_fired`], which keeps
//! callbacks from ever holding a reference into scheduler state.
//!
//! [`BvtScheduler::timer_fired`]: crate::BvtScheduler::timer_fired

use crate::types::{CpuId, EntityId, TimeNs};

/// Handle of an armed one-shot timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

/// What an expiring timer means to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// The entity has borrowed for its full `warp_limit`.
    WarpLimit { entity: EntityId },
    /// The entity has sat out `warp_unwarp` and may borrow again.
    Unwarp { entity: EntityId },
    /// The running slice on `cpu` is over.
    SliceExpired { cpu: CpuId },
}

/// Monotonic time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> TimeNs;
}

/// Single-shot timer facility.
///
/// `disarm` is synchronous for warp timers: once it returns, the event of
/// that handle is never delivered. A slice expiry already in flight may
/// still arrive after its disarm; the scheduler drops it. The scheduler calls `arm` and `disarm` while holding its
/// own locks, so implementations must not call back into the scheduler from
/// either method.
pub trait TimerFacility: Send + Sync {
    fn arm(&self, cpu: CpuId, deadline: TimeNs, event: TimerEvent) -> TimerHandle;

    /// Cancel a pending timer. Returns whether it was still pending.
    fn disarm(&self, handle: TimerHandle) -> bool;
}

/// Requests a scheduling pass on a CPU from a safe context.
///
/// The request is deferred: the decision engine runs later on the normal
/// scheduling path, never from inside this call.
pub trait Kicker: Send + Sync {
    fn request_reschedule(&self, cpu: CpuId);
}

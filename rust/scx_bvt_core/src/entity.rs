//! Schedulable entity model.
//!
//! One [`BvtEntity`] exists per virtual CPU. Entities live in the arena of
//! the run queue of their physical CPU and are only touched under that run
//! queue's lock.

use serde::{Deserialize, Serialize};

use crate::error::SchedError;
use crate::timer::TimerHandle;
use crate::types::{CpuId, DomainId, EntityId, TimeNs, Vtime, NSEC_PER_MSEC};
use crate::vtime::compute_evt;

/// Default `mcu_advance` of a new entity.
pub const MCU_ADVANCE: u32 = 10;
/// Default maximum length of one warp episode.
pub const DEFAULT_WARP_LIMIT_NS: TimeNs = 2000 * NSEC_PER_MSEC;
/// Default pause between two warp episodes.
pub const DEFAULT_WARP_UNWARP_NS: TimeNs = 1000 * NSEC_PER_MSEC;

/// Per-entity tuning, read and written by the control interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityParams {
    /// Inverse of the weight. Must be non-zero.
    pub mcu_advance: u32,
    /// The owner wants to borrow virtual time.
    pub warp_requested: bool,
    /// Virtual time subtracted from avt while warping.
    pub warp_value: u32,
    /// Longest a warp episode may last. Zero means no limit.
    pub warp_limit_ns: TimeNs,
    /// Minimum time between warp episodes. Zero ends borrowing after the
    /// first episode.
    pub warp_unwarp_ns: TimeNs,
}

impl Default for EntityParams {
    fn default() -> Self {
        EntityParams {
            mcu_advance: MCU_ADVANCE,
            warp_requested: false,
            warp_value: 0,
            warp_limit_ns: DEFAULT_WARP_LIMIT_NS,
            warp_unwarp_ns: DEFAULT_WARP_UNWARP_NS,
        }
    }
}

impl EntityParams {
    pub fn validate(&self) -> Result<(), SchedError> {
        // Slice computation divides by the advance.
        if self.mcu_advance == 0 {
            return Err(SchedError::InvalidArgument(
                "mcu_advance must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Warp state, orthogonal to whether the entity is running or asleep.
///
/// At most one warp timer is armed at any time, and which one is encoded in
/// the state itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WarpState {
    /// Not borrowing, no warp timer armed.
    #[default]
    Normal,
    /// Borrowing. `limit_timer` is armed the first time the decision engine
    /// picks the entity during this episode.
    Warping { limit_timer: Option<TimerHandle> },
    /// Not borrowing; may warp again when `unwarp_timer` fires.
    Unwarping { unwarp_timer: TimerHandle },
}

impl WarpState {
    pub fn name(&self) -> &'static str {
        match self {
            WarpState::Normal => "normal",
            WarpState::Warping { .. } => "warping",
            WarpState::Unwarping { .. } => "unwarping",
        }
    }

    /// The warp timer currently armed, if any.
    pub fn armed_timer(&self) -> Option<TimerHandle> {
        match *self {
            WarpState::Normal => None,
            WarpState::Warping { limit_timer } => limit_timer,
            WarpState::Unwarping { unwarp_timer } => Some(unwarp_timer),
        }
    }
}

/// Scheduler-private state of one virtual CPU.
#[derive(Debug, Clone)]
pub struct BvtEntity {
    pub id: EntityId,
    pub domain: DomainId,
    /// Physical CPU whose run queue owns the entity.
    pub cpu: CpuId,
    pub params: EntityParams,
    /// Actual virtual time.
    pub avt: Vtime,
    /// Effective virtual time, the run queue ordering key.
    pub evt: Vtime,
    pub warp: WarpState,
    pub(crate) queued: bool,
    pub(crate) runnable: bool,
    /// Moved to another CPU since it last ran; avt is re-floored on wake.
    pub(crate) migrated: bool,
    idle: bool,
}

impl BvtEntity {
    /// A new, sleeping entity starting level with the CPU's `svt` so it
    /// neither gains nor loses against its peers.
    pub(crate) fn new(
        id: EntityId,
        domain: DomainId,
        cpu: CpuId,
        params: EntityParams,
        svt: Vtime,
    ) -> Self {
        BvtEntity {
            id,
            domain,
            cpu,
            params,
            avt: svt,
            evt: svt,
            warp: WarpState::Normal,
            queued: false,
            runnable: false,
            migrated: false,
            idle: false,
        }
    }

    /// The idle entity of `cpu`: always runnable, always last in line.
    pub(crate) fn idle(id: EntityId, cpu: CpuId) -> Self {
        BvtEntity {
            avt: Vtime::IDLE,
            evt: Vtime::IDLE,
            runnable: true,
            idle: true,
            ..BvtEntity::new(id, DomainId::IDLE, cpu, EntityParams::default(), Vtime::IDLE)
        }
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    /// Whether the entity is currently borrowing virtual time.
    pub fn is_warping(&self) -> bool {
        matches!(self.warp, WarpState::Warping { .. })
    }

    pub fn is_queued(&self) -> bool {
        self.queued
    }

    pub fn is_runnable(&self) -> bool {
        self.runnable
    }

    /// Recompute evt from the stored avt and the current warp state.
    pub(crate) fn refresh_evt(&mut self) {
        if !self.idle {
            self.evt = compute_evt(self, self.avt);
        }
    }
}

//! Newtype wrappers and type aliases for scheduler concepts.
//!
//! Newtypes for identifiers (CPU, entity and domain IDs) and virtual time
//! prevent silent type confusion. Wall-clock quantities stay a plain
//! nanosecond alias.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Time in nanoseconds, as reported by the [`Clock`](crate::Clock).
pub type TimeNs = u64;

pub const NSEC_PER_USEC: TimeNs = 1_000;
pub const NSEC_PER_MSEC: TimeNs = 1_000_000;
pub const NSEC_PER_SEC: TimeNs = 1_000_000_000;

/// Physical CPU identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct CpuId(pub u32);

impl CpuId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Stable handle of a schedulable entity (one vCPU of one domain).
///
/// Handles are issued by [`BvtScheduler::create`](crate::BvtScheduler::create)
/// and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Identifier of the guest domain owning an entity. Opaque to the scheduler.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct DomainId(pub u32);

impl DomainId {
    /// Owner of the per-CPU idle entities.
    pub const IDLE: DomainId = DomainId(u32::MAX);
}

/// Virtual time in minimum charge units.
///
/// Unlike the 64-bit vtimes of kernel schedulers this counter is 32 bits
/// wide and compared as a plain integer: the decision engine rebases every
/// CPU before it can wrap (see [`Vtime::HIGH_WATER`]).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Vtime(pub u32);

impl Vtime {
    pub const ZERO: Vtime = Vtime(0);
    /// avt/evt of the idle entity; nothing else ever reaches it.
    pub const IDLE: Vtime = Vtime(u32::MAX);
    /// svt at which a CPU's virtual time domain is rebased.
    pub const HIGH_WATER: Vtime = Vtime(0xf000_0000);
    /// Amount subtracted from every vtime on a CPU during a rebase.
    pub const REBASE: u32 = 0xe000_0000;

    pub fn saturating_sub(self, delta: u32) -> Vtime {
        Vtime(self.0.saturating_sub(delta))
    }

    /// Distance from `earlier` up to `self`, zero if `earlier` is ahead.
    pub fn lead_over(self, earlier: Vtime) -> u32 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Vtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

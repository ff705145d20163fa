//! scx_bvt_core - Borrowed Virtual Time (BVT) CPU scheduler for hypervisor vCPUs.
//!
//! BVT (Duda & Cheriton, SOSP'99) is a fair-share scheduler: every virtual
//! CPU accrues *actual virtual time* (avt) while it runs, at a rate set by
//! its weight, and each physical CPU always runs the entity with the lowest
//! *effective virtual time* (evt). Latency-sensitive entities may *warp*:
//! borrow virtual time for a bounded period so that their evt drops below
//! their peers' and they get dispatched first.
//!
//! # Architecture
//!
//! - **vtime**: pure avt/evt arithmetic in minimum charge units (MCUs)
//! - **runqueue**: per-CPU entity arena, handle queue and min/second-min scan
//! - **warp**: per-entity warp state machine driven by one-shot timers
//! - **sched**: the decision engine (`do_schedule`) and timer delivery
//! - **control**: per-entity and global tuning
//! - **lifecycle**: create/destroy/wake/sleep/migrate hooks
//! - **sim**: deterministic collaborators (clock, timers, reschedule
//!   requests) and an event-driven simulator for scripted vCPU workloads
//!
//! The core never performs a context switch. It consumes "schedule now" and
//! "timer fired" signals through the [`Clock`], [`TimerFacility`] and
//! [`Kicker`] traits and answers with a [`TaskSlice`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use scx_bvt_core::*;
//!
//! let scenario = Scenario::builder()
//!     .cpus(1)
//!     .add_vcpu("web", DomainId(1), CpuId(0), VcpuBehavior::cpu_bound())
//!     .add_vcpu("batch", DomainId(2), CpuId(0), VcpuBehavior::cpu_bound())
//!     .duration_ms(100)
//!     .build();
//!
//! let result = Simulator::new(&scenario).unwrap().run();
//! result.trace.dump();
//! ```

pub mod config;
pub mod control;
mod dump;
pub mod entity;
pub mod error;
pub mod lifecycle;
pub mod runqueue;
pub mod sched;
pub mod sim;
pub mod timer;
pub mod types;
pub mod vtime;
pub mod warp;

pub use config::SchedConfig;
pub use entity::{BvtEntity, EntityParams, WarpState};
pub use error::SchedError;
pub use runqueue::{RunQueue, ScanResult};
pub use sched::{BvtScheduler, TaskSlice};
pub use sim::{
    Phase, RepeatMode, Scenario, SimClock, SimKicker, SimScheduler, SimTimers, SimulationResult,
    Simulator, Trace, TraceEvent, TraceKind, VcpuBehavior, VcpuDef, VcpuSummary,
};
pub use timer::{Clock, Kicker, TimerEvent, TimerFacility, TimerHandle};
pub use types::{CpuId, DomainId, EntityId, TimeNs, Vtime, NSEC_PER_MSEC, NSEC_PER_SEC, NSEC_PER_USEC};
pub use vtime::{compute_avt, compute_evt, MCU};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Deterministic in-process collaborators and an event-driven simulator.
//!
//! [`SimClock`], [`SimTimers`] and [`SimKicker`] implement the collaborator
//! traits over shared in-memory state, so a test can hold clones of them
//! while the scheduler owns the originals. [`Simulator`] drives a
//! [`BvtScheduler`] with scripted vCPU workloads described by a
//! [`Scenario`] and records what happened in a [`Trace`].

mod clock;
mod engine;
mod scenario;
mod timers;
mod trace;
mod vcpu;

pub use clock::SimClock;
pub use engine::{SimulationResult, Simulator, VcpuSummary};
pub use scenario::{Phase, RepeatMode, Scenario, ScenarioBuilder, VcpuBehavior, VcpuDef};
pub use timers::{SimKicker, SimTimers};
pub use trace::{Trace, TraceEvent, TraceKind};

use crate::sched::BvtScheduler;

/// The scheduler wired to the simulated collaborators.
pub type SimScheduler = BvtScheduler<SimClock, SimTimers, SimKicker>;

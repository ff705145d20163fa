//! Errors surfaced by the control interface and lifecycle hooks.
//!
//! Scheduling itself never fails: the idle entity is always a valid choice.
//! Broken invariants (scanning an empty queue, inserting an entity twice,
//! a timer firing for a destroyed entity) are defects and panic instead.

use std::fmt;

use crate::types::{CpuId, EntityId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// A parameter was rejected; the previous value is left in place.
    InvalidArgument(String),
    /// Scheduler-private state for a new entity could not be allocated.
    ResourceExhausted { cpu: CpuId },
    /// The entity handle does not name a live entity.
    NoSuchEntity(EntityId),
    /// The CPU is outside the set created at startup.
    NoSuchCpu(CpuId),
    /// The entity is queued or running and cannot be torn down or moved.
    Busy(EntityId),
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::InvalidArgument(what) => write!(f, "invalid argument: {what}"),
            SchedError::ResourceExhausted { cpu } => {
                write!(f, "no room for another entity on cpu {}", cpu.0)
            }
            SchedError::NoSuchEntity(id) => write!(f, "no such entity {id}"),
            SchedError::NoSuchCpu(cpu) => write!(f, "no such cpu {}", cpu.0),
            SchedError::Busy(id) => write!(f, "entity {id} is queued or running"),
        }
    }
}

impl std::error::Error for SchedError {}

use serde::{Deserialize, Serialize};

use crate::entity::EntityParams;
use crate::error::SchedError;
use crate::types::{TimeNs, NSEC_PER_MSEC, NSEC_PER_SEC};

/// Default context-switch allowance.
pub const DEFAULT_CTX_ALLOW_NS: TimeNs = 5 * NSEC_PER_MSEC;
/// Largest context-switch allowance accepted.
pub const MAX_CTX_ALLOW_NS: TimeNs = NSEC_PER_SEC;
/// Default number of vCPUs one physical CPU may carry.
pub const DEFAULT_MAX_ENTITIES_PER_CPU: usize = 64;

/// Scheduler configuration, fixed at construction apart from `ctx_allow_ns`
/// which the control interface may change later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedConfig {
    /// Number of physical CPUs. Per-CPU state is sized once from this.
    pub nr_cpus: u32,
    /// Added to every slice so two entities with nearly equal evt do not
    /// switch back and forth on every tick.
    pub ctx_allow_ns: TimeNs,
    /// Arena capacity per CPU, idle entity not counted.
    pub max_entities_per_cpu: usize,
    /// Parameters given to every new entity.
    pub defaults: EntityParams,
}

impl Default for SchedConfig {
    fn default() -> Self {
        SchedConfig {
            nr_cpus: 1,
            ctx_allow_ns: DEFAULT_CTX_ALLOW_NS,
            max_entities_per_cpu: DEFAULT_MAX_ENTITIES_PER_CPU,
            defaults: EntityParams::default(),
        }
    }
}

impl SchedConfig {
    pub fn validate(&self) -> Result<(), SchedError> {
        if self.nr_cpus == 0 {
            return Err(SchedError::InvalidArgument(
                "at least one cpu is required".into(),
            ));
        }
        validate_ctx_allow(self.ctx_allow_ns)?;
        self.defaults.validate()
    }
}

/// A zero allowance allows zero-length slices; the upper bound keeps slice
/// arithmetic far from overflow.
pub(crate) fn validate_ctx_allow(ns: TimeNs) -> Result<(), SchedError> {
    if ns == 0 {
        return Err(SchedError::InvalidArgument(
            "ctx_allow must be non-zero".into(),
        ));
    }
    if ns > MAX_CTX_ALLOW_NS {
        return Err(SchedError::InvalidArgument(format!(
            "ctx_allow {ns}ns exceeds {MAX_CTX_ALLOW_NS}ns"
        )));
    }
    Ok(())
}

//! Per-entity and global tuning.

use log::{info, warn};

use crate::config::validate_ctx_allow;
use crate::entity::{EntityParams, WarpState};
use crate::error::SchedError;
use crate::sched::BvtScheduler;
use crate::timer::{Clock, Kicker, TimerFacility};
use crate::types::{EntityId, TimeNs};
use crate::warp;

impl<C: Clock, T: TimerFacility, K: Kicker> BvtScheduler<C, T, K> {
    pub fn get_params(&self, id: EntityId) -> Result<EntityParams, SchedError> {
        self.with_entity(id, |_, rq| Ok(rq[id].params))
    }

    /// Replace the parameters of an entity.
    ///
    /// Invalid parameters are rejected and the old ones stay in force.
    /// Raising `warp_requested` starts borrowing right away (unless the
    /// entity is sitting out its unwarp period), lowering it disarms any
    /// pending warp timer. A new `warp_value` applies to evt immediately; new
    /// limit and unwarp periods apply from the next timer armed.
    pub fn set_params(&self, id: EntityId, params: EntityParams) -> Result<(), SchedError> {
        if let Err(e) = params.validate() {
            warn!("{id}: rejected parameters {params:?}: {e}");
            return Err(e);
        }

        let cpu = self.with_entity(id, |pcpu, rq| {
            let idle = rq.idle();
            let entity = rq.entity_mut(id).ok_or(SchedError::NoSuchEntity(id))?;
            if id == idle {
                return Err(SchedError::InvalidArgument(format!(
                    "{id} is the idle entity of cpu {}",
                    pcpu.id().0
                )));
            }

            entity.params = params;
            if params.warp_requested {
                warp::request(entity);
            } else if entity.warp != WarpState::Normal {
                warp::stop(entity, &self.timers);
            }
            entity.refresh_evt();
            Ok(pcpu.id())
        })?;

        // evt may have moved either way; let the CPU re-pick.
        self.kicker.request_reschedule(cpu);
        Ok(())
    }

    /// Change the context-switch allowance. Zero and anything above
    /// [`MAX_CTX_ALLOW_NS`](crate::config::MAX_CTX_ALLOW_NS) are rejected.
    pub fn set_ctx_allow(&self, ns: TimeNs) -> Result<(), SchedError> {
        if let Err(e) = validate_ctx_allow(ns) {
            warn!("rejected ctx_allow: {e}");
            return Err(e);
        }
        self.store_ctx_allow(ns);
        info!("ctx_allow set to {ns}ns");
        Ok(())
    }
}

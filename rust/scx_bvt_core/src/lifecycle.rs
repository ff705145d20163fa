//! Entity lifecycle hooks: create, destroy, wake, sleep and migrate.
//!
//! The idle entity of every CPU is bootstrapped by [`BvtScheduler::new`] and
//! never goes through these hooks.

use log::{debug, warn};

use crate::entity::BvtEntity;
use crate::error::SchedError;
use crate::sched::{BvtScheduler, SliceTimer};
use crate::timer::{Clock, Kicker, TimerEvent, TimerFacility};
use crate::types::{CpuId, DomainId, EntityId};
use crate::vtime::{compute_avt, compute_evt, lead_to_ns};

impl<C: Clock, T: TimerFacility, K: Kicker> BvtScheduler<C, T, K> {
    /// Allocate scheduler state for a new vCPU of `domain` on `cpu`.
    ///
    /// The entity starts asleep, with the default parameters and level with
    /// the CPU's svt.
    pub fn create(&self, domain: DomainId, cpu: CpuId) -> Result<EntityId, SchedError> {
        let pcpu = self.pcpu(cpu)?;
        let mut placement = self.write_placement();
        let mut rq = pcpu.lock_rq();

        let id = self.alloc_id();
        let entity = BvtEntity::new(id, domain, cpu, self.defaults, rq.svt());
        if rq.adopt(entity).is_err() {
            warn!("cpu {}: cannot host another entity", cpu.0);
            return Err(SchedError::ResourceExhausted { cpu });
        }
        placement.insert(id, cpu);

        debug!("{id}: created on cpu {} for domain {}", cpu.0, domain.0);
        Ok(id)
    }

    /// Tear an entity down: disarm its warp timer, dequeue it and free its
    /// slot, all in one critical section.
    ///
    /// The running entity cannot be destroyed; sleep it and let the CPU
    /// reschedule first.
    pub fn destroy(&self, id: EntityId) -> Result<(), SchedError> {
        let mut placement = self.write_placement();
        let cpu = *placement.get(&id).ok_or(SchedError::NoSuchEntity(id))?;
        let pcpu = self.expect_pcpu(cpu);
        let mut rq = pcpu.lock_rq();

        if id == rq.idle() {
            return Err(SchedError::InvalidArgument(format!(
                "{id} is the idle entity of cpu {}",
                cpu.0
            )));
        }
        if pcpu.lock_current().curr == id {
            return Err(SchedError::Busy(id));
        }

        let entity = rq.release(id).ok_or(SchedError::NoSuchEntity(id))?;
        if let Some(handle) = entity.warp.armed_timer() {
            self.timers.disarm(handle);
        }
        placement.remove(&id);

        debug!("{id}: destroyed");
        Ok(())
    }

    /// Mark an entity runnable and queue it at the head of its CPU.
    ///
    /// An entity that slept for long has its avt pulled up to svt, so it
    /// cannot hoard the virtual time it did not use. The CPU is asked to
    /// reschedule if the woken entity should run now; otherwise the slice
    /// timer is pulled in to the moment it would overtake the running one.
    pub fn wake(&self, id: EntityId) -> Result<(), SchedError> {
        let now = self.clock.now();
        let kick = self.with_entity(id, |pcpu, rq| {
            let cpu = pcpu.id();
            let svt = rq.svt();
            let idle = rq.idle();
            if id == idle {
                return Ok(None);
            }

            let entity = rq.entity_mut(id).ok_or(SchedError::NoSuchEntity(id))?;
            entity.runnable = true;
            if entity.queued {
                return Ok(None);
            }
            if entity.avt < svt || entity.migrated {
                entity.avt = svt;
                entity.migrated = false;
            }
            entity.refresh_evt();
            let woken_evt = entity.evt;
            rq.insert_head(id);

            let mut cur = pcpu.lock_current();
            if cur.curr == idle {
                return Ok(Some(cpu));
            }

            let running = &rq[cur.curr];
            let elapsed = now.saturating_sub(cur.last_scheduled);
            let curr_evt = compute_evt(running, compute_avt(running, elapsed));
            if woken_evt < curr_evt {
                debug!("{id}: woken with evt {woken_evt} ahead of {}", running.id);
                return Ok(Some(cpu));
            }

            // curr_evt is as of now, so the lead is run off from now.
            let overtake = now
                .saturating_add(lead_to_ns(
                    woken_evt.lead_over(curr_evt),
                    running.params.mcu_advance,
                ))
                .saturating_add(self.ctx_allow());
            match cur.slice_timer {
                Some(st) if st.deadline > overtake => {
                    self.timers.disarm(st.handle);
                    let deadline = overtake;
                    let handle = self
                        .timers
                        .arm(cpu, deadline, TimerEvent::SliceExpired { cpu });
                    cur.slice_timer = Some(SliceTimer { deadline, handle });
                    debug!("cpu {}: slice cut to {deadline} for {id}", cpu.0);
                }
                _ => {}
            }
            Ok(None)
        })?;

        if let Some(cpu) = kick {
            self.kicker.request_reschedule(cpu);
        }
        Ok(())
    }

    /// Mark an entity not runnable. A running entity stays on the queue
    /// until its CPU reschedules; anything else is dequeued right away.
    /// Sleeping twice is harmless.
    pub fn sleep(&self, id: EntityId) -> Result<(), SchedError> {
        let kick = self.with_entity(id, |pcpu, rq| {
            if id == rq.idle() {
                return Err(SchedError::InvalidArgument(format!(
                    "{id} is the idle entity of cpu {}",
                    pcpu.id().0
                )));
            }
            let entity = rq.entity_mut(id).ok_or(SchedError::NoSuchEntity(id))?;
            if !entity.runnable {
                return Ok(None);
            }
            entity.runnable = false;

            if pcpu.lock_current().curr == id {
                Ok(Some(pcpu.id()))
            } else {
                rq.remove(id);
                Ok(None)
            }
        })?;

        if let Some(cpu) = kick {
            self.kicker.request_reschedule(cpu);
        }
        Ok(())
    }

    /// Move a sleeping entity to another CPU. Its avt is re-floored to the
    /// new CPU's svt when it next wakes.
    pub fn migrate(&self, id: EntityId, to: CpuId) -> Result<(), SchedError> {
        let dst_pcpu = self.pcpu(to)?;
        let mut placement = self.write_placement();
        let from = *placement.get(&id).ok_or(SchedError::NoSuchEntity(id))?;
        if from == to {
            return Ok(());
        }
        let src_pcpu = self.expect_pcpu(from);

        // Two run queues at once: lowest CPU first.
        let (mut src, mut dst) = if from < to {
            let src = src_pcpu.lock_rq();
            (src, dst_pcpu.lock_rq())
        } else {
            let dst = dst_pcpu.lock_rq();
            (src_pcpu.lock_rq(), dst)
        };

        if id == src.idle() {
            return Err(SchedError::InvalidArgument(format!(
                "{id} is the idle entity of cpu {}",
                from.0
            )));
        }
        if src.is_queued(id) || src_pcpu.lock_current().curr == id {
            return Err(SchedError::Busy(id));
        }

        let mut entity = src.release(id).ok_or(SchedError::NoSuchEntity(id))?;
        entity.cpu = to;
        entity.migrated = true;
        if let Err(mut entity) = dst.adopt(entity) {
            entity.cpu = from;
            entity.migrated = false;
            if src.adopt(entity).is_err() {
                panic!("{id}: lost its slot on cpu {} during migration", from.0);
            }
            return Err(SchedError::ResourceExhausted { cpu: to });
        }
        placement.insert(id, to);

        debug!("{id}: migrated from cpu {} to cpu {}", from.0, to.0);
        Ok(())
    }
}

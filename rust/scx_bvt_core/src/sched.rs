//! The scheduling decision engine.
//!
//! `BvtScheduler` owns one [`CpuSched`] per physical CPU, created up front
//! from the configuration. Each carries two lock domains:
//!
//! - the run-queue lock: the entity arena, the queue of runnable handles and
//!   svt (everything in [`RunQueue`]);
//! - the current lock: which entity the CPU runs, since when, and the armed
//!   slice timer.
//!
//! Lock order is placement, then run queue, then current, always on the same
//! CPU. The placement map (entity -> CPU) is only held across run-queue locks
//! by destroy and migrate; everyone else reads it, drops it and then locks
//! the run queue, re-checking ownership afterwards.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info};

use crate::config::SchedConfig;
use crate::entity::{BvtEntity, EntityParams, WarpState};
use crate::error::SchedError;
use crate::runqueue::RunQueue;
use crate::timer::{Clock, Kicker, TimerEvent, TimerFacility, TimerHandle};
use crate::types::{CpuId, EntityId, TimeNs, Vtime};
use crate::vtime::{compute_avt, compute_evt, lead_to_ns};
use crate::warp;

/// A scheduling decision: run `next` for `slice_ns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSlice {
    pub next: EntityId,
    pub slice_ns: TimeNs,
}

/// Armed slice timer of a CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SliceTimer {
    pub(crate) deadline: TimeNs,
    pub(crate) handle: TimerHandle,
}

/// What a CPU is running right now.
#[derive(Debug)]
pub(crate) struct Current {
    pub(crate) curr: EntityId,
    pub(crate) last_scheduled: TimeNs,
    pub(crate) slice_timer: Option<SliceTimer>,
}

/// Scheduling state of one physical CPU.
#[derive(Debug)]
pub struct CpuSched {
    id: CpuId,
    rq: Mutex<RunQueue>,
    current: Mutex<Current>,
}

impl CpuSched {
    pub fn id(&self) -> CpuId {
        self.id
    }

    pub(crate) fn lock_rq(&self) -> MutexGuard<'_, RunQueue> {
        self.rq.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_current(&self) -> MutexGuard<'_, Current> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Borrowed Virtual Time scheduler over all physical CPUs.
pub struct BvtScheduler<C: Clock, T: TimerFacility, K: Kicker> {
    cpus: Vec<CpuSched>,
    placement: RwLock<BTreeMap<EntityId, CpuId>>,
    next_id: AtomicU32,
    ctx_allow: AtomicU64,
    pub(crate) defaults: EntityParams,
    pub(crate) clock: C,
    pub(crate) timers: T,
    pub(crate) kicker: K,
}

impl<C: Clock, T: TimerFacility, K: Kicker> BvtScheduler<C, T, K> {
    /// Build the per-CPU state for `config.nr_cpus` CPUs and bootstrap an
    /// idle entity on each, queued and current.
    ///
    /// A configuration that cannot be honoured fails here rather than on
    /// some later scheduling call.
    pub fn new(config: &SchedConfig, clock: C, timers: T, kicker: K) -> Result<Self, SchedError> {
        config.validate()?;

        let now = clock.now();
        let mut placement = BTreeMap::new();
        let cpus: Vec<CpuSched> = (0..config.nr_cpus)
            .map(|i| {
                let id = CpuId(i);
                let idle = EntityId(i);
                placement.insert(idle, id);
                CpuSched {
                    id,
                    rq: Mutex::new(RunQueue::new(id, idle, config.max_entities_per_cpu)),
                    current: Mutex::new(Current {
                        curr: idle,
                        last_scheduled: now,
                        slice_timer: None,
                    }),
                }
            })
            .collect();

        let sched = BvtScheduler {
            cpus,
            placement: RwLock::new(placement),
            next_id: AtomicU32::new(config.nr_cpus),
            ctx_allow: AtomicU64::new(config.ctx_allow_ns),
            defaults: config.defaults,
            clock,
            timers,
            kicker,
        };
        info!("{}", sched.dump_settings());
        Ok(sched)
    }

    pub fn nr_cpus(&self) -> u32 {
        self.cpus.len() as u32
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Context-switch allowance added to every computed slice.
    pub fn ctx_allow(&self) -> TimeNs {
        self.ctx_allow.load(Ordering::Relaxed)
    }

    pub(crate) fn store_ctx_allow(&self, ns: TimeNs) {
        self.ctx_allow.store(ns, Ordering::Relaxed);
    }

    pub(crate) fn alloc_id(&self) -> EntityId {
        EntityId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn pcpu(&self, cpu: CpuId) -> Result<&CpuSched, SchedError> {
        self.cpus.get(cpu.index()).ok_or(SchedError::NoSuchCpu(cpu))
    }

    /// Per-CPU state that must exist. Asking for a CPU that was never
    /// created is a configuration defect in the caller.
    pub(crate) fn expect_pcpu(&self, cpu: CpuId) -> &CpuSched {
        self.cpus
            .get(cpu.index())
            .unwrap_or_else(|| panic!("no scheduler state for cpu {}", cpu.0))
    }

    pub(crate) fn read_placement(&self) -> RwLockReadGuard<'_, BTreeMap<EntityId, CpuId>> {
        self.placement.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_placement(&self) -> RwLockWriteGuard<'_, BTreeMap<EntityId, CpuId>> {
        self.placement.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// CPU an entity is assigned to.
    pub fn cpu_of(&self, id: EntityId) -> Result<CpuId, SchedError> {
        self.read_placement()
            .get(&id)
            .copied()
            .ok_or(SchedError::NoSuchEntity(id))
    }

    /// Run `f` with the run queue owning `id` locked.
    ///
    /// The placement lookup and the run-queue lock are taken one after the
    /// other, so a migration may slip in between; ownership is re-checked
    /// under the lock and the lookup retried.
    pub(crate) fn with_entity<R>(
        &self,
        id: EntityId,
        f: impl FnOnce(&CpuSched, &mut RunQueue) -> Result<R, SchedError>,
    ) -> Result<R, SchedError> {
        loop {
            let cpu = self.cpu_of(id)?;
            let pcpu = self.expect_pcpu(cpu);
            let mut rq = pcpu.lock_rq();
            if rq.contains(id) {
                return f(pcpu, &mut rq);
            }
        }
    }

    /// Snapshot of an entity's scheduler state.
    pub fn entity(&self, id: EntityId) -> Result<BvtEntity, SchedError> {
        self.with_entity(id, |_, rq| Ok(rq[id].clone()))
    }

    /// Whether the entity sits on its CPU's run queue.
    pub fn is_queued(&self, id: EntityId) -> Result<bool, SchedError> {
        self.with_entity(id, |_, rq| Ok(rq.is_queued(id)))
    }

    /// Entity the CPU is running.
    pub fn current(&self, cpu: CpuId) -> Result<EntityId, SchedError> {
        Ok(self.pcpu(cpu)?.lock_current().curr)
    }

    /// Idle entity of a CPU.
    pub fn idle_of(&self, cpu: CpuId) -> Result<EntityId, SchedError> {
        Ok(self.pcpu(cpu)?.lock_rq().idle())
    }

    /// System virtual time of a CPU.
    pub fn svt(&self, cpu: CpuId) -> Result<Vtime, SchedError> {
        Ok(self.pcpu(cpu)?.lock_rq().svt())
    }

    /// Queued handles of a CPU in queue order.
    pub fn queue_order(&self, cpu: CpuId) -> Result<Vec<EntityId>, SchedError> {
        Ok(self.pcpu(cpu)?.lock_rq().queued().collect())
    }

    /// Deadline of the armed slice timer of a CPU.
    pub fn slice_deadline(&self, cpu: CpuId) -> Result<Option<TimeNs>, SchedError> {
        Ok(self
            .pcpu(cpu)?
            .lock_current()
            .slice_timer
            .map(|st| st.deadline))
    }

    /// Decide what `cpu` runs next and for how long.
    ///
    /// Charges the previous entity for the time since it was scheduled,
    /// moves it to the back of the queue if it is still runnable, picks the
    /// lowest evt and sizes the slice so that it runs until it would pass
    /// the runner-up, plus the context-switch allowance. Arms the slice
    /// timer at the returned deadline.
    ///
    /// Never fails: with nothing runnable the idle entity is chosen.
    pub fn do_schedule(&self, cpu: CpuId, now: TimeNs) -> TaskSlice {
        let pcpu = self.expect_pcpu(cpu);
        let mut rq = pcpu.lock_rq();
        let mut cur = pcpu.lock_current();

        let prev = cur.curr;
        if prev != rq.idle() {
            let elapsed = now.saturating_sub(cur.last_scheduled);
            let entity = rq
                .entity_mut(prev)
                .unwrap_or_else(|| panic!("running entity {prev} missing from cpu {}", cpu.0));
            entity.avt = compute_avt(entity, elapsed);
            entity.evt = compute_evt(entity, entity.avt);
            let runnable = entity.runnable;

            rq.remove(prev);
            if runnable {
                rq.insert_tail(prev);
            }
        }

        let scan = rq.scan_min_two();
        if let Some(min_avt) = scan.min_avt {
            rq.svt = min_avt;
        }
        if rq.rebase() {
            info!("cpu {}: virtual time rebased, svt={}", cpu.0, rq.svt());
        }

        let ctx_allow = self.ctx_allow();
        let slice_ns = if scan.next == rq.idle() {
            ctx_allow
        } else if let Some(next_prime) = scan.next_prime {
            let next = &rq[scan.next];
            let prime = &rq[next_prime];
            assert!(
                prime.evt >= next.evt,
                "scan returned runner-up {} ahead of {}",
                prime.id,
                next.id
            );
            lead_to_ns(prime.evt.lead_over(next.evt), next.params.mcu_advance)
                .saturating_add(ctx_allow)
        } else {
            // Nobody to yield to.
            ctx_allow.saturating_mul(10)
        };

        if let Some(next) = rq.entity_mut(scan.next) {
            warp::arm_limit(next, cpu, now, &self.timers);
        }

        if let Some(old) = cur.slice_timer.take() {
            self.timers.disarm(old.handle);
        }
        let deadline = now.saturating_add(slice_ns);
        let handle = self
            .timers
            .arm(cpu, deadline, TimerEvent::SliceExpired { cpu });
        cur.slice_timer = Some(SliceTimer { deadline, handle });
        cur.curr = scan.next;
        cur.last_scheduled = now;

        debug!(
            "cpu {}: prev={} next={} next_prime={:?} slice={}ns svt={}",
            cpu.0,
            prev,
            scan.next,
            scan.next_prime,
            slice_ns,
            rq.svt()
        );

        TaskSlice {
            next: scan.next,
            slice_ns,
        }
    }

    /// Deliver an expired timer.
    ///
    /// Warp timers only update the entity's warp state under its run-queue
    /// lock and then ask for a reschedule of its CPU; the decision engine is
    /// never entered from here.
    ///
    /// A slice timer that is no longer the CPU's armed one lost a race with
    /// a reschedule and is dropped.
    ///
    /// # Panics
    /// Panics if a warp timer belongs to a destroyed entity or is not the one
    /// the entity holds: warp timers are disarmed before their owner
    /// changes, so a late delivery means the timer facility broke its
    /// contract.
    pub fn timer_fired(&self, handle: TimerHandle, event: TimerEvent) {
        match event {
            TimerEvent::SliceExpired { cpu } => {
                let pcpu = self.expect_pcpu(cpu);
                let mut cur = pcpu.lock_current();
                // Raced with a reschedule that armed a replacement.
                if cur.slice_timer.map(|st| st.handle) != Some(handle) {
                    debug!("cpu {}: ignoring stale slice timer {handle:?}", cpu.0);
                    return;
                }
                cur.slice_timer = None;
                drop(cur);
                self.kicker.request_reschedule(cpu);
            }
            TimerEvent::WarpLimit { entity } | TimerEvent::Unwarp { entity } => {
                let now = self.clock.now();
                let result = self.with_entity(entity, |pcpu, rq| {
                    let cpu = pcpu.id();
                    let e = rq
                        .entity_mut(entity)
                        .ok_or(SchedError::NoSuchEntity(entity))?;
                    let resched = match event {
                        TimerEvent::WarpLimit { .. } => {
                            warp::limit_expired(e, handle, cpu, now, &self.timers)
                        }
                        _ => warp::unwarp_expired(e, handle),
                    };
                    Ok((cpu, resched))
                });
                match result {
                    Ok((cpu, true)) => self.kicker.request_reschedule(cpu),
                    Ok((_, false)) => {}
                    Err(_) => panic!("{event:?} fired for destroyed entity {entity}"),
                }
            }
        }
    }

    /// Warp state of an entity, for diagnostics.
    pub fn warp_state(&self, id: EntityId) -> Result<WarpState, SchedError> {
        self.with_entity(id, |_, rq| Ok(rq[id].warp))
    }
}

//! Per-CPU run queue.
//!
//! Each physical CPU owns an arena of the entities assigned to it and an
//! ordered queue of handles of the runnable ones. The queue is kept in
//! insertion order, not evt order: the decision engine finds the two lowest
//! evts with a linear scan, which is cheap for the handful of vCPUs a CPU
//! usually carries. Entities woken up go to the head, entities that have
//! just run go to the tail, and because the scan keeps the first of equal
//! evts this gives round-robin among equal-priority entities.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Index;

use crate::entity::BvtEntity;
use crate::types::{CpuId, EntityId, Vtime};

/// Outcome of [`RunQueue::scan_min_two`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanResult {
    /// Entity with the smallest evt (the idle entity if nothing else runs).
    pub next: EntityId,
    /// Entity with the second smallest evt, `None` if only the idle entity
    /// competes with `next`.
    pub next_prime: Option<EntityId>,
    /// Smallest avt among queued entities, `None` if only idle is queued.
    pub min_avt: Option<Vtime>,
}

/// Run queue state of one physical CPU, protected by its run-queue lock.
#[derive(Debug)]
pub struct RunQueue {
    cpu: CpuId,
    idle: EntityId,
    entities: BTreeMap<EntityId, BvtEntity>,
    order: VecDeque<EntityId>,
    /// System virtual time: the avt floor of this CPU.
    pub(crate) svt: Vtime,
    capacity: usize,
}

impl RunQueue {
    /// Create the run queue of `cpu` with its idle entity queued at the head.
    ///
    /// `capacity` bounds the number of non-idle entities in the arena.
    pub fn new(cpu: CpuId, idle: EntityId, capacity: usize) -> Self {
        let mut rq = RunQueue {
            cpu,
            idle,
            entities: BTreeMap::new(),
            order: VecDeque::new(),
            svt: Vtime::ZERO,
            capacity,
        };
        rq.entities.insert(idle, BvtEntity::idle(idle, cpu));
        rq.insert_head(idle);
        rq
    }

    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    pub fn idle(&self) -> EntityId {
        self.idle
    }

    pub fn svt(&self) -> Vtime {
        self.svt
    }

    pub fn entity(&self, id: EntityId) -> Option<&BvtEntity> {
        self.entities.get(&id)
    }

    pub(crate) fn entity_mut(&mut self, id: EntityId) -> Option<&mut BvtEntity> {
        self.entities.get_mut(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Number of non-idle entities in the arena.
    pub fn nr_entities(&self) -> usize {
        self.entities.len() - 1
    }

    /// Add an entity to the arena. Hands it back if the arena is full.
    pub(crate) fn adopt(&mut self, entity: BvtEntity) -> Result<(), BvtEntity> {
        if self.nr_entities() >= self.capacity {
            return Err(entity);
        }
        assert!(
            !entity.queued,
            "entity {} adopted while still queued elsewhere",
            entity.id
        );
        self.entities.insert(entity.id, entity);
        Ok(())
    }

    /// Take an entity out of the arena, dequeuing it first.
    pub(crate) fn release(&mut self, id: EntityId) -> Option<BvtEntity> {
        assert!(id != self.idle, "the idle entity cannot leave its cpu");
        self.remove(id);
        self.entities.remove(&id)
    }

    /// Queue an entity in front of everything else.
    ///
    /// # Panics
    /// Panics if the entity is not in the arena or already queued.
    pub fn insert_head(&mut self, id: EntityId) {
        self.mark_queued(id);
        self.order.push_front(id);
    }

    /// Queue an entity behind everything else.
    ///
    /// # Panics
    /// Panics if the entity is not in the arena or already queued.
    pub fn insert_tail(&mut self, id: EntityId) {
        self.mark_queued(id);
        self.order.push_back(id);
    }

    fn mark_queued(&mut self, id: EntityId) {
        let cpu = self.cpu;
        let entity = self
            .entities
            .get_mut(&id)
            .unwrap_or_else(|| panic!("entity {id} is not owned by cpu {}", cpu.0));
        assert!(!entity.queued, "entity {id} inserted twice on cpu {}", cpu.0);
        entity.queued = true;
    }

    /// Dequeue an entity. Returns whether it was queued.
    pub fn remove(&mut self, id: EntityId) -> bool {
        let Some(entity) = self.entities.get_mut(&id) else {
            return false;
        };
        if !entity.queued {
            return false;
        }
        entity.queued = false;
        if let Some(pos) = self.order.iter().position(|&queued| queued == id) {
            self.order.remove(pos);
        }
        true
    }

    pub fn is_queued(&self, id: EntityId) -> bool {
        self.entities.get(&id).is_some_and(|e| e.queued)
    }

    /// Number of queued entities, idle included.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Queued handles in queue order.
    pub fn queued(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.order.iter().copied()
    }

    /// Find the lowest and second lowest evt, and the lowest avt, in one
    /// pass over the queue. Of two equal evts the one met first wins.
    ///
    /// # Panics
    /// Panics if the queue is empty, which means the idle entity was lost.
    pub fn scan_min_two(&self) -> ScanResult {
        assert!(
            !self.order.is_empty(),
            "run queue of cpu {} is empty, idle entity missing",
            self.cpu.0
        );

        let mut next = self.idle;
        let mut next_evt = Vtime::IDLE;
        let mut next_prime = self.idle;
        let mut next_prime_evt = Vtime::IDLE;
        let mut min_avt = Vtime::IDLE;

        for &id in &self.order {
            let p = &self.entities[&id];
            if p.evt < next_evt {
                next_prime = next;
                next_prime_evt = next_evt;
                next = id;
                next_evt = p.evt;
            } else if next_prime_evt == Vtime::IDLE || p.evt < next_prime_evt {
                next_prime = id;
                next_prime_evt = p.evt;
            }
            min_avt = min_avt.min(p.avt);
        }

        ScanResult {
            next,
            next_prime: (next_prime != self.idle).then_some(next_prime),
            min_avt: (min_avt != Vtime::IDLE).then_some(min_avt),
        }
    }

    /// Rebase the virtual time domain once svt has climbed to the high-water
    /// mark. Returns whether a rebase happened.
    ///
    /// svt and every non-idle vtime on the CPU move down by the same
    /// constant, so all orderings and distances between queued entities are
    /// kept. Sleeping entities left far behind bottom out at zero, which the
    /// avt floor on wake would have done anyway.
    pub(crate) fn rebase(&mut self) -> bool {
        if self.svt < Vtime::HIGH_WATER {
            return false;
        }
        for entity in self.entities.values_mut().filter(|e| !e.is_idle()) {
            entity.avt = entity.avt.saturating_sub(Vtime::REBASE);
            entity.evt = entity.evt.saturating_sub(Vtime::REBASE);
        }
        self.svt = self.svt.saturating_sub(Vtime::REBASE);
        true
    }
}

impl Index<EntityId> for RunQueue {
    type Output = BvtEntity;

    /// # Panics
    /// Panics if the entity is not owned by this CPU.
    fn index(&self, id: EntityId) -> &BvtEntity {
        self.entities
            .get(&id)
            .unwrap_or_else(|| panic!("entity {id} is not owned by cpu {}", self.cpu.0))
    }
}

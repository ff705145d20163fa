#![allow(dead_code)]

use log::LevelFilter;
use simplelog::{Config, TestLogger};

use scx_bvt_core::*;

/// Route library logging into the captured test output.
///
/// `init` fails once a logger is installed, so only the first call in the
/// process takes effect.
pub fn setup_test() {
    let _ = TestLogger::init(LevelFilter::Debug, Config::default());
}

/// A scheduler over simulated collaborators, with handles kept on them.
pub struct Harness {
    pub sched: SimScheduler,
    pub clock: SimClock,
    pub timers: SimTimers,
    pub kicker: SimKicker,
}

impl Harness {
    pub fn new(nr_cpus: u32) -> Self {
        Self::with_config(SchedConfig {
            nr_cpus,
            ..SchedConfig::default()
        })
    }

    pub fn with_config(config: SchedConfig) -> Self {
        let clock = SimClock::new();
        let timers = SimTimers::new();
        let kicker = SimKicker::new();
        let sched =
            BvtScheduler::new(&config, clock.clone(), timers.clone(), kicker.clone()).unwrap();
        Harness {
            sched,
            clock,
            timers,
            kicker,
        }
    }

    pub fn now(&self) -> TimeNs {
        self.clock.now()
    }

    /// Move the clock to `now`, delivering every timer due on the way.
    pub fn advance_to(&self, now: TimeNs) {
        while let Some(deadline) = self.timers.next_deadline().filter(|&d| d <= now) {
            self.clock.set(deadline);
            let (handle, event) = self.timers.pop_due(deadline).unwrap();
            self.sched.timer_fired(handle, event);
        }
        self.clock.set(now);
    }

    /// Run the decision engine on `cpu` at the current time.
    pub fn schedule(&self, cpu: CpuId) -> TaskSlice {
        self.sched.do_schedule(cpu, self.clock.now())
    }

    /// Create and wake an entity with the given parameters.
    pub fn spawn(&self, domain: u32, cpu: CpuId, params: EntityParams) -> EntityId {
        let id = self.sched.create(DomainId(domain), cpu).unwrap();
        self.sched.set_params(id, params).unwrap();
        self.sched.wake(id).unwrap();
        id
    }
}

/// Entity parameters with the given weight and no warp.
pub fn weighted(mcu_advance: u32) -> EntityParams {
    EntityParams {
        mcu_advance,
        ..EntityParams::default()
    }
}

/// Entity parameters that warp by `warp_value`.
pub fn warping(warp_value: u32, limit_ns: TimeNs, unwarp_ns: TimeNs) -> EntityParams {
    EntityParams {
        warp_requested: true,
        warp_value,
        warp_limit_ns: limit_ns,
        warp_unwarp_ns: unwarp_ns,
        ..EntityParams::default()
    }
}

/// Assert the queue invariants of every CPU and of every entity in `ids`:
/// each CPU queues its idle entity and no handle twice, every runnable
/// entity is queued on its own CPU and nowhere else, a queued entity that
/// went to sleep is still running, and queued avts never fall below svt.
pub fn check_invariants(sched: &SimScheduler, ids: &[EntityId]) {
    let queues: Vec<Vec<EntityId>> = (0..sched.nr_cpus())
        .map(|cpu| sched.queue_order(CpuId(cpu)).unwrap())
        .collect();

    for (cpu, queue) in queues.iter().enumerate() {
        let cpu = CpuId(cpu as u32);
        let idle = sched.idle_of(cpu).unwrap();
        assert_eq!(
            queue.iter().filter(|&&id| id == idle).count(),
            1,
            "cpu {} lost its idle entity: {queue:?}",
            cpu.0
        );
        let mut sorted = queue.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), queue.len(), "duplicate handle on cpu {}", cpu.0);
    }

    for &id in ids {
        let cpu = sched.cpu_of(id).unwrap();
        let e = sched.entity(id).unwrap();
        assert_eq!(e.cpu, cpu, "{id} placed on cpu {} but owned by {}", cpu.0, e.cpu.0);

        for (other, queue) in queues.iter().enumerate() {
            let on_queue = queue.contains(&id);
            if other == cpu.index() {
                assert_eq!(on_queue, e.is_queued(), "{id} queue flag out of sync");
            } else {
                assert!(!on_queue, "{id} queued on foreign cpu {other}");
            }
        }

        if e.is_runnable() {
            assert!(e.is_queued(), "runnable {id} is not queued");
        } else if e.is_queued() {
            assert_eq!(
                sched.current(cpu).unwrap(),
                id,
                "sleeping {id} queued without running"
            );
        }

        if e.is_queued() {
            let svt = sched.svt(cpu).unwrap();
            assert!(svt <= e.avt, "{id} avt {} below svt {svt}", e.avt);
        }

        let expected_evt = if e.is_warping() {
            e.avt.saturating_sub(e.params.warp_value)
        } else {
            e.avt
        };
        assert_eq!(e.evt, expected_evt, "{id} evt out of step with avt");
    }
}

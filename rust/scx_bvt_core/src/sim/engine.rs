//! Event-driven simulation engine.
//!
//! Two sources of events drive the loop: the scheduler's own timers (slice
//! expiry and warp), armed on [`SimTimers`], and workload events (a vCPU
//! starting, waking up or finishing a Run phase) kept in a local heap.
//! Before time moves on, every CPU with a pending reschedule request goes
//! through the decision engine, the way a real CPU would act on a pending
//! reschedule on its way out of an interrupt.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};

use crate::error::SchedError;
use crate::sched::BvtScheduler;
use crate::sim::clock::SimClock;
use crate::sim::scenario::{Phase, Scenario};
use crate::sim::timers::{SimKicker, SimTimers};
use crate::sim::trace::{Trace, TraceKind};
use crate::sim::vcpu::{SimVcpu, VcpuState};
use crate::sim::SimScheduler;
use crate::timer::{Clock, Kicker};
use crate::types::{CpuId, DomainId, EntityId, TimeNs};

/// A workload event, ordered by timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Event {
    time_ns: TimeNs,
    /// Tiebreaker for events at the same time (lower = earlier).
    seq: u64,
    kind: EventKind,
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.time_ns
            .cmp(&other.time_ns)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    /// A vCPU enters its first phase.
    Start { vcpu: usize },
    /// A vCPU's Sleep phase is over.
    WakeUp { vcpu: usize },
    /// The Run phase of whatever `cpu` runs is over. Stale once the CPU has
    /// rescheduled, which bumps its epoch.
    PhaseComplete { cpu: CpuId, epoch: u64 },
}

/// A vCPU executing on a CPU.
#[derive(Debug, Clone, Copy)]
struct RunningSlot {
    vcpu: usize,
    since: TimeNs,
    epoch: u64,
}

/// Per-vCPU outcome of a simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcpuSummary {
    pub name: String,
    pub id: EntityId,
    pub domain: DomainId,
    pub cpu: CpuId,
    pub runtime_ns: TimeNs,
    pub schedule_count: usize,
    pub exited: bool,
}

/// Everything a finished simulation reports.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub trace: Trace,
    pub vcpus: Vec<VcpuSummary>,
    /// Scheduler settings line.
    pub settings: String,
    /// Run queue dump of every CPU at the end of the run.
    pub cpu_dumps: Vec<String>,
    /// Simulated time the run stopped at.
    pub end_ns: TimeNs,
}

impl SimulationResult {
    pub fn vcpu(&self, name: &str) -> Option<&VcpuSummary> {
        self.vcpus.iter().find(|v| v.name == name)
    }

    pub fn id_of(&self, name: &str) -> Option<EntityId> {
        self.vcpu(name).map(|v| v.id)
    }

    /// CPU time the named vCPU received, zero if there is no such vCPU.
    pub fn runtime_of(&self, name: &str) -> TimeNs {
        self.vcpu(name).map_or(0, |v| v.runtime_ns)
    }
}

/// Drives a [`SimScheduler`] through a [`Scenario`].
pub struct Simulator {
    sched: SimScheduler,
    clock: SimClock,
    timers: SimTimers,
    kicker: SimKicker,
    vcpus: Vec<SimVcpu>,
    by_id: HashMap<EntityId, usize>,
    idle: Vec<EntityId>,
    running: Vec<Option<RunningSlot>>,
    cpu_idle: Vec<bool>,
    /// Exited vCPUs whose entity still has to be destroyed.
    zombies: Vec<usize>,
    events: BinaryHeap<Reverse<Event>>,
    seq: u64,
    epoch: u64,
    duration_ns: TimeNs,
    trace: Trace,
    shutdown: Option<Arc<AtomicBool>>,
}

impl Simulator {
    /// Build the scheduler for the scenario's configuration and create one
    /// entity per vCPU, with its parameters applied.
    pub fn new(scenario: &Scenario) -> Result<Self, SchedError> {
        let clock = SimClock::new();
        let timers = SimTimers::new();
        let kicker = SimKicker::new();
        let sched = BvtScheduler::new(
            &scenario.config,
            clock.clone(),
            timers.clone(),
            kicker.clone(),
        )?;

        let nr_cpus = sched.nr_cpus();
        let idle = (0..nr_cpus)
            .map(|cpu| sched.idle_of(CpuId(cpu)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut sim = Simulator {
            sched,
            clock,
            timers,
            kicker,
            vcpus: Vec::with_capacity(scenario.vcpus.len()),
            by_id: HashMap::new(),
            idle,
            running: vec![None; nr_cpus as usize],
            cpu_idle: vec![false; nr_cpus as usize],
            zombies: Vec::new(),
            events: BinaryHeap::new(),
            seq: 0,
            epoch: 0,
            duration_ns: scenario.duration_ns,
            trace: Trace::new(),
            shutdown: None,
        };

        for (idx, def) in scenario.vcpus.iter().enumerate() {
            let id = sim.sched.create(def.domain, def.cpu)?;
            if let Some(params) = def.params {
                sim.sched.set_params(id, params)?;
            }
            sim.vcpus.push(SimVcpu::new(id, def));
            sim.by_id.insert(id, idx);
            sim.push(def.start_time_ns, EventKind::Start { vcpu: idx });
        }

        // Get every CPU's slice timer going.
        for cpu in 0..nr_cpus {
            sim.kicker.request_reschedule(CpuId(cpu));
        }
        Ok(sim)
    }

    /// Stop the run early once `flag` is set.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    pub fn scheduler(&self) -> &SimScheduler {
        &self.sched
    }

    fn push(&mut self, time_ns: TimeNs, kind: EventKind) {
        self.events.push(Reverse(Event {
            time_ns,
            seq: self.seq,
            kind,
        }));
        self.seq += 1;
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Run the scenario to its duration and report.
    pub fn run(mut self) -> SimulationResult {
        info!(
            "simulating {} vcpus on {} cpus for {}ns",
            self.vcpus.len(),
            self.sched.nr_cpus(),
            self.duration_ns
        );

        let mut stopped_early = false;
        loop {
            if self.shutdown_requested() {
                info!("shutdown requested at {}ns", self.clock.now());
                stopped_early = true;
                break;
            }

            let kicked = self.kicker.take_pending();
            if !kicked.is_empty() {
                for cpu in kicked {
                    self.reschedule(cpu);
                }
                continue;
            }

            let next_timer = self.timers.next_deadline();
            let next_event = self.events.peek().map(|Reverse(e)| e.time_ns);
            let now = match (next_timer, next_event) {
                (None, None) => break,
                (Some(t), None) | (None, Some(t)) => t,
                (Some(t), Some(e)) => t.min(e),
            };
            // Nothing scheduled at the end instant gets to run.
            if now >= self.duration_ns {
                break;
            }
            self.clock.set(now);

            // Timers first on a tie.
            if next_timer == Some(now) {
                if let Some((handle, event)) = self.timers.pop_due(now) {
                    self.sched.timer_fired(handle, event);
                }
                continue;
            }
            if let Some(Reverse(event)) = self.events.pop() {
                self.handle(event.kind);
            }
        }

        let end = if stopped_early {
            self.clock.now()
        } else {
            self.duration_ns
        };
        self.finish(end)
    }

    fn handle(&mut self, kind: EventKind) {
        match kind {
            EventKind::Start { vcpu } => self.start_phase(vcpu),
            EventKind::WakeUp { vcpu } => {
                if self.vcpus[vcpu].advance_phase() {
                    self.start_phase(vcpu);
                } else {
                    self.exit(vcpu);
                }
            }
            EventKind::PhaseComplete { cpu, epoch } => self.phase_complete(cpu, epoch),
        }
    }

    /// Enter the current phase of a vCPU that is not on a CPU.
    fn start_phase(&mut self, idx: usize) {
        let now = self.clock.now();
        match self.vcpus[idx].current_phase() {
            Some(Phase::Run(_)) => {
                let v = &mut self.vcpus[idx];
                v.state = VcpuState::Runnable;
                let id = v.id;
                let cpu = self.sched.cpu_of(id).unwrap_or(v.cpu);
                self.trace.record(now, cpu, TraceKind::Woke { id });
                if let Err(e) = self.sched.wake(id) {
                    panic!("{}: wake failed: {e}", v.name);
                }
            }
            Some(Phase::Sleep(ns)) => {
                self.vcpus[idx].state = VcpuState::Sleeping;
                self.push(now.saturating_add(ns), EventKind::WakeUp { vcpu: idx });
            }
            None => self.exit(idx),
        }
    }

    fn phase_complete(&mut self, cpu: CpuId, epoch: u64) {
        let Some(slot) = self.running[cpu.index()] else {
            return;
        };
        if slot.epoch != epoch {
            return;
        }

        let now = self.clock.now();
        let v = &mut self.vcpus[slot.vcpu];
        v.charge(now - slot.since);
        let id = v.id;

        let next = if v.advance_phase() {
            v.current_phase()
        } else {
            None
        };
        match next {
            Some(Phase::Run(ns)) => {
                self.epoch += 1;
                self.running[cpu.index()] = Some(RunningSlot {
                    vcpu: slot.vcpu,
                    since: now,
                    epoch: self.epoch,
                });
                let epoch = self.epoch;
                self.push(now.saturating_add(ns), EventKind::PhaseComplete { cpu, epoch });
            }
            Some(Phase::Sleep(ns)) => {
                self.running[cpu.index()] = None;
                self.vcpus[slot.vcpu].state = VcpuState::Sleeping;
                self.trace.record(now, cpu, TraceKind::Slept { id });
                self.sleep(slot.vcpu);
                self.push(now.saturating_add(ns), EventKind::WakeUp { vcpu: slot.vcpu });
            }
            None => {
                self.running[cpu.index()] = None;
                self.sleep(slot.vcpu);
                self.exit(slot.vcpu);
            }
        }
    }

    fn sleep(&self, idx: usize) {
        let v = &self.vcpus[idx];
        if let Err(e) = self.sched.sleep(v.id) {
            panic!("{}: sleep failed: {e}", v.name);
        }
    }

    fn exit(&mut self, idx: usize) {
        let now = self.clock.now();
        let v = &mut self.vcpus[idx];
        v.state = VcpuState::Exited;
        let id = v.id;
        let cpu = self.sched.cpu_of(id).unwrap_or(v.cpu);
        self.trace.record(now, cpu, TraceKind::Completed { id });
        debug!("{} ({id}) exited at {now}ns", v.name);
        self.zombies.push(idx);
        self.reap();
    }

    /// Destroy the entities of exited vCPUs their CPU no longer runs.
    fn reap(&mut self) {
        let sched = &self.sched;
        let vcpus = &self.vcpus;
        self.zombies.retain(|&idx| match sched.destroy(vcpus[idx].id) {
            Ok(()) => false,
            Err(SchedError::Busy(_)) => true,
            Err(e) => panic!("{}: destroy failed: {e}", vcpus[idx].name),
        });
    }

    /// Act on a reschedule request for `cpu`.
    fn reschedule(&mut self, cpu: CpuId) {
        let now = self.clock.now();
        if let Some(slot) = self.running[cpu.index()].take() {
            let v = &mut self.vcpus[slot.vcpu];
            v.charge(now - slot.since);
            v.state = VcpuState::Runnable;
            self.trace.record(now, cpu, TraceKind::Preempted { id: v.id });
        }

        let slice = self.sched.do_schedule(cpu, now);
        if slice.next == self.idle[cpu.index()] {
            if !self.cpu_idle[cpu.index()] {
                self.cpu_idle[cpu.index()] = true;
                self.trace.record(now, cpu, TraceKind::CpuIdle);
            }
        } else {
            let idx = *self
                .by_id
                .get(&slice.next)
                .unwrap_or_else(|| panic!("cpu {} picked unknown entity {}", cpu.0, slice.next));
            self.cpu_idle[cpu.index()] = false;
            let v = &mut self.vcpus[idx];
            v.state = VcpuState::Running { cpu };
            let remaining = v.run_remaining_ns;
            self.trace.record(
                now,
                cpu,
                TraceKind::Scheduled {
                    id: slice.next,
                    slice_ns: slice.slice_ns,
                },
            );

            self.epoch += 1;
            let epoch = self.epoch;
            self.running[cpu.index()] = Some(RunningSlot {
                vcpu: idx,
                since: now,
                epoch,
            });
            self.push(now.saturating_add(remaining), EventKind::PhaseComplete { cpu, epoch });
        }

        self.reap();
    }

    fn finish(mut self, end: TimeNs) -> SimulationResult {
        self.clock.set(end);
        // Whatever still runs is cut off by the end of the run.
        for cpu in 0..self.running.len() {
            if let Some(slot) = self.running[cpu].take() {
                let v = &mut self.vcpus[slot.vcpu];
                v.charge(end.saturating_sub(slot.since));
                self.trace
                    .record(end, CpuId(cpu as u32), TraceKind::Preempted { id: v.id });
            }
        }

        let settings = self.sched.dump_settings();
        let cpu_dumps = (0..self.sched.nr_cpus())
            .filter_map(|cpu| self.sched.dump_cpu_state(CpuId(cpu)).ok())
            .collect();
        let vcpus = self
            .vcpus
            .iter()
            .map(|v| VcpuSummary {
                name: v.name.clone(),
                id: v.id,
                domain: v.domain,
                cpu: v.cpu,
                runtime_ns: v.runtime_ns,
                schedule_count: self.trace.schedule_count(v.id),
                exited: v.state == VcpuState::Exited,
            })
            .collect();

        info!("simulation finished at {end}ns");
        SimulationResult {
            trace: self.trace,
            vcpus,
            settings,
            cpu_dumps,
            end_ns: end,
        }
    }
}

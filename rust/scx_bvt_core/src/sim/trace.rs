//! Trace event recording for the simulator.
//!
//! Every scheduling action (vCPU scheduled, preempted, slept, woke, CPU
//! idle) is recorded as a `TraceEvent` with a simulated timestamp and CPU.

use crate::types::{CpuId, EntityId, TimeNs};

/// A single trace event produced by the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub time_ns: TimeNs,
    pub cpu: CpuId,
    pub kind: TraceKind,
}

/// The type of scheduling event recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceKind {
    /// The decision engine picked `id` for `slice_ns`.
    Scheduled { id: EntityId, slice_ns: TimeNs },
    /// `id` was taken off the CPU while still runnable.
    Preempted { id: EntityId },
    /// `id` blocked in a Sleep phase.
    Slept { id: EntityId },
    /// `id` became runnable.
    Woke { id: EntityId },
    /// `id` finished all its phases.
    Completed { id: EntityId },
    /// The CPU switched to its idle entity.
    CpuIdle,
}

/// A complete simulation trace, in chronological order.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    events: Vec<TraceEvent>,
}

impl Trace {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, time_ns: TimeNs, cpu: CpuId, kind: TraceKind) {
        self.events.push(TraceEvent { time_ns, cpu, kind });
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Total runtime of `id`: the intervals between `Scheduled` and the next
    /// `Preempted`, `Slept` or `Completed` of that entity.
    pub fn total_runtime(&self, id: EntityId) -> TimeNs {
        let mut total: TimeNs = 0;
        let mut running_since: Option<TimeNs> = None;

        for event in &self.events {
            match event.kind {
                TraceKind::Scheduled { id: e, .. } if e == id => {
                    running_since = Some(event.time_ns);
                }
                TraceKind::Preempted { id: e }
                | TraceKind::Slept { id: e }
                | TraceKind::Completed { id: e }
                    if e == id =>
                {
                    if let Some(start) = running_since.take() {
                        total += event.time_ns - start;
                    }
                }
                _ => {}
            }
        }

        total
    }

    /// Number of times `id` was picked.
    pub fn schedule_count(&self, id: EntityId) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e.kind, TraceKind::Scheduled { id: s, .. } if s == id))
            .count()
    }

    /// Entities picked on `cpu`, in order. Idle decisions are left out.
    pub fn schedule_sequence(&self, cpu: CpuId) -> Vec<EntityId> {
        self.events
            .iter()
            .filter(|e| e.cpu == cpu)
            .filter_map(|e| match e.kind {
                TraceKind::Scheduled { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Slices handed to `id`, in order.
    pub fn slices(&self, id: EntityId) -> Vec<TimeNs> {
        self.events
            .iter()
            .filter_map(|e| match e.kind {
                TraceKind::Scheduled { id: s, slice_ns } if s == id => Some(slice_ns),
                _ => None,
            })
            .collect()
    }

    pub fn idle_count(&self, cpu: CpuId) -> usize {
        self.events
            .iter()
            .filter(|e| e.cpu == cpu && matches!(e.kind, TraceKind::CpuIdle))
            .count()
    }

    /// Pretty-print the trace for debugging.
    pub fn dump(&self) {
        for event in &self.events {
            let desc = match event.kind {
                TraceKind::Scheduled { id, slice_ns } => {
                    format!("SCHED    {id} slice={slice_ns}ns")
                }
                TraceKind::Preempted { id } => format!("PREEMPT  {id}"),
                TraceKind::Slept { id } => format!("SLEEP    {id}"),
                TraceKind::Woke { id } => format!("WAKE     {id}"),
                TraceKind::Completed { id } => format!("COMPLETE {id}"),
                TraceKind::CpuIdle => "IDLE".to_string(),
            };
            eprintln!(
                "[{:>12} ns] cpu={:<3} {}",
                event.time_ns, event.cpu.0, desc
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: EntityId = EntityId(1);
    const B: EntityId = EntityId(2);

    fn sample() -> Trace {
        let mut t = Trace::new();
        let cpu = CpuId(0);
        t.record(0, cpu, TraceKind::Woke { id: A });
        t.record(0, cpu, TraceKind::Scheduled { id: A, slice_ns: 30 });
        t.record(30, cpu, TraceKind::Preempted { id: A });
        t.record(30, cpu, TraceKind::Scheduled { id: B, slice_ns: 20 });
        t.record(45, cpu, TraceKind::Slept { id: B });
        t.record(45, cpu, TraceKind::Scheduled { id: A, slice_ns: 50 });
        t.record(60, cpu, TraceKind::Completed { id: A });
        t.record(60, cpu, TraceKind::CpuIdle);
        t
    }

    #[test]
    fn test_runtime_and_counts() {
        let t = sample();
        assert_eq!(t.total_runtime(A), 45);
        assert_eq!(t.total_runtime(B), 15);
        assert_eq!(t.schedule_count(A), 2);
        assert_eq!(t.schedule_sequence(CpuId(0)), vec![A, B, A]);
        assert_eq!(t.slices(A), vec![30, 50]);
        assert_eq!(t.idle_count(CpuId(0)), 1);
        assert!(t.schedule_sequence(CpuId(1)).is_empty());
    }
}

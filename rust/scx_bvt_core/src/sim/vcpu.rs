//! vCPU model for the simulator.

use crate::sim::scenario::{Phase, RepeatMode, VcpuBehavior, VcpuDef};
use crate::types::{CpuId, DomainId, EntityId, TimeNs};

/// The state a simulated vCPU can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VcpuState {
    /// Not started yet, or blocked in a Sleep phase.
    Sleeping,
    /// Runnable but not executing.
    Runnable,
    /// Executing on the given CPU.
    Running { cpu: CpuId },
    /// Finished all its phases.
    Exited,
}

/// A simulated vCPU at runtime.
#[derive(Debug)]
pub(crate) struct SimVcpu {
    pub(crate) id: EntityId,
    pub(crate) name: String,
    pub(crate) domain: DomainId,
    pub(crate) cpu: CpuId,
    behavior: VcpuBehavior,
    phase_idx: usize,
    passes: u32,
    /// Remaining nanoseconds of the current Run phase.
    pub(crate) run_remaining_ns: TimeNs,
    pub(crate) state: VcpuState,
    pub(crate) runtime_ns: TimeNs,
}

impl SimVcpu {
    pub(crate) fn new(id: EntityId, def: &VcpuDef) -> Self {
        let run_remaining_ns = match def.behavior.phases.first() {
            Some(Phase::Run(ns)) => *ns,
            _ => 0,
        };
        SimVcpu {
            id,
            name: def.name.clone(),
            domain: def.domain,
            cpu: def.cpu,
            behavior: def.behavior.clone(),
            phase_idx: 0,
            passes: 0,
            run_remaining_ns,
            state: VcpuState::Sleeping,
            runtime_ns: 0,
        }
    }

    pub(crate) fn current_phase(&self) -> Option<Phase> {
        self.behavior.phases.get(self.phase_idx).copied()
    }

    /// Advance to the next phase. Returns false once the behavior is over.
    pub(crate) fn advance_phase(&mut self) -> bool {
        self.phase_idx += 1;
        if self.phase_idx >= self.behavior.phases.len() {
            self.passes += 1;
            let again = match self.behavior.repeat {
                RepeatMode::Once => false,
                RepeatMode::Count(n) => self.passes < n,
                RepeatMode::Forever => true,
            };
            if !again || self.behavior.phases.is_empty() {
                return false;
            }
            self.phase_idx = 0;
        }
        if let Some(Phase::Run(ns)) = self.current_phase() {
            self.run_remaining_ns = ns;
        }
        true
    }

    /// Charge `ran` nanoseconds of CPU to the current Run phase.
    pub(crate) fn charge(&mut self, ran: TimeNs) {
        self.runtime_ns += ran;
        self.run_remaining_ns = self.run_remaining_ns.saturating_sub(ran);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DomainId;

    fn vcpu(phases: Vec<Phase>, repeat: RepeatMode) -> SimVcpu {
        let def = VcpuDef::new(
            "v",
            DomainId(1),
            CpuId(0),
            VcpuBehavior { phases, repeat },
        );
        SimVcpu::new(EntityId(1), &def)
    }

    #[test]
    fn test_once() {
        let mut v = vcpu(vec![Phase::Run(10), Phase::Sleep(5)], RepeatMode::Once);
        assert_eq!(v.run_remaining_ns, 10);
        assert!(v.advance_phase());
        assert_eq!(v.current_phase(), Some(Phase::Sleep(5)));
        assert!(!v.advance_phase());
    }

    #[test]
    fn test_count_reloads_run() {
        let mut v = vcpu(vec![Phase::Run(10)], RepeatMode::Count(2));
        v.charge(10);
        assert_eq!(v.run_remaining_ns, 0);
        assert!(v.advance_phase());
        assert_eq!(v.run_remaining_ns, 10);
        assert!(!v.advance_phase());
        assert_eq!(v.runtime_ns, 10);
    }

    #[test]
    fn test_empty_behavior_ends_even_forever() {
        let mut v = vcpu(vec![], RepeatMode::Forever);
        assert_eq!(v.current_phase(), None);
        assert!(!v.advance_phase());
    }
}

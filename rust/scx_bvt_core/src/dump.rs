//! Human-readable scheduler state.

use std::fmt::Write;

use crate::error::SchedError;
use crate::sched::BvtScheduler;
use crate::timer::{Clock, Kicker, TimerFacility};
use crate::types::CpuId;
use crate::vtime::MCU;

impl<C: Clock, T: TimerFacility, K: Kicker> BvtScheduler<C, T, K> {
    /// Global settings, one line.
    pub fn dump_settings(&self) -> String {
        format!(
            "BVT: mcu={}ns ctx_allow={}ns cpus={}",
            MCU,
            self.ctx_allow(),
            self.nr_cpus()
        )
    }

    /// svt of `cpu` and one line per queued entity, in queue order. The
    /// running entity is marked with `*`.
    pub fn dump_cpu_state(&self, cpu: CpuId) -> Result<String, SchedError> {
        let pcpu = self.pcpu(cpu)?;
        let rq = pcpu.lock_rq();
        let curr = pcpu.lock_current().curr;

        let mut out = String::new();
        let _ = writeln!(out, "cpu {} svt={}", cpu.0, rq.svt());
        for (i, id) in rq.queued().enumerate() {
            let e = &rq[id];
            let marker = if id == curr { '*' } else { ' ' };
            if e.is_idle() {
                let _ = writeln!(out, "{i:3}:{marker}{id} idle");
                continue;
            }
            let _ = writeln!(
                out,
                "{i:3}:{marker}{id} domain={} mcu_advance={} evt={} avt={} warp={}",
                e.domain.0,
                e.params.mcu_advance,
                e.evt,
                e.avt,
                e.warp.name()
            );
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::SchedConfig;
    use crate::sched::BvtScheduler;
    use crate::sim::{SimClock, SimKicker, SimTimers};
    use crate::types::{CpuId, DomainId};

    #[test]
    fn test_dump_lists_queued_entities() {
        let s = BvtScheduler::new(
            &SchedConfig::default(),
            SimClock::new(),
            SimTimers::new(),
            SimKicker::new(),
        )
        .unwrap();
        let a = s.create(DomainId(3), CpuId(0)).unwrap();
        let b = s.create(DomainId(4), CpuId(0)).unwrap();
        s.wake(a).unwrap();
        s.do_schedule(CpuId(0), 0);

        let dump = s.dump_cpu_state(CpuId(0)).unwrap();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines[0], "cpu 0 svt=0x00000000");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains(&format!("*{a} domain=3")));
        assert!(lines[1].contains("warp=normal"));
        assert!(lines[2].ends_with("idle"));
        assert!(!dump.contains(&b.to_string()));
    }

    #[test]
    fn test_dump_settings() {
        let s = BvtScheduler::new(
            &SchedConfig::default(),
            SimClock::new(),
            SimTimers::new(),
            SimKicker::new(),
        )
        .unwrap();
        assert_eq!(
            s.dump_settings(),
            "BVT: mcu=100000ns ctx_allow=5000000ns cpus=1"
        );
        assert!(s.dump_cpu_state(CpuId(3)).is_err());
    }
}

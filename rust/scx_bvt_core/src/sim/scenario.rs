//! Scenario definition and builder API.

use serde::{Deserialize, Serialize};

use crate::config::SchedConfig;
use crate::entity::EntityParams;
use crate::types::{CpuId, DomainId, TimeNs, NSEC_PER_MSEC, NSEC_PER_USEC};

/// A phase in a vCPU's scripted behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Consume CPU for the given number of nanoseconds.
    Run(TimeNs),
    /// Block for the given number of nanoseconds.
    Sleep(TimeNs),
}

/// What happens after the last phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    /// Exit after one pass.
    #[default]
    Once,
    /// Exit after this many passes.
    Count(u32),
    /// Never exit.
    Forever,
}

/// The scripted behavior of a vCPU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcpuBehavior {
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub repeat: RepeatMode,
}

impl VcpuBehavior {
    /// Spin forever.
    pub fn cpu_bound() -> Self {
        VcpuBehavior {
            phases: vec![Phase::Run(u64::MAX)],
            repeat: RepeatMode::Forever,
        }
    }

    /// Run for `run_ns`, sleep for `sleep_ns`, forever.
    pub fn periodic(run_ns: TimeNs, sleep_ns: TimeNs) -> Self {
        VcpuBehavior {
            phases: vec![Phase::Run(run_ns), Phase::Sleep(sleep_ns)],
            repeat: RepeatMode::Forever,
        }
    }
}

impl Default for VcpuBehavior {
    fn default() -> Self {
        Self::cpu_bound()
    }
}

/// Definition of a vCPU for scenario creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcpuDef {
    pub name: String,
    pub domain: DomainId,
    pub cpu: CpuId,
    /// When the vCPU first starts its phases (simulated ns).
    #[serde(default)]
    pub start_time_ns: TimeNs,
    /// Applied through the control interface right after creation.
    #[serde(default)]
    pub params: Option<EntityParams>,
    #[serde(default)]
    pub behavior: VcpuBehavior,
}

impl VcpuDef {
    pub fn new(name: &str, domain: DomainId, cpu: CpuId, behavior: VcpuBehavior) -> Self {
        VcpuDef {
            name: name.to_string(),
            domain,
            cpu,
            start_time_ns: 0,
            params: None,
            behavior,
        }
    }

    pub fn with_params(mut self, params: EntityParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn starting_at(mut self, ns: TimeNs) -> Self {
        self.start_time_ns = ns;
        self
    }
}

fn default_duration_ns() -> TimeNs {
    100 * NSEC_PER_MSEC
}

/// A complete simulation scenario: scheduler configuration, vCPUs and
/// duration. The number of CPUs is `config.nr_cpus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub config: SchedConfig,
    pub vcpus: Vec<VcpuDef>,
    #[serde(default = "default_duration_ns")]
    pub duration_ns: TimeNs,
}

/// Builder for constructing scenarios.
pub struct ScenarioBuilder {
    config: SchedConfig,
    vcpus: Vec<VcpuDef>,
    duration_ns: TimeNs,
}

impl Scenario {
    pub fn builder() -> ScenarioBuilder {
        ScenarioBuilder {
            config: SchedConfig::default(),
            vcpus: Vec::new(),
            duration_ns: default_duration_ns(),
        }
    }
}

impl ScenarioBuilder {
    /// Set the number of simulated CPUs.
    pub fn cpus(mut self, n: u32) -> Self {
        self.config.nr_cpus = n;
        self
    }

    /// Set the context-switch allowance in microseconds.
    pub fn ctx_allow_us(mut self, us: u64) -> Self {
        self.config.ctx_allow_ns = us * NSEC_PER_USEC;
        self
    }

    /// Replace the whole scheduler configuration, CPU count included.
    pub fn config(mut self, config: SchedConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a vCPU with a full definition.
    pub fn vcpu(mut self, def: VcpuDef) -> Self {
        self.vcpus.push(def);
        self
    }

    /// Convenience: add a vCPU with default parameters starting at time 0.
    pub fn add_vcpu(self, name: &str, domain: DomainId, cpu: CpuId, behavior: VcpuBehavior) -> Self {
        self.vcpu(VcpuDef::new(name, domain, cpu, behavior))
    }

    pub fn duration_ns(mut self, ns: TimeNs) -> Self {
        self.duration_ns = ns;
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ns = ms * NSEC_PER_MSEC;
        self
    }

    /// Build the scenario.
    pub fn build(self) -> Scenario {
        assert!(
            !self.vcpus.is_empty(),
            "scenario must have at least one vcpu"
        );
        assert!(self.config.nr_cpus > 0, "scenario must have at least one CPU");
        Scenario {
            config: self.config,
            vcpus: self.vcpus,
            duration_ns: self.duration_ns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let s = Scenario::builder()
            .cpus(2)
            .ctx_allow_us(1000)
            .add_vcpu("a", DomainId(1), CpuId(0), VcpuBehavior::cpu_bound())
            .vcpu(
                VcpuDef::new("b", DomainId(2), CpuId(1), VcpuBehavior::periodic(10, 20))
                    .starting_at(5),
            )
            .duration_ms(50)
            .build();
        assert_eq!(s.config.nr_cpus, 2);
        assert_eq!(s.config.ctx_allow_ns, 1_000_000);
        assert_eq!(s.duration_ns, 50_000_000);
        assert_eq!(s.vcpus[1].start_time_ns, 5);
        assert_eq!(s.vcpus[1].behavior.phases, vec![Phase::Run(10), Phase::Sleep(20)]);
    }

    #[test]
    #[should_panic(expected = "at least one vcpu")]
    fn test_empty_scenario_panics() {
        Scenario::builder().build();
    }

    #[test]
    fn test_scenario_from_json() {
        let s: Scenario = serde_json::from_str(
            r#"{
                "config": {"nr_cpus": 1},
                "vcpus": [
                    {"name": "web", "domain": 1, "cpu": 0,
                     "params": {"warp_requested": true, "warp_value": 2000},
                     "behavior": {"phases": [{"run": 1000000}, {"sleep": 4000000}],
                                  "repeat": "forever"}},
                    {"name": "batch", "domain": 2, "cpu": 0}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(s.duration_ns, 100_000_000);
        assert_eq!(s.vcpus[0].behavior.repeat, RepeatMode::Forever);
        assert_eq!(s.vcpus[0].params.unwrap().warp_value, 2000);
        assert_eq!(s.vcpus[1].behavior, VcpuBehavior::cpu_bound());
        assert_eq!(s.vcpus[1].params, None);
    }

    #[test]
    fn test_repeat_count_from_json() {
        let b: VcpuBehavior =
            serde_json::from_str(r#"{"phases": [{"run": 5}], "repeat": {"count": 3}}"#).unwrap();
        assert_eq!(b.repeat, RepeatMode::Count(3));
    }
}

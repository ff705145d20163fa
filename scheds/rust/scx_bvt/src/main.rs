// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
mod demo;

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use log::info;
use log::warn;
use scx_bvt_core::Scenario;
use scx_bvt_core::SimulationResult;
use scx_bvt_core::Simulator;
use scx_bvt_core::NSEC_PER_MSEC;
use scx_bvt_core::NSEC_PER_USEC;
use scx_bvt_core::VERSION;

const SCHEDULER_NAME: &str = "scx_bvt";

/// scx_bvt: Borrowed Virtual Time scheduling for hypervisor vCPUs
///
/// Every vCPU accumulates actual virtual time (avt) while it runs, at a
/// rate inverse to its weight. Each physical CPU runs the vCPU with the
/// lowest effective virtual time (evt), for just long enough to pass the
/// runner-up plus a context-switch allowance.
///
/// Latency-sensitive vCPUs can warp: their evt is their avt minus a warp
/// value, so they run ahead of their share when they wake. Warp episodes
/// are bounded by a limit and separated by an unwarp period, so borrowing
/// never changes the long-term share.
///
/// This front end runs a scenario of scripted vCPUs through the scheduler
/// in a deterministic simulator and reports the CPU time each vCPU got.
#[derive(Debug, Parser)]
struct Opts {
    /// Scenario file (JSON). Runs a built-in demo when omitted.
    scenario: Option<PathBuf>,

    /// Override the number of simulated CPUs.
    #[clap(short = 'c', long)]
    cpus: Option<u32>,

    /// Override the context-switch allowance, in microseconds.
    #[clap(short = 'a', long)]
    ctx_allow_us: Option<u64>,

    /// Override the simulated duration, in milliseconds.
    #[clap(short = 'd', long)]
    duration_ms: Option<u64>,

    /// Print the scheduler settings and the run queue of every CPU at the
    /// end of the run.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    dump: bool,

    /// Print every scheduling event.
    #[clap(short = 't', long, action = clap::ArgAction::SetTrue)]
    trace: bool,

    /// Enable verbose output. Specify multiple times to increase verbosity.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print version and exit.
    #[clap(short = 'V', long, action = clap::ArgAction::SetTrue)]
    version: bool,
}

fn load_scenario(opts: &Opts) -> Result<Scenario> {
    let mut scenario = match &opts.scenario {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse scenario {}", path.display()))?
        }
        None => demo::scenario(),
    };

    if let Some(cpus) = opts.cpus {
        scenario.config.nr_cpus = cpus;
    }
    if let Some(us) = opts.ctx_allow_us {
        scenario.config.ctx_allow_ns = us * NSEC_PER_USEC;
    }
    if let Some(ms) = opts.duration_ms {
        scenario.duration_ns = ms * NSEC_PER_MSEC;
    }

    if scenario.vcpus.is_empty() {
        bail!("Scenario has no vcpus");
    }
    scenario
        .config
        .validate()
        .context("Invalid scheduler configuration")?;
    Ok(scenario)
}

fn report(result: &SimulationResult, nr_cpus: u32) {
    info!(
        "Simulated {:.1}ms on {} cpu(s)",
        result.end_ns as f64 / NSEC_PER_MSEC as f64,
        nr_cpus
    );

    for v in &result.vcpus {
        let share = if result.end_ns > 0 {
            v.runtime_ns as f64 * 100.0 / result.end_ns as f64
        } else {
            0.0
        };
        info!(
            "{:<12} {} dom={:<3} cpu={:<2} runtime={:>9.3}ms share={:>5.1}% picks={}{}",
            v.name,
            v.id,
            v.domain.0,
            v.cpu.0,
            v.runtime_ns as f64 / NSEC_PER_MSEC as f64,
            share,
            v.schedule_count,
            if v.exited { " exited" } else { "" }
        );
    }

    for cpu in 0..nr_cpus {
        let busy: u64 = result
            .vcpus
            .iter()
            .filter(|v| v.cpu.0 == cpu)
            .map(|v| v.runtime_ns)
            .sum();
        if busy > result.end_ns {
            warn!("cpu {cpu} accounted {busy}ns in {}ns", result.end_ns);
        }
    }
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    if opts.version {
        println!("{} version {}", SCHEDULER_NAME, VERSION);
        return Ok(());
    }

    let llv = match opts.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        llv,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::Relaxed);
    })
    .context("Error setting Ctrl-C handler")?;

    let scenario = load_scenario(&opts)?;
    info!(
        "{} {}: {} vcpu(s), {}ms",
        SCHEDULER_NAME,
        VERSION,
        scenario.vcpus.len(),
        scenario.duration_ns / NSEC_PER_MSEC
    );

    let sim = Simulator::new(&scenario)
        .context("Failed to set up the scenario")?
        .with_shutdown(shutdown.clone());
    let result = sim.run();
    if shutdown.load(Ordering::Relaxed) {
        warn!("Interrupted at {}ns", result.end_ns);
    }

    if opts.trace {
        result.trace.dump();
    }
    report(&result, scenario.config.nr_cpus);
    if opts.dump {
        info!("{}", result.settings);
        for dump in &result.cpu_dumps {
            for line in dump.lines() {
                info!("{line}");
            }
        }
    }

    Ok(())
}

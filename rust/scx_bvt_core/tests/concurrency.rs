use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use scx_bvt_core::*;

mod common;

use common::{check_invariants, warping, weighted, Harness};

const NR_CPUS: u32 = 4;
const ROUNDS: usize = 2000;

/// CPU drivers, wakeups, sleeps, migrations and parameter changes racing
/// on one scheduler leave every queue consistent.
#[test]
fn test_concurrent_hooks_keep_invariants() {
    common::setup_test();
    let h = Harness::new(NR_CPUS);
    let ids: Vec<EntityId> = (0..2 * NR_CPUS)
        .map(|i| h.spawn(i, CpuId(i % NR_CPUS), EntityParams::default()))
        .collect();

    thread::scope(|s| {
        for cpu in 0..NR_CPUS {
            let h = &h;
            s.spawn(move || {
                for _ in 0..ROUNDS {
                    h.clock.advance(MCU);
                    h.schedule(CpuId(cpu));
                }
            });
        }

        let ids = &ids;
        let h = &h;
        s.spawn(move || {
            let mut rng = StdRng::seed_from_u64(1);
            for _ in 0..ROUNDS {
                let id = ids[rng.gen_range(0..ids.len())];
                if rng.gen_bool(0.6) {
                    h.sched.wake(id).unwrap();
                } else {
                    h.sched.sleep(id).unwrap();
                }
            }
        });
        s.spawn(move || {
            let mut rng = StdRng::seed_from_u64(2);
            for _ in 0..ROUNDS {
                let id = ids[rng.gen_range(0..ids.len())];
                let to = CpuId(rng.gen_range(0..NR_CPUS));
                match h.sched.migrate(id, to) {
                    Ok(()) | Err(SchedError::Busy(_)) => {}
                    Err(e) => panic!("migrate {id}: {e}"),
                }
            }
        });
        s.spawn(move || {
            let mut rng = StdRng::seed_from_u64(3);
            for _ in 0..ROUNDS {
                let id = ids[rng.gen_range(0..ids.len())];
                let params = if rng.gen_bool(0.3) {
                    warping(rng.gen_range(1..500), 0, 0)
                } else {
                    weighted(rng.gen_range(1..30))
                };
                h.sched.set_params(id, params).unwrap();
            }
        });
    });

    check_invariants(&h.sched, &ids);

    // Put everything to sleep; one more decision per CPU empties the queues.
    for &id in &ids {
        h.sched.sleep(id).unwrap();
    }
    for cpu in 0..NR_CPUS {
        let cpu = CpuId(cpu);
        assert_eq!(h.schedule(cpu).next, h.sched.idle_of(cpu).unwrap());
        assert_eq!(h.sched.queue_order(cpu).unwrap().len(), 1);
    }
    check_invariants(&h.sched, &ids);
}

/// Entities woken from many threads at once are each queued exactly once.
#[test]
fn test_parallel_wakeups() {
    common::setup_test();
    let h = Harness::new(2);
    let ids: Vec<EntityId> = (0..16)
        .map(|i| h.sched.create(DomainId(i), CpuId(i % 2)).unwrap())
        .collect();

    thread::scope(|s| {
        for chunk in ids.chunks(4) {
            let h = &h;
            s.spawn(move || {
                for _ in 0..3 {
                    for &id in chunk {
                        h.sched.wake(id).unwrap();
                    }
                }
            });
        }
    });

    for cpu in 0..2 {
        assert_eq!(h.sched.queue_order(CpuId(cpu)).unwrap().len(), 9);
    }
    check_invariants(&h.sched, &ids);
}

// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
use scx_bvt_core::{
    CpuId, DomainId, EntityParams, Scenario, VcpuBehavior, VcpuDef, NSEC_PER_MSEC,
};

/// Scenario run when no file is given.
///
/// CPU 0 pits a latency-sensitive vCPU that borrows virtual time against a
/// CPU hog. CPU 1 runs two hogs weighted 2:1.
pub fn scenario() -> Scenario {
    let web = EntityParams {
        warp_requested: true,
        warp_value: 2000,
        warp_limit_ns: 20 * NSEC_PER_MSEC,
        warp_unwarp_ns: 50 * NSEC_PER_MSEC,
        ..EntityParams::default()
    };
    let heavy = EntityParams {
        mcu_advance: 5,
        ..EntityParams::default()
    };

    Scenario::builder()
        .cpus(2)
        .vcpu(
            VcpuDef::new(
                "web",
                DomainId(1),
                CpuId(0),
                VcpuBehavior::periodic(NSEC_PER_MSEC, 9 * NSEC_PER_MSEC),
            )
            .with_params(web),
        )
        .add_vcpu("batch", DomainId(2), CpuId(0), VcpuBehavior::cpu_bound())
        .vcpu(
            VcpuDef::new("db", DomainId(3), CpuId(1), VcpuBehavior::cpu_bound())
                .with_params(heavy),
        )
        .add_vcpu("backup", DomainId(4), CpuId(1), VcpuBehavior::cpu_bound())
        .duration_ms(1000)
        .build()
}

//! Cycle benchmark: one steady-state exchange cycle over the simulated bus.
//!
//! Covers receive, snapshot publication, per-joint CiA402 evaluation,
//! command table copy and send for 1 to 6 commissioned joints.

use std::hint::black_box;
use std::time::Instant;

use arm_common::codec::PositionCodec;
use arm_common::config::ArmConfig;
use arm_hal::drivers::simulation::{SimOptions, SimulatedMaster};
use arm_hal::{ArmContext, CyclicExchange};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

/// Exchange with every joint already `OperationEnabled`.
fn commissioned(joints: usize) -> CyclicExchange {
    let mut config = ArmConfig::default();
    config.joints.truncate(joints);
    let master = SimulatedMaster::new(SimOptions {
        joints,
        op_delay_cycles: 0,
        ..SimOptions::default()
    });
    let ctx = ArmContext::startup(config, Box::new(master)).expect("startup");
    let mut exchange = CyclicExchange::new(ctx);

    let now = Instant::now();
    for _ in 0..1_000 {
        if exchange.context().commissioning().is_complete() {
            return exchange;
        }
        exchange.cycle(now);
    }
    panic!("commissioning did not complete");
}

fn bench_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("exchange_cycle");
    for joints in [1usize, 3, 6] {
        let mut exchange = commissioned(joints);
        let commands = exchange.context().commands();
        let codec = exchange.context().codec();
        let mut k = 0u64;

        group.bench_with_input(BenchmarkId::from_parameter(joints), &joints, |b, _| {
            b.iter(|| {
                k += 1;
                let rad = (k % 600) as f64 / 100.0 - 3.0;
                commands.apply_radians(&[rad; 6][..joints], &codec);
                exchange.cycle(black_box(Instant::now()));
            });
        });
    }
    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let codec = PositionCodec::default();
    c.bench_function("codec_round_trip", |b| {
        b.iter(|| {
            let counts = codec.radians_to_counts(black_box(1.234_5));
            black_box(codec.counts_to_radians(counts))
        });
    });
}

criterion_group!(benches, bench_cycle, bench_codec);
criterion_main!(benches);

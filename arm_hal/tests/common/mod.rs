//! Shared helpers for the arm_hal integration tests.

#![allow(dead_code)]

use std::time::{Duration, Instant};

use arm_common::config::ArmConfig;
use arm_hal::drivers::simulation::{SimHandle, SimOptions, SimulatedMaster};
use arm_hal::{ArmContext, CyclicExchange, StartupError};

/// Power-up encoder positions of the six simulated drives.
pub const INITIAL_POSITIONS: [i32; 6] = [1_000, -2_000, 30_000, 0, 250_000, -262_000];

/// Options for a six-joint bus reaching OP after a short delay.
pub fn sim_options() -> SimOptions {
    SimOptions {
        initial_positions: INITIAL_POSITIONS.to_vec(),
        ..SimOptions::default()
    }
}

/// Start a context over a fresh simulated bus.
pub fn try_start(
    options: SimOptions,
    config: ArmConfig,
) -> (Result<ArmContext, StartupError>, SimHandle) {
    let master = SimulatedMaster::new(options);
    let handle = master.handle();
    (ArmContext::startup(config, Box::new(master)), handle)
}

/// Start an exchange with default configuration.
pub fn start(options: SimOptions) -> (CyclicExchange, SimHandle) {
    let (ctx, handle) = try_start(options, ArmConfig::default());
    let ctx = ctx.expect("startup should succeed");
    (CyclicExchange::new(ctx), handle)
}

/// Fake clock advancing by a fixed step per cycle.
pub struct FakeClock {
    t0: Instant,
    step: Duration,
    k: u32,
}

impl FakeClock {
    /// Clock starting now.
    pub fn new(step: Duration) -> Self {
        Self {
            t0: Instant::now(),
            step,
            k: 0,
        }
    }

    /// Next cycle instant.
    pub fn tick(&mut self) -> Instant {
        let now = self.t0 + self.step * self.k;
        self.k += 1;
        now
    }
}

/// Run cycles until `done` holds; panics after `limit` cycles.
pub fn cycle_until(
    exchange: &mut CyclicExchange,
    clock: &mut FakeClock,
    limit: usize,
    mut done: impl FnMut(&CyclicExchange) -> bool,
) -> usize {
    for n in 0..limit {
        if done(exchange) {
            return n;
        }
        exchange.cycle(clock.tick());
    }
    panic!("condition not reached within {limit} cycles");
}

/// Run exactly `n` cycles.
pub fn cycles(exchange: &mut CyclicExchange, clock: &mut FakeClock, n: usize) {
    for _ in 0..n {
        exchange.cycle(clock.tick());
    }
}

/// Commission every joint with a 1 ms clock.
pub fn commissioned(options: SimOptions) -> (CyclicExchange, SimHandle, FakeClock) {
    let (mut exchange, handle) = start(options);
    let mut clock = FakeClock::new(Duration::from_millis(1));
    cycle_until(&mut exchange, &mut clock, 1_000, |ex| {
        ex.context().commissioning().is_complete()
    });
    (exchange, handle, clock)
}

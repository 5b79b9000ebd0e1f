//! Cyclic process-data exchange.
//!
//! ## RT Setup
//! 1. `mlockall(MCL_CURRENT | MCL_FUTURE)`: lock all pages.
//! 2. Prefault stack pages.
//! 3. `sched_setaffinity`: pin to the configured CPU core.
//! 4. `sched_setscheduler(SCHED_FIFO, prio)`.
//!
//! Steps 1, 3 and 4 need the `rt` feature and are no-ops without it.
//!
//! ## Cycle Body
//! 1. Receive frames, process the domain.
//! 2. Publish encoder counts of every joint to the state snapshot.
//! 3. Once per second: master and domain diagnostics, logged on change.
//! 4. Commissioning (OP polling, then CiA402 one joint at a time), or in
//!    steady state the state machine of every joint followed by the command
//!    table written into every target position.
//! 5. Queue the domain, send.
//!
//! Bus errors inside the cycle are counted and logged, never fatal. Overruns
//! are counted and logged; pacing continues from the next period boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use arm_common::consts::MAX_JOINTS;
use arm_common::fieldbus::{DomainState, FieldbusError, MasterState};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::ArmContext;
use crate::drive::CommissioningPhase;

// ─── Cycle Statistics ───────────────────────────────────────────────

/// Timing and error counters of the exchange loop. Updated in O(1).
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    /// Timed cycles.
    pub timed_cycles: u64,
    /// Duration of the most recent cycle body.
    pub last: Duration,
    /// Shortest cycle body, `None` before the first timed cycle.
    pub min: Option<Duration>,
    /// Longest cycle body.
    pub max: Duration,
    /// Sum of all timed cycle bodies.
    pub total: Duration,
    /// Longest distance between the scheduled and actual wake-up.
    pub max_wake_latency: Duration,
    /// Cycle bodies longer than the period.
    pub overruns: u64,
    /// Failed receive/send/state calls.
    pub bus_errors: u64,
}

impl CycleStats {
    /// Account one cycle body and the wake-up latency that preceded it.
    #[inline]
    pub fn record(&mut self, body: Duration, wake_latency: Duration) {
        self.timed_cycles += 1;
        self.last = body;
        self.min = Some(self.min.map_or(body, |m| m.min(body)));
        self.max = self.max.max(body);
        self.total += body;
        self.max_wake_latency = self.max_wake_latency.max(wake_latency);
    }

    /// Mean cycle body, zero before the first timed cycle.
    pub fn mean(&self) -> Duration {
        u32::try_from(self.timed_cycles)
            .ok()
            .filter(|&n| n > 0)
            .map_or(Duration::ZERO, |n| self.total / n)
    }

    /// Count an overrun; true when it should be logged.
    fn overrun(&mut self) -> bool {
        self.overruns += 1;
        rate_limited(self.overruns)
    }

    /// Count a bus error; true when it should be logged.
    fn bus_error(&mut self) -> bool {
        self.bus_errors += 1;
        rate_limited(self.bus_errors)
    }
}

/// First ten occurrences, then every thousandth.
#[inline]
fn rate_limited(count: u64) -> bool {
    count <= 10 || count % 1000 == 0
}

// ─── RT Setup ───────────────────────────────────────────────────────

/// Errors of the loop thread outside the cycle body.
#[derive(Debug, Error)]
pub enum CycleError {
    /// An RT preparation step failed.
    #[error("RT setup failed at {step}: {reason}")]
    RtSetup {
        /// Step that failed.
        step: &'static str,
        /// System error.
        reason: String,
    },

    /// The monotonic clock could not be read.
    #[error("Monotonic clock unavailable: {0}")]
    Clock(String),
}

#[cfg(feature = "rt")]
mod rt {
    use super::CycleError;

    fn failed(step: &'static str, err: impl std::fmt::Display) -> CycleError {
        CycleError::RtSetup {
            step,
            reason: err.to_string(),
        }
    }

    pub(super) fn lock_memory() -> Result<(), CycleError> {
        use nix::sys::mman::{MlockallFlags, mlockall};
        mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
            .map_err(|e| failed("mlockall", e))
    }

    pub(super) fn pin_to_core(core: usize) -> Result<(), CycleError> {
        use nix::sched::{CpuSet, sched_setaffinity};
        use nix::unistd::Pid;

        let mut set = CpuSet::new();
        set.set(core).map_err(|e| failed("cpu set", e))?;
        sched_setaffinity(Pid::this(), &set).map_err(|e| failed("sched_setaffinity", e))
    }

    pub(super) fn fifo_priority(priority: i32) -> Result<(), CycleError> {
        let param = libc::sched_param {
            sched_priority: priority,
        };
        // SAFETY: `param` is a valid sched_param for the duration of the
        // call; pid 0 selects the calling thread.
        if unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) } != 0 {
            return Err(failed("SCHED_FIFO", std::io::Error::last_os_error()));
        }
        Ok(())
    }
}

#[cfg(not(feature = "rt"))]
mod rt {
    use super::CycleError;

    pub(super) fn lock_memory() -> Result<(), CycleError> {
        Ok(())
    }

    pub(super) fn pin_to_core(_core: usize) -> Result<(), CycleError> {
        Ok(())
    }

    pub(super) fn fifo_priority(_priority: i32) -> Result<(), CycleError> {
        Ok(())
    }
}

/// Bytes of stack touched before the loop starts.
const PREFAULT_STACK_BYTES: usize = 512 * 1024;

fn prefault_stack() {
    let mut buf = [0u8; PREFAULT_STACK_BYTES];
    for byte in buf.iter_mut() {
        // SAFETY: `byte` is a valid, exclusive reference into `buf`.
        unsafe { std::ptr::write_volatile(byte, 0xA5) };
    }
    std::hint::black_box(&buf);
}

/// Prepare the calling thread for the exchange loop: lock memory, touch the
/// stack, pin to `cpu_core`, switch to SCHED_FIFO at `priority`.
pub fn rt_setup(cpu_core: usize, priority: i32) -> Result<(), CycleError> {
    rt::lock_memory()?;
    prefault_stack();
    rt::pin_to_core(cpu_core)?;
    rt::fifo_priority(priority)?;
    info!("Loop thread on core {} at FIFO priority {}", cpu_core, priority);
    Ok(())
}

// ─── Cyclic exchange ────────────────────────────────────────────────

/// Runs one arm context at a fixed period.
pub struct CyclicExchange {
    ctx: ArmContext,
    stats: CycleStats,
    counts: [i32; MAX_JOINTS],
    targets: [i32; MAX_JOINTS],
    cycle_time: Duration,
    cycle_count: u64,
    housekeeping_interval: u64,
    housekeeping_countdown: u64,
    last_master_state: Option<MasterState>,
    last_domain_state: Option<DomainState>,
}

impl CyclicExchange {
    /// Wrap a started context.
    pub fn new(ctx: ArmContext) -> Self {
        let cycle_time_us = u64::from(ctx.config.cycle_time_us.max(1));
        let cycle_time = ctx.config.cycle_time();
        Self {
            ctx,
            stats: CycleStats::default(),
            counts: [0; MAX_JOINTS],
            targets: [0; MAX_JOINTS],
            cycle_time,
            cycle_count: 0,
            housekeeping_interval: (1_000_000 / cycle_time_us).max(1),
            housekeeping_countdown: 1,
            last_master_state: None,
            last_domain_state: None,
        }
    }

    /// The wrapped context.
    pub fn context(&self) -> &ArmContext {
        &self.ctx
    }

    /// Timing and bus error statistics.
    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Cycles executed.
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Execute one cycle at time `now`.
    ///
    /// `now` only drives the commissioning timeout; the caller paces.
    pub fn cycle(&mut self, now: Instant) {
        self.cycle_count += 1;

        if let Err(e) = self.ctx.lifecycle.receive() {
            bus_error(&mut self.stats, "receive", &e);
        }

        self.publish_snapshot();

        self.housekeeping_countdown -= 1;
        if self.housekeeping_countdown == 0 {
            self.housekeeping_countdown = self.housekeeping_interval;
            self.housekeeping();
        }

        match self.ctx.commissioning.phase() {
            CommissioningPhase::AwaitingOperational => self.await_operational(now),
            CommissioningPhase::EnablingDrives => self.enable_next_drive(),
            CommissioningPhase::Complete => self.write_commands(),
        }

        if let Err(e) = self.ctx.lifecycle.send() {
            bus_error(&mut self.stats, "send", &e);
        }
    }

    /// Run until `running` is cleared.
    pub fn run(&mut self, running: &AtomicBool) -> Result<(), CycleError> {
        info!(
            "Starting cyclic exchange (cycle_time={}us, {} joints)",
            self.cycle_time.as_micros(),
            self.ctx.joint_count()
        );

        #[cfg(feature = "rt")]
        let result = self.run_rt_loop(running);
        #[cfg(not(feature = "rt"))]
        let result = self.run_sim_loop(running);

        info!(
            "Cyclic exchange stopped after {} cycles (overruns {}, bus errors {})",
            self.cycle_count, self.stats.overruns, self.stats.bus_errors
        );
        result
    }

    /// Release the master.
    pub fn shutdown(&mut self) {
        self.ctx.release();
    }

    /// Absolute-deadline loop on `CLOCK_MONOTONIC`.
    #[cfg(feature = "rt")]
    fn run_rt_loop(&mut self, running: &AtomicBool) -> Result<(), CycleError> {
        use nix::sys::time::TimeSpec;
        use nix::time::{ClockId, ClockNanosleepFlags, clock_nanosleep};

        let period = TimeSpec::from_duration(self.cycle_time);
        let mut deadline = monotonic()?;

        while running.load(Ordering::Relaxed) {
            deadline = deadline + period;
            // EINTR only shortens the sleep; the cycle runs either way.
            let _ = clock_nanosleep(
                ClockId::CLOCK_MONOTONIC,
                ClockNanosleepFlags::TIMER_ABSTIME,
                &deadline,
            );

            let woke = monotonic()?;
            self.cycle(Instant::now());
            let done = monotonic()?;
            self.finish_cycle(elapsed(woke, done), elapsed(deadline, woke));
        }
        Ok(())
    }

    /// Relative-sleep loop for simulation and tests.
    #[cfg(not(feature = "rt"))]
    fn run_sim_loop(&mut self, running: &AtomicBool) -> Result<(), CycleError> {
        while running.load(Ordering::Relaxed) {
            let start = Instant::now();
            self.cycle(start);
            let body = start.elapsed();
            self.finish_cycle(body, Duration::ZERO);
            if let Some(rest) = self.cycle_time.checked_sub(body) {
                std::thread::sleep(rest);
            }
        }
        Ok(())
    }

    fn finish_cycle(&mut self, body: Duration, wake_latency: Duration) {
        self.stats.record(body, wake_latency);
        if body > self.cycle_time && self.stats.overrun() {
            warn!(
                "Cycle overrun #{}: {:?} (period {:?})",
                self.stats.overruns, body, self.cycle_time
            );
        }
    }

    // ─── Cycle body ─────────────────────────────────────────────────

    fn publish_snapshot(&mut self) {
        let n = self.ctx.layout.len();
        let data = match self.ctx.lifecycle.domain_data() {
            Ok(data) => data,
            Err(e) => {
                bus_error(&mut self.stats, "domain data", &e);
                return;
            }
        };
        for (count, channel) in self.counts.iter_mut().zip(self.ctx.layout.channels()) {
            *count = channel.actual_position(data);
        }
        self.ctx.snapshot.write(self.cycle_count, &self.counts[..n]);
    }

    fn housekeeping(&mut self) {
        match self.ctx.lifecycle.master_state() {
            Ok(state) => {
                log_master_state(self.last_master_state.as_ref(), &state);
                self.last_master_state = Some(state);
            }
            Err(e) => bus_error(&mut self.stats, "master state", &e),
        }

        match self.ctx.lifecycle.domain_state() {
            Ok(state) => {
                log_domain_state(self.last_domain_state.as_ref(), &state);
                self.last_domain_state = Some(state);
            }
            Err(e) => bus_error(&mut self.stats, "domain state", &e),
        }

        if self.stats.timed_cycles > 0 {
            debug!(
                "Timing: {} cycles, mean {:?}, max {:?}, wake latency {:?}, overruns {}, bus errors {}",
                self.stats.timed_cycles,
                self.stats.mean(),
                self.stats.max,
                self.stats.max_wake_latency,
                self.stats.overruns,
                self.stats.bus_errors
            );
        }
    }

    /// Poll the OP flag of the next joint; reset the master when the window
    /// expires.
    fn await_operational(&mut self, now: Instant) {
        let joint = self.ctx.commissioning.op_index();
        let operational = match self.ctx.lifecycle.slave_state(joint) {
            Ok(state) => state.operational,
            Err(e) => {
                bus_error(&mut self.stats, "slave state", &e);
                false
            }
        };
        let name = self.ctx.drives.get(joint).map_or("?", |d| d.name());
        if self.ctx.commissioning.observe_operational(name, operational) {
            return;
        }

        if self.ctx.commissioning.timed_out(now) {
            warn!(
                "Joints not operational within {:?}, resetting master (joint {} pending)",
                self.ctx.config.commissioning_timeout(),
                joint
            );
            if let Err(e) = self.ctx.lifecycle.reset() {
                bus_error(&mut self.stats, "reset", &e);
            }
            if let Err(e) = self.ctx.lifecycle.receive() {
                bus_error(&mut self.stats, "receive", &e);
            }
            self.ctx.commissioning.restart_window(now);
        }
    }

    /// Run the state machine of the joint being commissioned.
    fn enable_next_drive(&mut self) {
        let joint = self.ctx.commissioning.drive_index();
        let Some(channel) = self.ctx.layout.channel(joint).copied() else {
            return;
        };
        let Some(drive) = self.ctx.drives.get_mut(joint) else {
            return;
        };
        let data = match self.ctx.lifecycle.domain_data() {
            Ok(data) => data,
            Err(e) => {
                bus_error(&mut self.stats, "domain data", &e);
                return;
            }
        };

        let update = drive.update(data, &channel);
        self.ctx.commissioning.observe_drive_state(update.state);
    }

    /// Steady state: per-joint fault handling, then the command table into
    /// every target position.
    fn write_commands(&mut self) {
        let n = self.ctx.layout.len();
        let data = match self.ctx.lifecycle.domain_data() {
            Ok(data) => data,
            Err(e) => {
                bus_error(&mut self.stats, "domain data", &e);
                return;
            }
        };

        let channels = self.ctx.layout.channels();
        for (drive, channel) in self.ctx.drives.iter_mut().zip(channels) {
            drive.update(data, channel);
        }

        self.ctx.commands.copy_into(&mut self.targets[..n]);
        for (channel, &target) in channels.iter().zip(&self.targets[..n]) {
            channel.set_target_position(data, target);
        }
    }
}

fn bus_error(stats: &mut CycleStats, op: &str, err: &FieldbusError) {
    if stats.bus_error() {
        warn!("Bus error #{} during {}: {}", stats.bus_errors, op, err);
    }
}

fn log_master_state(last: Option<&MasterState>, now: &MasterState) {
    if last.is_none_or(|l| l.slaves_responding != now.slaves_responding) {
        info!("{} slave(s) responding", now.slaves_responding);
    }
    if last.is_none_or(|l| l.al_states != now.al_states) {
        info!("AL states: 0x{:02X}", now.al_states);
    }
    if last.is_none_or(|l| l.link_up != now.link_up) {
        info!("Link is {}", if now.link_up { "up" } else { "down" });
    }
}

fn log_domain_state(last: Option<&DomainState>, now: &DomainState) {
    if last.is_none_or(|l| l.working_counter != now.working_counter) {
        info!("Domain: WC {}", now.working_counter);
    }
    if last.is_none_or(|l| l.wc_state != now.wc_state) {
        info!("Domain: State {:?}", now.wc_state);
    }
}

// ─── Clock ──────────────────────────────────────────────────────────

#[cfg(feature = "rt")]
fn monotonic() -> Result<nix::sys::time::TimeSpec, CycleError> {
    nix::time::clock_gettime(nix::time::ClockId::CLOCK_MONOTONIC)
        .map_err(|e| CycleError::Clock(e.to_string()))
}

/// Distance from `from` to `to`, zero if `to` is earlier.
#[cfg(feature = "rt")]
fn elapsed(from: nix::sys::time::TimeSpec, to: nix::sys::time::TimeSpec) -> Duration {
    use nix::sys::time::TimeValLike;
    Duration::from_nanos(u64::try_from((to - from).num_nanoseconds()).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_track_min_max_mean() {
        let mut stats = CycleStats::default();
        assert_eq!(stats.mean(), Duration::ZERO);
        assert_eq!(stats.min, None);

        stats.record(Duration::from_micros(400), Duration::from_micros(3));
        stats.record(Duration::from_micros(700), Duration::from_micros(1));
        stats.record(Duration::from_micros(100), Duration::from_micros(2));
        assert_eq!(stats.timed_cycles, 3);
        assert_eq!(stats.min, Some(Duration::from_micros(100)));
        assert_eq!(stats.max, Duration::from_micros(700));
        assert_eq!(stats.last, Duration::from_micros(100));
        assert_eq!(stats.max_wake_latency, Duration::from_micros(3));
        assert_eq!(stats.mean(), Duration::from_micros(400));
    }

    #[test]
    fn error_logging_is_rate_limited() {
        let logged: Vec<u64> = (1..=3000).filter(|&n| rate_limited(n)).collect();
        assert_eq!(logged.len(), 13);
        assert_eq!(&logged[10..], &[1000, 2000, 3000]);

        let mut stats = CycleStats::default();
        for _ in 0..11 {
            stats.bus_error();
        }
        assert_eq!(stats.bus_errors, 11);
        assert!(!stats.bus_error());
        assert!(stats.overrun());
        assert_eq!(stats.overruns, 1);
    }

    #[test]
    fn rt_setup_without_rt_feature_is_noop() {
        #[cfg(not(feature = "rt"))]
        assert!(rt_setup(0, 80).is_ok());
    }

    #[test]
    fn cycle_error_names_failed_step() {
        let err = CycleError::RtSetup {
            step: "mlockall",
            reason: "EPERM".into(),
        };
        assert_eq!(err.to_string(), "RT setup failed at mlockall: EPERM");
    }
}

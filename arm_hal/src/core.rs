//! Arm core: startup and thread management.
//!
//! `ArmCore` is the main entry point. [`ArmCore::start`] brings the bus up
//! and returns a [`CyclicExchange`]; [`ArmCore::run`] drives it on a
//! dedicated loop thread next to the command ingest and state publisher
//! threads until the running flag clears.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use arm_common::config::ArmConfig;
use arm_common::fieldbus::EthercatMaster;
use arm_common::joint::{JointCommand, JointStateMsg};
use crossbeam_channel::{Receiver, Sender};
use tracing::{error, info};

use crate::bridge::{CommandIngest, StatePublisher};
use crate::context::ArmContext;
use crate::cycle::{CycleError, CyclicExchange, rt_setup};
use crate::driver_registry::DriverRegistry;
use crate::error::StartupError;

/// Stack size of the loop thread; covers the prefaulted region.
const LOOP_STACK_SIZE: usize = 4 * 1024 * 1024;

/// Real-time placement of the loop thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtOptions {
    /// CPU core the loop thread is pinned to.
    pub cpu_core: usize,
    /// SCHED_FIFO priority.
    pub priority: i32,
}

/// Arm core: configuration, backend registry and running flag.
pub struct ArmCore {
    config: ArmConfig,
    registry: DriverRegistry,
    running: Arc<AtomicBool>,
    rt: Option<RtOptions>,
}

impl ArmCore {
    /// Create a core with the built-in backends.
    ///
    /// # Errors
    /// Returns error if configuration validation fails.
    pub fn new(config: ArmConfig) -> Result<Self, StartupError> {
        config.validate()?;
        info!(
            "ArmCore created: {} joints, cycle_time={}us, publish_period={}ms",
            config.joint_count(),
            config.cycle_time_us,
            config.publish_period_ms
        );
        Ok(Self {
            config,
            registry: DriverRegistry::with_builtin(),
            running: Arc::new(AtomicBool::new(true)),
            rt: None,
        })
    }

    /// Replace the backend registry.
    pub fn with_registry(mut self, registry: DriverRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Run the loop thread with RT placement.
    pub fn with_rt(mut self, rt: RtOptions) -> Self {
        self.rt = Some(rt);
        self
    }

    /// Configuration.
    pub fn config(&self) -> &ArmConfig {
        &self.config
    }

    /// Running flag for signal handlers.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Request shutdown of all threads.
    pub fn shutdown(&self) {
        info!("Shutdown requested");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Bring the bus up with the backend registered as `master_name`.
    ///
    /// # Errors
    /// Unknown backend or any startup failure.
    pub fn start(&self, master_name: &str) -> Result<CyclicExchange, StartupError> {
        info!("Starting with master driver '{}'", master_name);
        let master = self.registry.create_master(master_name).inspect_err(|_| {
            error!("Available master drivers: {:?}", self.registry.names());
        })?;
        self.start_with(master)
    }

    /// Bring the bus up with an already constructed backend.
    pub fn start_with(
        &self,
        master: Box<dyn EthercatMaster>,
    ) -> Result<CyclicExchange, StartupError> {
        let ctx = ArmContext::startup(self.config.clone(), master)?;
        Ok(CyclicExchange::new(ctx))
    }

    /// Run the loop, ingest and publisher threads until the running flag
    /// clears. The master is released when the loop thread exits.
    ///
    /// # Errors
    /// RT setup failure, or a thread that could not be spawned or panicked.
    pub fn run(
        &self,
        mut exchange: CyclicExchange,
        commands: Receiver<JointCommand>,
        states: Sender<JointStateMsg>,
    ) -> Result<(), StartupError> {
        let ctx = exchange.context();
        let ingest = CommandIngest::new(ctx.commands(), ctx.codec());
        let publisher = StatePublisher::new(
            ctx.snapshot(),
            ctx.codec(),
            ctx.config().joint_names(),
            ctx.config().publish_period(),
        );

        let loop_thread = {
            let running = Arc::clone(&self.running);
            let rt = self.rt;
            thread::Builder::new()
                .name("arm_loop".into())
                .stack_size(LOOP_STACK_SIZE)
                .spawn(move || -> Result<(), CycleError> {
                    let result = match rt {
                        Some(rt) => rt_setup(rt.cpu_core, rt.priority),
                        None => Ok(()),
                    }
                    .and_then(|()| exchange.run(&running));
                    if result.is_err() {
                        running.store(false, Ordering::SeqCst);
                    }
                    exchange.shutdown();
                    result
                })
                .map_err(|e| self.spawn_failed("arm_loop", e))?
        };

        let ingest_thread = {
            let running = Arc::clone(&self.running);
            thread::Builder::new()
                .name("arm_ingest".into())
                .spawn(move || ingest.run(commands, &running))
                .map_err(|e| self.spawn_failed("arm_ingest", e))?
        };

        let publisher_thread = {
            let running = Arc::clone(&self.running);
            thread::Builder::new()
                .name("arm_publisher".into())
                .spawn(move || publisher.run(states, &running))
                .map_err(|e| self.spawn_failed("arm_publisher", e))?
        };

        info!("ArmCore running");
        let loop_result = join("arm_loop", loop_thread);
        self.running.store(false, Ordering::SeqCst);
        join("arm_ingest", ingest_thread)?;
        join("arm_publisher", publisher_thread)?;

        loop_result?.map_err(|e| {
            error!("Loop thread failed: {}", e);
            StartupError::from(e)
        })?;
        info!("ArmCore stopped");
        Ok(())
    }

    fn spawn_failed(&self, name: &'static str, err: std::io::Error) -> StartupError {
        self.running.store(false, Ordering::SeqCst);
        StartupError::Thread {
            name,
            reason: err.to_string(),
        }
    }
}

fn join<T>(name: &'static str, handle: JoinHandle<T>) -> Result<T, StartupError> {
    handle.join().map_err(|_| StartupError::Thread {
        name,
        reason: "panicked".to_string(),
    })
}

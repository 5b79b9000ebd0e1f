//! Owning context of the arm interface.
//!
//! Built once by [`ArmContext::startup`]: master request, domain
//! configuration, SDO parameter initialization, activation. Any failure
//! aborts before the cyclic loop is scheduled and the master is released on
//! the way out.

use std::sync::Arc;
use std::time::Instant;

use arm_common::codec::PositionCodec;
use arm_common::config::ArmConfig;
use arm_common::fieldbus::EthercatMaster;
use arm_common::joint::{JointCommandTable, JointStateSnapshot};
use tracing::info;

use crate::domain::DomainLayout;
use crate::drive::{Commissioning, DriveStateMachine};
use crate::error::StartupError;
use crate::master::MasterLifecycle;
use crate::sdo::SdoInitializer;

/// Everything the cyclic loop touches, owned in one place.
pub struct ArmContext {
    pub(crate) config: ArmConfig,
    pub(crate) codec: PositionCodec,
    pub(crate) lifecycle: MasterLifecycle,
    pub(crate) layout: DomainLayout,
    pub(crate) drives: Vec<DriveStateMachine>,
    pub(crate) commissioning: Commissioning,
    pub(crate) commands: Arc<JointCommandTable>,
    pub(crate) snapshot: Arc<JointStateSnapshot>,
}

impl ArmContext {
    /// Bring the bus up with `master` and return a context ready for cyclic
    /// exchange.
    ///
    /// The command table is seeded with every joint's current position.
    ///
    /// # Errors
    /// Any configuration, master, mapping, SDO or activation failure.
    pub fn startup(
        config: ArmConfig,
        master: Box<dyn EthercatMaster>,
    ) -> Result<Self, StartupError> {
        config.validate()?;
        let joints = config.joint_count();

        let mut lifecycle =
            MasterLifecycle::acquire(master, config.master_index, config.master_request_timeout())?;

        let layout = lifecycle.configure_domain(&config.joints, config.slave)?;

        let commands = Arc::new(JointCommandTable::new(joints));
        SdoInitializer::new(lifecycle.master_mut(), config.sdo_timeout())
            .initialize_all(&config.joints, &commands)?;

        lifecycle.activate(&layout)?;

        let drives = config
            .joints
            .iter()
            .map(|j| DriveStateMachine::new(j.name.clone()))
            .collect();
        let codec = PositionCodec::new(config.codec.counts_per_revolution);
        let commissioning =
            Commissioning::new(joints, config.commissioning_timeout(), Instant::now());

        info!("Arm context ready: {} joints", joints);
        Ok(Self {
            codec,
            lifecycle,
            layout,
            drives,
            commissioning,
            commands,
            snapshot: Arc::new(JointStateSnapshot::new(joints)),
            config,
        })
    }

    /// Validated configuration.
    pub fn config(&self) -> &ArmConfig {
        &self.config
    }

    /// Position codec.
    pub fn codec(&self) -> PositionCodec {
        self.codec
    }

    /// Number of joints.
    pub fn joint_count(&self) -> usize {
        self.layout.len()
    }

    /// Shared command table.
    pub fn commands(&self) -> Arc<JointCommandTable> {
        Arc::clone(&self.commands)
    }

    /// Shared state snapshot.
    pub fn snapshot(&self) -> Arc<JointStateSnapshot> {
        Arc::clone(&self.snapshot)
    }

    /// Commissioning progress.
    pub fn commissioning(&self) -> &Commissioning {
        &self.commissioning
    }

    /// Drive state machines in joint order.
    pub fn drives(&self) -> &[DriveStateMachine] {
        &self.drives
    }

    /// Master lifecycle.
    pub fn lifecycle(&self) -> &MasterLifecycle {
        &self.lifecycle
    }

    /// Release the master. Also happens on drop.
    pub fn release(&mut self) {
        self.lifecycle.release();
    }
}

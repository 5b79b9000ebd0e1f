//! Master lifecycle: request → configure → activate → release.
//!
//! `MasterLifecycle` is the only owner of the master handle. Release runs
//! exactly once, either explicitly through [`MasterLifecycle::release`] or
//! from `Drop` on any exit path (including unwinding out of startup).

use std::thread;
use std::time::{Duration, Instant};

use arm_common::config::{JointConfig, SlaveIdentity};
use arm_common::fieldbus::{
    DomainIdx, DomainState, EthercatMaster, FieldbusError, MasterState, SlaveAddr,
    SlaveConfigIdx, SlaveConfigState, SlaveId,
};
use tracing::{debug, info, warn};

use crate::domain::{DomainLayout, JointChannel, SIGNALS, sync_configs};
use crate::error::StartupError;

/// First delay between master request attempts.
const REQUEST_BACKOFF_INITIAL: Duration = Duration::from_millis(10);

/// Upper bound for the delay between master request attempts.
const REQUEST_BACKOFF_MAX: Duration = Duration::from_millis(500);

/// Owner of the master handle, its domain and the per-joint slave configs.
pub struct MasterLifecycle {
    master: Box<dyn EthercatMaster>,
    index: u32,
    domain: Option<DomainIdx>,
    slave_configs: Vec<SlaveConfigIdx>,
    active: bool,
    released: bool,
}

impl MasterLifecycle {
    /// Claim master `index`, retrying with exponential backoff until
    /// `timeout` has elapsed.
    ///
    /// # Errors
    /// `StartupError::MasterUnavailable` when the deadline passes.
    pub fn acquire(
        mut master: Box<dyn EthercatMaster>,
        index: u32,
        timeout: Duration,
    ) -> Result<Self, StartupError> {
        info!("Requesting master {} ({})", index, master.name());

        let deadline = Instant::now() + timeout;
        let mut delay = REQUEST_BACKOFF_INITIAL;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match master.request(index) {
                Ok(()) => {
                    info!("Master {} acquired after {} attempt(s)", index, attempts);
                    return Ok(Self {
                        master,
                        index,
                        domain: None,
                        slave_configs: Vec::new(),
                        active: false,
                        released: false,
                    });
                }
                Err(e) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(StartupError::MasterUnavailable {
                            index,
                            attempts,
                            source: e,
                        });
                    }
                    debug!("Master {} not available ({}), retrying in {:?}", index, e, delay);
                    thread::sleep(delay.min(deadline - now));
                    delay = (delay * 2).min(REQUEST_BACKOFF_MAX);
                }
            }
        }
    }

    /// Create the domain and register the signal list of every joint.
    ///
    /// Joint `i` is configured at alias 0, position `i`.
    ///
    /// # Errors
    /// Any backend failure is fatal and names the joint it occurred on.
    pub fn configure_domain(
        &mut self,
        joints: &[JointConfig],
        identity: SlaveIdentity,
    ) -> Result<DomainLayout, StartupError> {
        info!("Registering domain...");
        let domain = self
            .master
            .create_domain()
            .map_err(StartupError::DomainCreation)?;
        self.domain = Some(domain);

        let expected = SlaveId {
            vendor_id: identity.vendor_id,
            product_code: identity.product_code,
        };
        let syncs = sync_configs();
        let mut layout = DomainLayout::new();

        info!("Configuring PDOs for {} joints...", joints.len());
        for (joint, cfg) in joints.iter().enumerate() {
            let position = u16::try_from(joint).map_err(|_| StartupError::SlaveConfig {
                joint,
                source: FieldbusError::Io(format!("joint index {joint} out of range")),
            })?;
            let sc = self
                .master
                .configure_slave(SlaveAddr::ByPos(position), expected)
                .map_err(|source| StartupError::SlaveConfig { joint, source })?;

            self.master
                .configure_pdos(sc, &syncs)
                .map_err(|source| StartupError::PdoMapping { joint, source })?;

            let mut channel = JointChannel::default();
            for spec in SIGNALS {
                let offset = self
                    .master
                    .register_pdo_entry(sc, spec.entry(), domain)
                    .map_err(|source| StartupError::PdoRegistration {
                        joint,
                        entry: spec.entry(),
                        source,
                    })?;
                channel.set_offset(spec.signal, offset);
            }
            debug!("Joint {} ({}) channel: {:?}", joint, cfg.name, channel);

            layout.push(channel).map_err(|_| StartupError::PdoMapping {
                joint,
                source: FieldbusError::Io("too many joints for the domain layout".to_string()),
            })?;
            self.slave_configs.push(sc);
        }

        info!(
            "Domain {} configured: {} joints, {} bytes",
            domain,
            layout.len(),
            layout.required_size()
        );
        Ok(layout)
    }

    /// Commit configuration and verify the live process image covers `layout`.
    ///
    /// # Errors
    /// `Activation` if the master refuses, `DomainMemory` if the process
    /// data is missing or smaller than the layout.
    pub fn activate(&mut self, layout: &DomainLayout) -> Result<(), StartupError> {
        let domain = self.domain.ok_or(StartupError::DomainMemory(FieldbusError::NotActive))?;

        info!("Activating master...");
        self.master.activate().map_err(StartupError::Activation)?;
        self.active = true;

        let len = self
            .master
            .domain_data(domain)
            .map_err(StartupError::DomainMemory)?
            .len();
        if !layout.fits(len) {
            return Err(StartupError::DomainMemory(FieldbusError::Io(format!(
                "process image is {} bytes, layout needs {}",
                len,
                layout.required_size()
            ))));
        }
        info!("Master {} active, process image {} bytes", self.index, len);
        Ok(())
    }

    /// Release the master. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        info!("Releasing master {}...", self.index);
        self.master.release();
        self.released = true;
        self.active = false;
    }

    // ─── Cyclic access ──────────────────────────────────────────────

    /// Receive frames and evaluate them into the domain.
    pub fn receive(&mut self) -> Result<(), FieldbusError> {
        let domain = self.domain.ok_or(FieldbusError::NotActive)?;
        self.master.receive()?;
        self.master.process_domain(domain)
    }

    /// Queue the domain and transmit.
    pub fn send(&mut self) -> Result<(), FieldbusError> {
        let domain = self.domain.ok_or(FieldbusError::NotActive)?;
        self.master.queue_domain(domain)?;
        self.master.send()
    }

    /// Live process image.
    pub fn domain_data(&mut self) -> Result<&mut [u8], FieldbusError> {
        let domain = self.domain.ok_or(FieldbusError::NotActive)?;
        self.master.domain_data(domain)
    }

    /// Retry configuration of non-operational slaves.
    pub fn reset(&mut self) -> Result<(), FieldbusError> {
        warn!("Resetting master {}", self.index);
        self.master.reset()
    }

    /// Master-wide state.
    pub fn master_state(&self) -> Result<MasterState, FieldbusError> {
        self.master.state()
    }

    /// Domain working counter state.
    pub fn domain_state(&self) -> Result<DomainState, FieldbusError> {
        let domain = self.domain.ok_or(FieldbusError::NotActive)?;
        self.master.domain_state(domain)
    }

    /// EtherCAT state of joint `joint`'s slave.
    pub fn slave_state(&mut self, joint: usize) -> Result<SlaveConfigState, FieldbusError> {
        let sc = *self
            .slave_configs
            .get(joint)
            .ok_or(FieldbusError::UnknownSlaveConfig(joint))?;
        self.master.slave_config_state(sc)
    }

    /// Underlying master, for startup SDO transfers.
    pub fn master_mut(&mut self) -> &mut dyn EthercatMaster {
        self.master.as_mut()
    }

    /// Whether `activate` succeeded and the master is not released.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the master has been released.
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for MasterLifecycle {
    fn drop(&mut self) {
        self.release();
    }
}

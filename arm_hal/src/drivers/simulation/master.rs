//! Software EtherCAT master.
//!
//! Domains and slave configurations live in the master; drives live in the
//! shared [`SimBus`] so a [`SimHandle`] can inspect them while the master is
//! owned by the cyclic loop.
//!
//! Exchange timing follows a real ring: `queue_domain` latches outputs into
//! the drives, `send` advances AL states and steps every drive in OP,
//! `process_domain` copies the inputs of drives in OP back into the domain.

use std::sync::Arc;
use std::time::Duration;

use arm_common::consts::objects;
use arm_common::fieldbus::{
    DomainIdx, DomainState, EthercatMaster, FieldbusError, MasterState, ObjectLabel,
    PdoEntryIdx, PdoEntryInfo, SdoIdx, SlaveAddr, SlaveConfigIdx, SlaveConfigState, SlaveId,
    SlavePos, SyncConfig, WcState,
};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::bus::{SimBus, SimHandle, SimOptions};

/// Working counter contribution of a slave with inputs and outputs.
const WC_PER_SLAVE: u32 = 3;

#[derive(Debug, Default)]
struct SimDomain {
    size: usize,
    data: Vec<u8>,
    state: DomainState,
}

#[derive(Debug)]
struct SimSlaveConfig {
    position: u16,
    mapped: Vec<PdoEntryInfo>,
    registered: Vec<(PdoEntryIdx, DomainIdx, usize)>,
}

impl SimSlaveConfig {
    fn offset(&self, index: u16) -> Option<(DomainIdx, usize)> {
        self.registered
            .iter()
            .find(|(entry, _, _)| ObjectLabel::from(entry).index() == index)
            .map(|&(_, domain, offset)| (domain, offset))
    }
}

/// Simulated master backend.
pub struct SimulatedMaster {
    bus: Arc<Mutex<SimBus>>,
    domains: Vec<SimDomain>,
    configs: Vec<SimSlaveConfig>,
    requested: Option<u32>,
    active: bool,
}

impl SimulatedMaster {
    /// Master over a fresh bus built from `options`.
    pub fn new(options: SimOptions) -> Self {
        Self {
            bus: Arc::new(Mutex::new(SimBus::new(&options))),
            domains: Vec::new(),
            configs: Vec::new(),
            requested: None,
            active: false,
        }
    }

    /// Inspection handle onto this master's bus.
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            bus: Arc::clone(&self.bus),
        }
    }

    fn ensure_requested(&self) -> Result<(), FieldbusError> {
        if self.requested.is_none() || self.bus.lock().released {
            return Err(FieldbusError::NotRequested);
        }
        Ok(())
    }

    fn ensure_configurable(&self) -> Result<(), FieldbusError> {
        self.ensure_requested()?;
        if self.active {
            return Err(FieldbusError::AlreadyActive);
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), FieldbusError> {
        if !self.active {
            return Err(FieldbusError::NotActive);
        }
        Ok(())
    }

    fn domain(&self, domain: DomainIdx) -> Result<&SimDomain, FieldbusError> {
        self.domains
            .get(domain)
            .ok_or(FieldbusError::UnknownDomain(domain))
    }

    fn config(&self, config: SlaveConfigIdx) -> Result<&SimSlaveConfig, FieldbusError> {
        self.configs
            .get(config)
            .ok_or(FieldbusError::UnknownSlaveConfig(config))
    }

    /// Bus access for an SDO transfer on `position`, with injected aborts
    /// applied.
    fn sdo_guard(&self, position: u16, sdo: SdoIdx) -> Result<(), FieldbusError> {
        self.ensure_requested()?;
        let bus = self.bus.lock();
        if usize::from(position) >= bus.drives.len() {
            return Err(FieldbusError::SdoTimeout { position, sdo });
        }
        if let Some(&code) = bus.sdo_aborts.get(&(position, ObjectLabel::from(sdo))) {
            return Err(FieldbusError::SdoAbort {
                position,
                sdo,
                code,
            });
        }
        Ok(())
    }
}

impl Default for SimulatedMaster {
    fn default() -> Self {
        Self::new(SimOptions::default())
    }
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    data.get(offset..offset + 2)
        .map_or(0, |b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_i32(data: &[u8], offset: usize) -> i32 {
    data.get(offset..offset + 4)
        .map_or(0, |b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn write_bytes(data: &mut [u8], offset: usize, bytes: &[u8]) {
    if let Some(dst) = data.get_mut(offset..offset + bytes.len()) {
        dst.copy_from_slice(bytes);
    }
}

impl EthercatMaster for SimulatedMaster {
    fn name(&self) -> &'static str {
        super::DRIVER_NAME
    }

    fn request(&mut self, index: u32) -> Result<(), FieldbusError> {
        let mut bus = self.bus.lock();
        bus.request_attempts += 1;
        if index != 0 || bus.request_attempts <= bus.unavailable_requests {
            return Err(FieldbusError::MasterUnavailable(index));
        }
        bus.released = false;
        self.requested = Some(index);
        Ok(())
    }

    fn create_domain(&mut self) -> Result<DomainIdx, FieldbusError> {
        self.ensure_configurable()?;
        self.domains.push(SimDomain::default());
        Ok(self.domains.len() - 1)
    }

    fn configure_slave(
        &mut self,
        addr: SlaveAddr,
        expected: SlaveId,
    ) -> Result<SlaveConfigIdx, FieldbusError> {
        self.ensure_configurable()?;
        let (alias, position) = addr.as_pair();
        {
            let bus = self.bus.lock();
            if alias != 0 || usize::from(position) >= bus.drives.len() {
                return Err(FieldbusError::SlaveConfig {
                    addr,
                    reason: "no slave at this address".to_string(),
                });
            }
            if bus.failing_slave_config == Some(position) {
                return Err(FieldbusError::SlaveConfig {
                    addr,
                    reason: "configuration refused".to_string(),
                });
            }
            if bus.identity != expected {
                return Err(FieldbusError::SlaveConfig {
                    addr,
                    reason: format!(
                        "identity mismatch: expected {:#010x}:{:#010x}, found {:#010x}:{:#010x}",
                        expected.vendor_id,
                        expected.product_code,
                        bus.identity.vendor_id,
                        bus.identity.product_code
                    ),
                });
            }
        }
        self.configs.push(SimSlaveConfig {
            position,
            mapped: Vec::new(),
            registered: Vec::new(),
        });
        Ok(self.configs.len() - 1)
    }

    fn configure_pdos(
        &mut self,
        config: SlaveConfigIdx,
        syncs: &[SyncConfig],
    ) -> Result<(), FieldbusError> {
        self.ensure_configurable()?;
        let position = self.config(config)?.position;
        if self.bus.lock().failing_pdo_config == Some(position) {
            return Err(FieldbusError::Io(format!(
                "PDO mapping rejected by slave {position}"
            )));
        }
        let mapped = syncs
            .iter()
            .flat_map(|s| s.pdos.iter())
            .flat_map(|p| p.entries.iter().cloned())
            .collect();
        if let Some(sc) = self.configs.get_mut(config) {
            sc.mapped = mapped;
        }
        Ok(())
    }

    fn register_pdo_entry(
        &mut self,
        config: SlaveConfigIdx,
        entry: PdoEntryIdx,
        domain: DomainIdx,
    ) -> Result<usize, FieldbusError> {
        self.ensure_configurable()?;
        self.domain(domain)?;
        let bit_len = self
            .config(config)?
            .mapped
            .iter()
            .find(|m| m.entry_idx == entry)
            .map(|m| m.bit_len)
            .ok_or(FieldbusError::PdoEntryNotMapped { config, entry })?;

        let dom = self
            .domains
            .get_mut(domain)
            .ok_or(FieldbusError::UnknownDomain(domain))?;
        let offset = dom.size;
        dom.size += usize::from(bit_len).div_ceil(8);

        if let Some(sc) = self.configs.get_mut(config) {
            sc.registered.push((entry, domain, offset));
        }
        Ok(offset)
    }

    fn activate(&mut self) -> Result<(), FieldbusError> {
        self.ensure_configurable()?;
        let mut bus = self.bus.lock();
        if bus.fail_activation {
            return Err(FieldbusError::Io("activation refused".to_string()));
        }
        for domain in &mut self.domains {
            domain.data = vec![0; domain.size];
        }
        let delay = bus.op_delay_cycles;
        for sc in &self.configs {
            if let Some(drive) = bus.drives.get_mut(usize::from(sc.position)) {
                drive.start_bringup(delay);
            }
        }
        self.active = true;
        info!(
            "Simulated master active: {} slave configs, {} domain(s)",
            self.configs.len(),
            self.domains.len()
        );
        Ok(())
    }

    fn domain_size(&self, domain: DomainIdx) -> Result<usize, FieldbusError> {
        Ok(self.domain(domain)?.size)
    }

    fn domain_data(&mut self, domain: DomainIdx) -> Result<&mut [u8], FieldbusError> {
        self.ensure_active()?;
        self.domains
            .get_mut(domain)
            .map(|d| d.data.as_mut_slice())
            .ok_or(FieldbusError::UnknownDomain(domain))
    }

    fn receive(&mut self) -> Result<(), FieldbusError> {
        self.ensure_active()
    }

    fn process_domain(&mut self, domain: DomainIdx) -> Result<(), FieldbusError> {
        self.ensure_active()?;
        let bus = self.bus.lock();
        let dom = self
            .domains
            .get_mut(domain)
            .ok_or(FieldbusError::UnknownDomain(domain))?;

        let mut slaves = 0u32;
        let mut exchanged = 0u32;
        for sc in self.configs.iter() {
            let Some(drive) = bus.drives.get(usize::from(sc.position)) else {
                continue;
            };
            if !sc.registered.iter().any(|&(_, d, _)| d == domain) {
                continue;
            }
            slaves += 1;
            if !drive.is_operational() {
                continue;
            }
            exchanged += 1;
            if let Some((_, off)) = sc.offset(objects::STATUS_WORD) {
                write_bytes(&mut dom.data, off, &drive.status_word().to_le_bytes());
            }
            if let Some((_, off)) = sc.offset(objects::POSITION_ACTUAL) {
                write_bytes(&mut dom.data, off, &drive.actual().to_le_bytes());
            }
        }

        dom.state = DomainState {
            working_counter: exchanged * WC_PER_SLAVE,
            wc_state: if exchanged == 0 {
                WcState::Zero
            } else if exchanged < slaves {
                WcState::Incomplete
            } else {
                WcState::Complete
            },
        };
        Ok(())
    }

    fn queue_domain(&mut self, domain: DomainIdx) -> Result<(), FieldbusError> {
        self.ensure_active()?;
        let dom = self.domain(domain)?;
        let mut bus = self.bus.lock();
        for sc in &self.configs {
            let Some(drive) = bus.drives.get_mut(usize::from(sc.position)) else {
                continue;
            };
            if !drive.is_operational() {
                continue;
            }
            let (Some((d_cw, cw_off)), Some((d_tp, tp_off))) = (
                sc.offset(objects::CONTROL_WORD),
                sc.offset(objects::TARGET_POSITION),
            ) else {
                continue;
            };
            if d_cw == domain && d_tp == domain {
                drive.set_outputs(read_u16(&dom.data, cw_off), read_i32(&dom.data, tp_off));
            }
        }
        Ok(())
    }

    fn send(&mut self) -> Result<(), FieldbusError> {
        self.ensure_active()?;
        let mut bus = self.bus.lock();
        let blocked = bus.op_blocked();
        for drive in &mut bus.drives {
            if drive.is_operational() {
                drive.step();
            } else {
                drive.advance_al(blocked);
            }
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), FieldbusError> {
        self.ensure_active()?;
        let mut bus = self.bus.lock();
        bus.resets += 1;
        let delay = bus.op_delay_cycles;
        for drive in &mut bus.drives {
            drive.start_bringup(delay);
        }
        debug!("Simulated master reset #{}", bus.resets);
        Ok(())
    }

    fn state(&self) -> Result<MasterState, FieldbusError> {
        self.ensure_requested()?;
        let bus = self.bus.lock();
        Ok(MasterState {
            slaves_responding: bus.drives.len() as u32,
            al_states: bus.drives.iter().fold(0, |acc, d| acc | d.al_state() as u8),
            link_up: true,
        })
    }

    fn domain_state(&self, domain: DomainIdx) -> Result<DomainState, FieldbusError> {
        Ok(self.domain(domain)?.state)
    }

    fn slave_config_state(
        &mut self,
        config: SlaveConfigIdx,
    ) -> Result<SlaveConfigState, FieldbusError> {
        let position = self.config(config)?.position;
        let bus = self.bus.lock();
        let drive = bus
            .drives
            .get(usize::from(position))
            .ok_or(FieldbusError::UnknownSlaveConfig(config))?;
        Ok(SlaveConfigState {
            online: true,
            operational: drive.is_operational(),
            al_state: drive.al_state(),
        })
    }

    fn sdo_download(
        &mut self,
        position: SlavePos,
        sdo: SdoIdx,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<(), FieldbusError> {
        let position = u16::from(position);
        self.sdo_guard(position, sdo)?;
        let mut bus = self.bus.lock();
        let drive = bus
            .drives
            .get_mut(usize::from(position))
            .ok_or(FieldbusError::SdoTimeout { position, sdo })?;
        drive
            .download(sdo, data)
            .map_err(|code| FieldbusError::SdoAbort {
                position,
                sdo,
                code,
            })
    }

    fn sdo_upload(
        &mut self,
        position: SlavePos,
        sdo: SdoIdx,
        target: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, FieldbusError> {
        let position = u16::from(position);
        self.sdo_guard(position, sdo)?;
        let bus = self.bus.lock();
        let drive = bus
            .drives
            .get(usize::from(position))
            .ok_or(FieldbusError::SdoTimeout { position, sdo })?;
        let mut value = drive.upload(sdo).map_err(|code| FieldbusError::SdoAbort {
            position,
            sdo,
            code,
        })?;
        if bus.corrupt_readback.contains(&(position, ObjectLabel::from(sdo))) {
            if let Some(first) = value.first_mut() {
                *first = first.wrapping_add(1);
            }
        }

        let capacity = target.len();
        let dst = target
            .get_mut(..value.len())
            .ok_or(FieldbusError::SdoSize {
                sdo,
                expected: capacity,
                actual: value.len(),
            })?;
        dst.copy_from_slice(&value);
        Ok(value.len())
    }

    fn release(&mut self) {
        let mut bus = self.bus.lock();
        if !bus.released {
            bus.released = true;
            info!("Simulated master released");
        }
        self.active = false;
        self.requested = None;
    }
}

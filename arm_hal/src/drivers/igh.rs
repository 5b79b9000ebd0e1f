//! IgH EtherLab master backend.
//!
//! Drives the EtherCAT kernel module through `/dev/EtherCATn` with the
//! `ethercat` crate. Built with the `igh` feature only, since the bindings
//! need the EtherLab sources at build time.
//!
//! The module keeps slave configurations itself and hands back the existing
//! configuration when asked for a known alias/position again, so a
//! configuration is re-opened from its address whenever it is needed.
//!
//! SDO transfers run with the module's own mailbox timeout.

use std::time::Duration;

use arm_common::fieldbus::{
    DomainIdx, DomainState, EthercatMaster, FieldbusError, MasterState, ObjectLabel,
    PdoEntryIdx, SdoIdx, SlaveAddr, SlaveConfigIdx, SlaveConfigState, SlaveId, SlavePos,
    SyncConfig, WcState,
};
use ethercat::{Master, MasterAccess, SlaveConfig};
use tracing::{debug, info, warn};

/// Registry name of the IgH backend.
pub const DRIVER_NAME: &str = "igh";

/// Factory function for the driver registry.
pub fn create_master() -> Box<dyn EthercatMaster> {
    Box::new(IghMaster::default())
}

/// Address and identity a slave configuration was created with.
#[derive(Debug, Clone)]
struct ConfigRequest {
    addr: SlaveAddr,
    expected: SlaveId,
}

/// Master backend on the IgH kernel module.
#[derive(Default)]
pub struct IghMaster {
    master: Option<Master>,
    index: u32,
    domains: Vec<DomainIdx>,
    configs: Vec<ConfigRequest>,
    active: bool,
}

/// Expedited SDO payload, sized like the object it is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SdoWord {
    U8(u8),
    U16(u16),
    U32(u32),
}

impl SdoWord {
    fn from_le(data: &[u8]) -> Option<Self> {
        match *data {
            [b] => Some(Self::U8(b)),
            [b0, b1] => Some(Self::U16(u16::from_le_bytes([b0, b1]))),
            [b0, b1, b2, b3] => Some(Self::U32(u32::from_le_bytes([b0, b1, b2, b3]))),
            _ => None,
        }
    }
}

fn io(err: ethercat::Error) -> FieldbusError {
    FieldbusError::Io(err.to_string())
}

fn sdo_failed(position: SlavePos, sdo: SdoIdx, err: ethercat::Error) -> FieldbusError {
    FieldbusError::Io(format!(
        "SDO {} on slave {}: {}",
        ObjectLabel::from(sdo),
        u16::from(position),
        err
    ))
}

impl IghMaster {
    fn master(&self) -> Result<&Master, FieldbusError> {
        self.master.as_ref().ok_or(FieldbusError::NotRequested)
    }

    fn master_mut(&mut self) -> Result<&mut Master, FieldbusError> {
        self.master.as_mut().ok_or(FieldbusError::NotRequested)
    }

    fn ensure_configurable(&self) -> Result<(), FieldbusError> {
        self.master()?;
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

    fn domain(&self, domain: DomainIdx) -> Result<ethercat::DomainIdx, FieldbusError> {
        if !self.domains.contains(&domain) {
            return Err(FieldbusError::UnknownDomain(domain));
        }
        Ok(ethercat::DomainIdx::from(domain))
    }

    fn slave_config(&mut self, config: SlaveConfigIdx) -> Result<SlaveConfig<'_>, FieldbusError> {
        let ConfigRequest { addr, expected } = self
            .configs
            .get(config)
            .cloned()
            .ok_or(FieldbusError::UnknownSlaveConfig(config))?;
        self.master_mut()?
            .configure_slave(addr, expected)
            .map_err(io)
    }
}

impl EthercatMaster for IghMaster {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn request(&mut self, index: u32) -> Result<(), FieldbusError> {
        let master = Master::open(index, MasterAccess::ReadWrite).map_err(|e| {
            debug!("Opening /dev/EtherCAT{} failed: {}", index, e);
            FieldbusError::MasterUnavailable(index)
        })?;
        master.reserve().map_err(|e| {
            debug!("Reserving master {} failed: {}", index, e);
            FieldbusError::MasterUnavailable(index)
        })?;
        self.master = Some(master);
        self.index = index;
        Ok(())
    }

    fn create_domain(&mut self) -> Result<DomainIdx, FieldbusError> {
        self.ensure_configurable()?;
        let domain = usize::from(self.master()?.create_domain().map_err(io)?);
        self.domains.push(domain);
        Ok(domain)
    }

    fn configure_slave(
        &mut self,
        addr: SlaveAddr,
        expected: SlaveId,
    ) -> Result<SlaveConfigIdx, FieldbusError> {
        self.ensure_configurable()?;
        let request = ConfigRequest {
            addr: addr.clone(),
            expected: expected.clone(),
        };
        self.master_mut()?
            .configure_slave(addr, expected)
            .map_err(|e| FieldbusError::SlaveConfig {
                addr: request.addr.clone(),
                reason: e.to_string(),
            })?;
        self.configs.push(request);
        Ok(self.configs.len() - 1)
    }

    fn configure_pdos(
        &mut self,
        config: SlaveConfigIdx,
        syncs: &[SyncConfig],
    ) -> Result<(), FieldbusError> {
        self.ensure_configurable()?;
        let mut sc = self.slave_config(config)?;
        for sync in syncs {
            if sync.pdos.is_empty() {
                sc.config_sync_manager(&sync.sm).map_err(io)?;
            } else {
                sc.config_sm_pdos(sync.sm.clone(), &sync.pdos).map_err(io)?;
            }
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
        let domain_idx = self.domain(domain)?;
        let offset = self
            .slave_config(config)?
            .register_pdo_entry(entry, domain_idx)
            .map_err(io)?;
        if offset.bit != 0 {
            return Err(FieldbusError::Io(format!(
                "PDO entry {} is not byte aligned (bit {})",
                ObjectLabel::from(entry),
                offset.bit
            )));
        }
        Ok(offset.byte)
    }

    fn activate(&mut self) -> Result<(), FieldbusError> {
        self.ensure_configurable()?;
        self.master_mut()?.activate().map_err(io)?;
        self.active = true;
        info!(
            "IgH master {} active: {} slave configs, {} domain(s)",
            self.index,
            self.configs.len(),
            self.domains.len()
        );
        Ok(())
    }

    fn domain_size(&self, domain: DomainIdx) -> Result<usize, FieldbusError> {
        let idx = self.domain(domain)?;
        self.master()?.domain(idx).size().map_err(io)
    }

    fn domain_data(&mut self, domain: DomainIdx) -> Result<&mut [u8], FieldbusError> {
        self.ensure_active()?;
        let idx = self.domain(domain)?;
        self.master_mut()?.domain_data(idx).map_err(io)
    }

    fn receive(&mut self) -> Result<(), FieldbusError> {
        self.ensure_active()?;
        self.master_mut()?.receive().map_err(io)
    }

    fn process_domain(&mut self, domain: DomainIdx) -> Result<(), FieldbusError> {
        self.ensure_active()?;
        let idx = self.domain(domain)?;
        self.master()?.domain(idx).process().map_err(io)
    }

    fn queue_domain(&mut self, domain: DomainIdx) -> Result<(), FieldbusError> {
        self.ensure_active()?;
        let idx = self.domain(domain)?;
        self.master()?.domain(idx).queue().map_err(io)
    }

    fn send(&mut self) -> Result<(), FieldbusError> {
        self.ensure_active()?;
        self.master_mut()?.send().map(|_| ()).map_err(io)
    }

    fn reset(&mut self) -> Result<(), FieldbusError> {
        self.master_mut()?.reset().map_err(io)
    }

    fn state(&self) -> Result<MasterState, FieldbusError> {
        let state = self.master()?.state().map_err(io)?;
        Ok(MasterState {
            slaves_responding: state.slaves_responding,
            al_states: state.al_states,
            link_up: state.link_up,
        })
    }

    fn domain_state(&self, domain: DomainIdx) -> Result<DomainState, FieldbusError> {
        let idx = self.domain(domain)?;
        let state = self.master()?.domain(idx).state().map_err(io)?;
        Ok(DomainState {
            working_counter: state.working_counter,
            wc_state: match state.wc_state {
                ethercat::WcState::Zero => WcState::Zero,
                ethercat::WcState::Incomplete => WcState::Incomplete,
                ethercat::WcState::Complete => WcState::Complete,
            },
        })
    }

    fn slave_config_state(
        &mut self,
        config: SlaveConfigIdx,
    ) -> Result<SlaveConfigState, FieldbusError> {
        let state = self.slave_config(config)?.state().map_err(io)?;
        Ok(SlaveConfigState {
            online: state.online,
            operational: state.operational,
            al_state: state.al_state,
        })
    }

    fn sdo_download(
        &mut self,
        position: SlavePos,
        sdo: SdoIdx,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<(), FieldbusError> {
        let word = SdoWord::from_le(data).ok_or(FieldbusError::SdoSize {
            sdo,
            expected: 4,
            actual: data.len(),
        })?;
        let master = self.master_mut()?;
        match word {
            SdoWord::U8(v) => master.sdo_download(position, sdo, false, &v),
            SdoWord::U16(v) => master.sdo_download(position, sdo, false, &v),
            SdoWord::U32(v) => master.sdo_download(position, sdo, false, &v),
        }
        .map_err(|e| sdo_failed(position, sdo, e))
    }

    fn sdo_upload(
        &mut self,
        position: SlavePos,
        sdo: SdoIdx,
        target: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, FieldbusError> {
        self.master()?
            .sdo_upload(position, sdo, false, target)
            .map(|data| data.len())
            .map_err(|e| sdo_failed(position, sdo, e))
    }

    fn release(&mut self) {
        if let Some(mut master) = self.master.take() {
            if self.active {
                if let Err(e) = master.deactivate() {
                    warn!("Deactivating master {} failed: {}", self.index, e);
                }
            }
            info!("IgH master {} released", self.index);
        }
        self.active = false;
        self.domains.clear();
        self.configs.clear();
    }
}

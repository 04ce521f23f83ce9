mod gate;
mod orchestrator;
mod request;

pub use gate::*;
pub use request::*;

use crate::cyclic_task::tasks::{
    AlStateTransfer, BusHooks, CoeHandler, NoCoe, NoPdoConfig, PdoConfigurator, SiiTask,
    SlaveConfigurator, SlaveScanner,
};
use crate::cyclic_task::{
    Datagram, DatagramState, EtherCatSystemTime, Transport, TransportError, FSM_RETRIES,
};
use crate::frame::MAX_PDU_DATAGRAM;
use crate::slave_network::{AlState, Slave, SlaveConfig, SlaveStates};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::time::Duration;
use log::*;
use orchestrator::MasterState;

/// Number of words addressable in the SII.
const SII_WORDS: usize = 0x1_0000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterConfig {
    /// Read the object dictionary of CoE slaves that offer SDO information.
    pub fetch_sdo_dictionary: bool,
    /// Time a slave has to spend in PREOP before its dictionary is read.
    pub sdo_dictionary_delay: Duration,
    /// Resends of a timed-out datagram issued by the master itself.
    pub retries: u8,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            fetch_sdo_dictionary: true,
            sdo_dictionary_delay: Duration::from_secs(3),
            retries: FSM_RETRIES,
        }
    }
}

/// Keeps an EtherCat segment scanned and every slave in its requested state.
///
/// The master owns a single datagram. Each call to [`exec`](Self::exec) advances
/// the orchestration by at most one round trip of that datagram; the caller moves
/// it over a [`Transport`] in between, or lets [`cycle`](Self::cycle) do both.
///
/// CoE access, PDO configuration and the hooks run after a bus scan are
/// supplied by the application through `C`, `P` and `H`.
#[derive(Debug)]
pub struct EtherCatMaster<C = NoCoe, P = NoPdoConfig, H = ()>
where
    C: CoeHandler,
    P: PdoConfigurator,
    H: BusHooks,
{
    config: MasterConfig,
    gates: Arc<MasterGates>,
    datagram: Datagram,
    now: EtherCatSystemTime,

    slaves: Vec<Slave>,
    configs: BTreeMap<u16, SlaveConfig>,

    state: MasterState,
    slave_index: usize,
    retries: u8,
    scanner: SlaveScanner,
    configurator: SlaveConfigurator,
    transfer: AlStateTransfer,
    sii: SiiTask,
    sii_word_index: usize,

    coe: C,
    pdo: P,
    hooks: H,

    sdo_requests: RequestQueue<SdoRequest>,
    sii_requests: RequestQueue<SiiWriteRequest>,
    register_requests: RequestQueue<RegisterRequest>,

    slaves_responding: u16,
    slave_states: SlaveStates,
    topology_change_pending: bool,
    scan_state: RequestState,
    scan_error: bool,
    scan_started: EtherCatSystemTime,
    config_state: RequestState,
    config_error: bool,
}

impl EtherCatMaster {
    /// A master without mailbox support.
    pub fn new(config: MasterConfig) -> Self {
        Self::with_handlers(config, NoCoe, NoPdoConfig, ())
    }
}

impl<C, P, H> EtherCatMaster<C, P, H>
where
    C: CoeHandler,
    P: PdoConfigurator,
    H: BusHooks,
{
    pub fn with_handlers(config: MasterConfig, coe: C, pdo: P, hooks: H) -> Self {
        let retries = config.retries;
        Self {
            config,
            gates: Arc::new(MasterGates::new()),
            datagram: Datagram::new(),
            now: EtherCatSystemTime(0),
            slaves: Vec::new(),
            configs: BTreeMap::new(),
            state: MasterState::Start,
            slave_index: 0,
            retries,
            scanner: SlaveScanner::new(),
            configurator: SlaveConfigurator::new(),
            transfer: AlStateTransfer::new(),
            sii: SiiTask::new(),
            sii_word_index: 0,
            coe,
            pdo,
            hooks,
            sdo_requests: RequestQueue::new(),
            sii_requests: RequestQueue::new(),
            register_requests: RequestQueue::new(),
            slaves_responding: 0,
            slave_states: SlaveStates(0),
            topology_change_pending: false,
            scan_state: RequestState::Queued,
            scan_error: false,
            scan_started: EtherCatSystemTime(0),
            config_state: RequestState::Queued,
            config_error: false,
        }
    }

    /// Advances the orchestration once the datagram has settled.
    ///
    /// Afterwards the datagram is either still pending, freshly prepared
    /// (`Init`) and waiting to be queued, or settled because there was nothing
    /// to send this tick.
    pub fn exec(&mut self, sys_time: EtherCatSystemTime) {
        if self.datagram.is_pending() {
            return;
        }
        self.now = sys_time;
        self.step();
    }

    /// One tick against a transport: collect the reply, advance, send.
    pub fn cycle<T: Transport>(
        &mut self,
        transport: &mut T,
        sys_time: EtherCatSystemTime,
    ) -> Result<(), TransportError> {
        transport.poll(&mut self.datagram, sys_time);
        self.exec(sys_time);
        self.datagram.queue();
        if self.datagram.state() == DatagramState::Queued {
            transport.send(&mut self.datagram, sys_time)?;
        }
        Ok(())
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    /// Gates an outside context uses to hold off scanning and configuration.
    pub fn gates(&self) -> Arc<MasterGates> {
        Arc::clone(&self.gates)
    }

    pub fn datagram(&self) -> &Datagram {
        &self.datagram
    }

    /// For drivers that move the datagram themselves instead of using `cycle`.
    pub fn datagram_mut(&mut self) -> &mut Datagram {
        &mut self.datagram
    }

    pub fn slaves(&self) -> &[Slave] {
        &self.slaves
    }

    pub fn slave(&self, position: u16) -> Option<&Slave> {
        self.slaves.get(position as usize)
    }

    pub fn slaves_responding(&self) -> u16 {
        self.slaves_responding
    }

    /// AL states seen by the last broadcast read, or-ed over all slaves.
    pub fn slave_states(&self) -> SlaveStates {
        self.slave_states
    }

    pub fn topology_change_pending(&self) -> bool {
        self.topology_change_pending
    }

    /// `Queued` until the first scan, `Busy` while scanning.
    pub fn scan_state(&self) -> RequestState {
        self.scan_state
    }

    /// Result of the last pass that configured at least one slave.
    pub fn config_state(&self) -> RequestState {
        self.config_state
    }

    pub fn coe(&self) -> &C {
        &self.coe
    }

    pub fn coe_mut(&mut self) -> &mut C {
        &mut self.coe
    }

    pub fn pdo(&self) -> &P {
        &self.pdo
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    /// Binds a configuration to a ring position. It survives rescans and is
    /// applied to whatever slave is found at that position.
    pub fn attach_config(&mut self, position: u16, config: SlaveConfig) {
        if let Some(slave) = self.slaves.get_mut(position as usize) {
            slave.config = Some(config.clone());
        }
        self.configs.insert(position, config);
    }

    pub fn detach_config(&mut self, position: u16) -> Option<SlaveConfig> {
        if let Some(slave) = self.slaves.get_mut(position as usize) {
            slave.config = None;
        }
        self.configs.remove(&position)
    }

    pub fn request_state(&mut self, position: u16, state: AlState) -> Result<(), RequestError> {
        if state == AlState::InvalidOrMixed {
            return Err(RequestError::InvalidState);
        }
        let slave = self.slave_mut(position)?;
        if slave.requested_state != state {
            debug!("Slave {}: requested state {}.", position, state);
        }
        slave.requested_state = state;
        Ok(())
    }

    /// Reconfigure a slave even if it is already in its requested state.
    pub fn set_force_config(&mut self, position: u16) -> Result<(), RequestError> {
        self.slave_mut(position)?.force_config = true;
        Ok(())
    }

    /// Lets the master touch a slave again after a failure.
    pub fn clear_error(&mut self, position: u16) -> Result<(), RequestError> {
        self.slave_mut(position)?.error_flag = false;
        Ok(())
    }

    fn slave_mut(&mut self, position: u16) -> Result<&mut Slave, RequestError> {
        self.slaves
            .get_mut(position as usize)
            .ok_or(RequestError::UnknownSlave(position))
    }

    pub fn sdo_upload(&mut self, slave: u16, index: u16, subindex: u8) -> RequestId {
        self.sdo_requests.push(SdoRequest {
            slave,
            index,
            subindex,
            direction: SdoDirection::Upload,
            data: Vec::new(),
        })
    }

    pub fn sdo_download(&mut self, slave: u16, index: u16, subindex: u8, data: &[u8]) -> RequestId {
        self.sdo_requests.push(SdoRequest {
            slave,
            index,
            subindex,
            direction: SdoDirection::Download,
            data: data.to_vec(),
        })
    }

    pub fn sdo_state(&self, id: RequestId) -> Option<RequestState> {
        self.sdo_requests.state(id)
    }

    /// Hands a finished SDO request back, with the uploaded data in `body.data`.
    pub fn take_sdo(&mut self, id: RequestId) -> Option<Request<SdoRequest>> {
        self.sdo_requests.take(id)
    }

    pub fn write_sii(
        &mut self,
        slave: u16,
        word_offset: u16,
        words: &[u16],
    ) -> Result<RequestId, RequestError> {
        let available = SII_WORDS - word_offset as usize;
        if words.len() > available {
            return Err(RequestError::TooLarge {
                size: words.len() * 2,
                max: available * 2,
            });
        }
        Ok(self.sii_requests.push(SiiWriteRequest {
            slave,
            word_offset,
            words: words.to_vec(),
        }))
    }

    pub fn sii_write_state(&self, id: RequestId) -> Option<RequestState> {
        self.sii_requests.state(id)
    }

    pub fn take_sii_write(&mut self, id: RequestId) -> Option<Request<SiiWriteRequest>> {
        self.sii_requests.take(id)
    }

    pub fn read_register(
        &mut self,
        slave: u16,
        address: u16,
        size: usize,
    ) -> Result<RequestId, RequestError> {
        check_register_size(size)?;
        Ok(self.register_requests.push(RegisterRequest {
            slave,
            address,
            direction: RegisterDirection::Read,
            data: vec![0; size],
        }))
    }

    pub fn write_register(
        &mut self,
        slave: u16,
        address: u16,
        data: &[u8],
    ) -> Result<RequestId, RequestError> {
        check_register_size(data.len())?;
        Ok(self.register_requests.push(RegisterRequest {
            slave,
            address,
            direction: RegisterDirection::Write,
            data: data.to_vec(),
        }))
    }

    pub fn register_state(&self, id: RequestId) -> Option<RequestState> {
        self.register_requests.state(id)
    }

    /// Hands a finished register request back, with read data in `body.data`.
    pub fn take_register(&mut self, id: RequestId) -> Option<Request<RegisterRequest>> {
        self.register_requests.take(id)
    }
}

fn check_register_size(size: usize) -> Result<(), RequestError> {
    if size > MAX_PDU_DATAGRAM {
        Err(RequestError::TooLarge {
            size,
            max: MAX_PDU_DATAGRAM,
        })
    } else {
        Ok(())
    }
}

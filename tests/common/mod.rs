#![allow(dead_code)]

use ethercat_master_fsm::cyclic_task::tasks::{BusHooks, CoeHandler, PdoConfigurator};
use ethercat_master_fsm::cyclic_task::{
    Datagram, DatagramAddress, DatagramState, EtherCatSystemTime, Transport, TransportError,
};
use ethercat_master_fsm::frame::CommandType;
use ethercat_master_fsm::slave_network::{MailboxProtocols, Slave};
use ethercat_master_fsm::EtherCatMaster;

const MEMORY_SIZE: usize = 0x1000;
const STATION_ADDRESS: usize = 0x0010;
const AL_CONTROL: usize = 0x0120;
const AL_STATUS: usize = 0x0130;
const AL_STATUS_CODE: usize = 0x0134;
const SII_ACCESS: usize = 0x0502;

pub const OUTPUT_CONTROL: u16 = 0x0064;
pub const INPUT_CONTROL: u16 = 0x0020;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Builds an SII image the way a slave ships it: header words, a General
/// category and, if there are any, a SyncM category.
pub fn sii_image(
    vendor_id: u32,
    product_code: u32,
    protocols: u16,
    coe_details: u8,
    syncs: &[[u16; 4]],
) -> Vec<u16> {
    let mut image = vec![0u16; 0x40];
    image[0x08] = vendor_id as u16;
    image[0x09] = (vendor_id >> 16) as u16;
    image[0x0A] = product_code as u16;
    image[0x0B] = (product_code >> 16) as u16;
    if protocols != 0 {
        image[0x14..0x18].copy_from_slice(&[0x1000, 0x0080, 0x1080, 0x0080]);
        image[0x18..0x1C].copy_from_slice(&[0x1000, 0x0080, 0x1080, 0x0080]);
        image[0x1C] = protocols;
    }

    image.extend_from_slice(&[0x001E, 16]);
    let mut general = [0u16; 16];
    general[2] = (coe_details as u16) << 8;
    image.extend_from_slice(&general);

    if !syncs.is_empty() {
        image.extend_from_slice(&[0x0029, 4 * syncs.len() as u16]);
        for sync in syncs {
            image.extend_from_slice(sync);
        }
    }
    image.push(0xFFFF);
    image
}

/// One slave's memory and the bits of AL and SII behaviour the master relies on.
#[derive(Debug, Clone)]
pub struct SimSlave {
    pub memory: Vec<u8>,
    pub sii: Vec<u16>,
    /// A state this slave refuses to enter, and the AL status code it reports then.
    pub refuse: Option<(u8, u16)>,
    /// Number of AL status reads before a requested state shows up.
    pub transition_delay: u32,
    /// Ignores every write to AL control, acknowledges included.
    pub stuck: bool,
    pub sii_write_protected: bool,
    /// Everything written to AL control, in order.
    pub control_writes: Vec<u8>,
    pending: Option<(u8, u32)>,
}

impl SimSlave {
    pub fn new(sii: Vec<u16>, fmmus: u8, syncs: u8) -> Self {
        let mut memory = vec![0u8; MEMORY_SIZE];
        memory[0x0000] = 0x11;
        memory[0x0004] = fmmus;
        memory[0x0005] = syncs;
        // port 0 link up with signal
        memory[0x0110] = 0x10;
        memory[0x0111] = 0x02;
        memory[AL_STATUS] = 0x01;
        Self {
            memory,
            sii,
            refuse: None,
            transition_delay: 0,
            stuck: false,
            sii_write_protected: false,
            control_writes: Vec::new(),
            pending: None,
        }
    }

    /// Simple I/O terminal: no mailbox, one output and one input sync manager.
    pub fn io() -> Self {
        let syncs = [
            [0x1000, 0x0001, OUTPUT_CONTROL, 0x0001],
            [0x1100, 0x0001, INPUT_CONTROL, 0x0001],
        ];
        Self::new(sii_image(0x0002, 0x0C4E_3052, 0, 0, &syncs), 2, 2)
    }

    /// CoE device with SDO information and two process data sync managers.
    pub fn coe() -> Self {
        let syncs = [
            [0x1000, 0x0080, 0x0026, 0x0001],
            [0x1080, 0x0080, 0x0022, 0x0001],
            [0x1100, 0x0000, OUTPUT_CONTROL, 0x0001],
            [0x1200, 0x0000, INPUT_CONTROL, 0x0001],
        ];
        let image = sii_image(0x0002, 0x1B77_3052, MailboxProtocols::COE, 0x03, &syncs);
        Self::new(image, 3, 4)
    }

    pub fn with_protocols(protocols: u16) -> Self {
        let syncs = [
            [0x1000, 0x0080, 0x0026, 0x0001],
            [0x1080, 0x0080, 0x0022, 0x0001],
        ];
        Self::new(sii_image(0x0002, 0x0000_0001, protocols, 0, &syncs), 2, 2)
    }

    pub fn station_address(&self) -> u16 {
        u16::from_le_bytes([self.memory[STATION_ADDRESS], self.memory[STATION_ADDRESS + 1]])
    }

    pub fn al_status(&self) -> u8 {
        self.memory[AL_STATUS]
    }

    pub fn set_al_status(&mut self, status: u8, code: u16) {
        self.memory[AL_STATUS] = status;
        self.memory[AL_STATUS_CODE..AL_STATUS_CODE + 2].copy_from_slice(&code.to_le_bytes());
    }

    pub fn read_u16(&self, address: usize) -> u16 {
        u16::from_le_bytes([self.memory[address], self.memory[address + 1]])
    }

    pub fn read_u32(&self, address: usize) -> u32 {
        u32::from_le_bytes([
            self.memory[address],
            self.memory[address + 1],
            self.memory[address + 2],
            self.memory[address + 3],
        ])
    }

    fn access(&mut self, command: CommandType, offset: u16, data: &mut [u8]) {
        let start = offset as usize;
        let end = (start + data.len()).min(MEMORY_SIZE);
        if start >= end {
            return;
        }
        match command {
            CommandType::APRD | CommandType::FPRD => {
                self.before_read(start);
                data[..end - start].copy_from_slice(&self.memory[start..end]);
            }
            CommandType::BRD => {
                self.before_read(start);
                for (out, byte) in data.iter_mut().zip(&self.memory[start..end]) {
                    *out |= *byte;
                }
            }
            CommandType::APWR | CommandType::FPWR | CommandType::BWR => {
                self.memory[start..end].copy_from_slice(&data[..end - start]);
                self.after_write(start, &data[..end - start]);
            }
            _ => {}
        }
    }

    fn before_read(&mut self, start: usize) {
        if start != AL_STATUS {
            return;
        }
        match self.pending {
            Some((state, 0)) => {
                self.set_al_status(state, 0);
                self.pending = None;
            }
            Some((state, reads)) => self.pending = Some((state, reads - 1)),
            None => {}
        }
    }

    fn after_write(&mut self, start: usize, data: &[u8]) {
        match start {
            AL_CONTROL => self.on_al_control(data[0]),
            SII_ACCESS => self.on_sii_access(data),
            _ => {}
        }
    }

    fn on_al_control(&mut self, control: u8) {
        self.control_writes.push(control);
        if self.stuck {
            return;
        }
        let state = control & 0x0F;
        if control & 0x10 != 0 {
            self.pending = None;
            self.set_al_status(state, 0);
            return;
        }
        if let Some((refused, code)) = self.refuse {
            if refused == state {
                let current = self.al_status() & 0x0F;
                self.set_al_status(current | 0x10, code);
                return;
            }
        }
        if self.transition_delay == 0 {
            self.set_al_status(state, 0);
        } else {
            self.pending = Some((state, self.transition_delay));
        }
    }

    fn on_sii_access(&mut self, data: &[u8]) {
        let control = data.get(1).copied().unwrap_or(0);
        if data.len() >= 4 && control & 0x01 != 0 {
            let address = u16::from_le_bytes([data[2], data[3]]) as usize;
            let first = self.sii.get(address).copied().unwrap_or(0);
            let second = self.sii.get(address + 1).copied().unwrap_or(0);
            self.memory[SII_ACCESS + 6..SII_ACCESS + 8].copy_from_slice(&first.to_le_bytes());
            self.memory[SII_ACCESS + 8..SII_ACCESS + 10].copy_from_slice(&second.to_le_bytes());
            self.memory[SII_ACCESS + 1] = 0x00;
        } else if data.len() >= 8 && control & 0x02 != 0 {
            let address = u32::from_le_bytes([data[2], data[3], data[4], data[5]]) as usize;
            let word = u16::from_le_bytes([data[6], data[7]]);
            if self.sii_write_protected {
                self.memory[SII_ACCESS + 1] = 0x40;
                return;
            }
            if self.sii.len() <= address {
                self.sii.resize(address + 1, 0);
            }
            self.sii[address] = word;
            self.memory[SII_ACCESS + 1] = 0x00;
        }
    }
}

#[derive(Debug, Clone)]
pub struct Record {
    pub at_ms: u64,
    pub command: CommandType,
    pub address: DatagramAddress,
    /// Payload as sent.
    pub data: Vec<u8>,
    pub working_counter: u16,
}

impl Record {
    pub fn is_write_to(&self, offset: u16) -> bool {
        matches!(
            self.command,
            CommandType::APWR | CommandType::FPWR | CommandType::BWR
        ) && self.address.offset() == Some(offset)
    }

    pub fn is_read_of(&self, offset: u16) -> bool {
        matches!(
            self.command,
            CommandType::APRD | CommandType::FPRD | CommandType::BRD
        ) && self.address.offset() == Some(offset)
    }
}

/// A ring of simulated slaves answering every datagram on the next poll.
#[derive(Debug, Default)]
pub struct SimulatedBus {
    pub slaves: Vec<SimSlave>,
    pub link_down: bool,
    /// Number of upcoming datagrams that get lost.
    pub lose: usize,
    pub log: Vec<Record>,
    index: u8,
}

impl SimulatedBus {
    pub fn new(slaves: Vec<SimSlave>) -> Self {
        Self {
            slaves,
            ..Self::default()
        }
    }

    pub fn writes_to(&self, offset: u16) -> impl Iterator<Item = &Record> {
        self.log.iter().filter(move |record| record.is_write_to(offset))
    }

    fn process(&mut self, command: CommandType, address: DatagramAddress, data: &mut [u8]) -> u16 {
        let mut working_counter = 0;
        match address {
            DatagramAddress::Position { position, offset } => {
                if let Some(slave) = self.slaves.get_mut(position as usize) {
                    slave.access(command, offset, data);
                    working_counter += 1;
                }
            }
            DatagramAddress::Station {
                station_address,
                offset,
            } => {
                for slave in self
                    .slaves
                    .iter_mut()
                    .filter(|slave| slave.station_address() == station_address)
                {
                    slave.access(command, offset, data);
                    working_counter += 1;
                }
            }
            DatagramAddress::Broadcast { offset } => {
                for slave in self.slaves.iter_mut() {
                    slave.access(command, offset, data);
                    working_counter += 1;
                }
            }
            DatagramAddress::Logical(_) => {}
        }
        working_counter
    }
}

impl Transport for SimulatedBus {
    fn send(
        &mut self,
        datagram: &mut Datagram,
        sys_time: EtherCatSystemTime,
    ) -> Result<(), TransportError> {
        if self.link_down {
            datagram.link_down();
            return Err(TransportError::LinkDown);
        }
        self.index = self.index.wrapping_add(1);
        datagram.mark_sent(self.index, sys_time);
        Ok(())
    }

    fn poll(&mut self, datagram: &mut Datagram, sys_time: EtherCatSystemTime) {
        if datagram.state() != DatagramState::Sent {
            return;
        }
        if self.link_down {
            datagram.link_down();
            return;
        }
        if self.lose > 0 {
            self.lose -= 1;
            datagram.time_out(sys_time);
            return;
        }
        let sent = datagram.data().to_vec();
        let mut reply = sent.clone();
        let working_counter = self.process(datagram.command(), datagram.address(), &mut reply);
        self.log.push(Record {
            at_ms: sys_time.0 / 1_000_000,
            command: datagram.command(),
            address: datagram.address(),
            data: sent,
            working_counter,
        });
        datagram
            .receive(
                datagram.command(),
                datagram.index(),
                &reply,
                working_counter,
                sys_time,
            )
            .unwrap();
    }
}

/// Wall clock of a test in milliseconds, one tick per millisecond.
#[derive(Debug, Default)]
pub struct Clock(pub u64);

impl Clock {
    pub fn tick<C, P, H>(&mut self, master: &mut EtherCatMaster<C, P, H>, bus: &mut SimulatedBus)
    where
        C: CoeHandler,
        P: PdoConfigurator,
        H: BusHooks,
    {
        self.0 += 1;
        let _ = master.cycle(bus, EtherCatSystemTime::from_millis(self.0));
    }

    pub fn run<C, P, H>(&mut self, master: &mut EtherCatMaster<C, P, H>, bus: &mut SimulatedBus, ticks: u64)
    where
        C: CoeHandler,
        P: PdoConfigurator,
        H: BusHooks,
    {
        for _ in 0..ticks {
            self.tick(master, bus);
        }
    }

    /// Ticks until `done` holds. Returns `false` if it never did within `max_ticks`.
    pub fn run_until<C, P, H, F>(
        &mut self,
        master: &mut EtherCatMaster<C, P, H>,
        bus: &mut SimulatedBus,
        max_ticks: u64,
        mut done: F,
    ) -> bool
    where
        C: CoeHandler,
        P: PdoConfigurator,
        H: BusHooks,
        F: FnMut(&EtherCatMaster<C, P, H>, &SimulatedBus) -> bool,
    {
        for _ in 0..max_ticks {
            self.tick(master, bus);
            if done(master, bus) {
                return true;
            }
        }
        false
    }
}

/// All slaves found and in the state they were asked for.
pub fn settled<C, P, H>(master: &EtherCatMaster<C, P, H>, count: usize) -> bool
where
    C: CoeHandler,
    P: PdoConfigurator,
    H: BusHooks,
{
    master.slaves().len() == count
        && master
            .slaves()
            .iter()
            .all(|slave| slave.current_state().0 == slave.requested_state().code())
}

/// A CoE stand-in: every request takes one mailbox status read, uploads
/// answer with `upload_value`.
#[derive(Debug, Default)]
pub struct ScriptedCoe {
    pub calls: Vec<CoeCall>,
    pub upload_value: Vec<u8>,
    pub fail: bool,
    pub running: bool,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoeCall {
    Download { slave: u16, index: u16, subindex: u8, data: Vec<u8> },
    Upload { slave: u16, index: u16, subindex: u8 },
    Dictionary { slave: u16 },
}

impl ScriptedCoe {
    fn begin(&mut self, call: CoeCall) {
        self.calls.push(call);
        self.running = false;
        self.success = false;
    }
}

impl CoeHandler for ScriptedCoe {
    fn start_download(&mut self, slave: &Slave, index: u16, subindex: u8, data: &[u8]) {
        self.begin(CoeCall::Download {
            slave: slave.ring_position(),
            index,
            subindex,
            data: data.to_vec(),
        });
    }

    fn start_upload(&mut self, slave: &Slave, index: u16, subindex: u8) {
        self.begin(CoeCall::Upload {
            slave: slave.ring_position(),
            index,
            subindex,
        });
    }

    fn start_dictionary(&mut self, slave: &Slave) {
        self.begin(CoeCall::Dictionary {
            slave: slave.ring_position(),
        });
    }

    fn exec(&mut self, slave: &mut Slave, datagram: &mut Datagram) -> bool {
        if !self.running {
            // sync manager 1 status: mailbox full?
            datagram.fprd(slave.station_address(), 0x080D, 1);
            self.running = true;
            return true;
        }
        self.running = false;
        self.success = !self.fail
            && datagram.state() == DatagramState::Received
            && datagram.working_counter() == 1;
        false
    }

    fn success(&self) -> bool {
        self.success
    }

    fn upload_data(&self) -> &[u8] {
        &self.upload_value
    }
}

/// Remembers what the master told the EoE and DC layers.
#[derive(Debug, Default)]
pub struct RecordingHooks {
    pub attached: Vec<u16>,
    pub detach_all: usize,
    pub dc_topologies: Vec<usize>,
}

impl BusHooks for RecordingHooks {
    fn eoe_attach(&mut self, slave: &Slave) {
        self.attached.push(slave.ring_position());
    }

    fn eoe_detach_all(&mut self) {
        self.detach_all += 1;
        self.attached.clear();
    }

    fn compute_dc_topology(&mut self, slaves: &[Slave]) {
        self.dc_topologies.push(slaves.len());
    }
}

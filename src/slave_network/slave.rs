use super::SlaveConfig;
use crate::cyclic_task::EtherCatSystemTime;
use crate::register::SyncManagerRegister;
use alloc::vec::Vec;
use core::fmt;

pub const MAX_FMMUS: usize = 16;
pub const MAX_SYNC_MANAGERS: usize = 16;
pub const FMMU_PAGE_SIZE: usize = 16;
pub const SYNC_PAGE_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, PartialOrd, Eq, Ord, Hash, Copy)]
pub enum AlState {
    Init = 0x1,
    PreOperational = 0x2,
    Bootstrap = 0x3,
    SafeOperational = 0x4,
    Operational = 0x8,
    InvalidOrMixed,
}

impl AlState {
    /// The 4-bit code written to AL control.
    pub fn code(self) -> u8 {
        match self {
            AlState::InvalidOrMixed => 0,
            state => state as u8,
        }
    }
}

impl From<u8> for AlState {
    fn from(v: u8) -> Self {
        if v == AlState::Init as u8 {
            AlState::Init
        } else if v == AlState::PreOperational as u8 {
            AlState::PreOperational
        } else if v == AlState::Bootstrap as u8 {
            AlState::Bootstrap
        } else if v == AlState::SafeOperational as u8 {
            AlState::SafeOperational
        } else if v == AlState::Operational as u8 {
            AlState::Operational
        } else {
            AlState::InvalidOrMixed
        }
    }
}

impl Default for AlState {
    fn default() -> Self {
        AlState::InvalidOrMixed
    }
}

impl fmt::Display for AlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&SlaveState(self.code()), f)
    }
}

/// AL status byte of one slave: the state nibble plus the error/acknowledge bit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlaveState(pub u8);

impl SlaveState {
    pub const ACK_ERR: u8 = 0x10;
    pub const UNKNOWN: Self = Self(0);

    pub fn state_code(self) -> u8 {
        self.0 & 0x0F
    }

    pub fn state(self) -> AlState {
        AlState::from(self.state_code())
    }

    pub fn ack_err(self) -> bool {
        self.0 & Self::ACK_ERR != 0
    }
}

impl From<AlState> for SlaveState {
    fn from(state: AlState) -> Self {
        Self(state.code())
    }
}

impl fmt::Display for SlaveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.state_code() == AlState::Bootstrap as u8 {
            write!(f, "BOOT")?;
            if self.ack_err() {
                write!(f, " + ERROR")?;
            }
            Ok(())
        } else {
            fmt::Display::fmt(&SlaveStates(self.0), f)
        }
    }
}

/// OR-ed AL status bytes of several slaves, as a broadcast read returns them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlaveStates(pub u8);

impl fmt::Display for SlaveStates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "(unknown)");
        }
        let mut first = true;
        for (bit, name) in [
            (AlState::Init, "INIT"),
            (AlState::PreOperational, "PREOP"),
            (AlState::SafeOperational, "SAFEOP"),
            (AlState::Operational, "OP"),
        ] {
            if self.0 & bit as u8 != 0 {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        if self.0 & SlaveState::ACK_ERR != 0 {
            if !first {
                write!(f, " + ")?;
            }
            write!(f, "ERROR")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxProtocols(pub u16);

impl MailboxProtocols {
    pub const AOE: u16 = 0x01;
    pub const EOE: u16 = 0x02;
    pub const COE: u16 = 0x04;
    pub const FOE: u16 = 0x08;
    pub const SOE: u16 = 0x10;
    pub const VOE: u16 = 0x20;

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, protocol: u16) -> bool {
        self.0 & protocol != 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlaveIdentity {
    pub alias: u16,
    pub vendor_id: u32,
    pub product_code: u32,
    pub revision_number: u32,
    pub serial_number: u32,
}

/// A sync manager as the SII describes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncManagerInfo {
    pub physical_start_address: u16,
    pub default_length: u16,
    pub control: u8,
    pub enable: u8,
}

impl SyncManagerInfo {
    pub const MAILBOX_RX_CONTROL: u8 = 0x26;
    pub const MAILBOX_TX_CONTROL: u8 = 0x22;

    pub(crate) fn mailbox(physical_start_address: u16, length: u16, control: u8) -> Self {
        Self {
            physical_start_address,
            default_length: length,
            control,
            enable: 1,
        }
    }

    /// Master to slave direction.
    pub fn is_output(&self) -> bool {
        self.control & 0x04 != 0
    }

    /// Fills one sync manager page. The channel stays disabled for a zero size.
    pub fn write_page(&self, size: u16, page: &mut [u8]) {
        let mut sm = SyncManagerRegister(page);
        sm.set_physical_start_address(self.physical_start_address);
        sm.set_length(size);
        sm.set_control(self.control);
        sm.set_channel_enable(self.enable & 0x01 != 0 && size > 0);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiiInfo {
    pub boot_rx_mailbox_offset: u16,
    pub boot_rx_mailbox_size: u16,
    pub boot_tx_mailbox_offset: u16,
    pub boot_tx_mailbox_size: u16,
    pub std_rx_mailbox_offset: u16,
    pub std_rx_mailbox_size: u16,
    pub std_tx_mailbox_offset: u16,
    pub std_tx_mailbox_size: u16,
    pub mailbox_protocols: MailboxProtocols,
    pub coe_details: u8,
    pub syncs: heapless::Vec<SyncManagerInfo, MAX_SYNC_MANAGERS>,
}

impl SiiInfo {
    pub const COE_ENABLE_SDO_INFO: u8 = 0x02;

    pub fn enable_sdo_info(&self) -> bool {
        self.coe_details & Self::COE_ENABLE_SDO_INFO != 0
    }

    pub fn sync(&self, index: usize) -> Option<&SyncManagerInfo> {
        self.syncs.get(index)
    }

    pub(crate) fn boot_mailbox(&self) -> [SyncManagerInfo; 2] {
        [
            SyncManagerInfo::mailbox(
                self.boot_rx_mailbox_offset,
                self.boot_rx_mailbox_size,
                SyncManagerInfo::MAILBOX_RX_CONTROL,
            ),
            SyncManagerInfo::mailbox(
                self.boot_tx_mailbox_offset,
                self.boot_tx_mailbox_size,
                SyncManagerInfo::MAILBOX_TX_CONTROL,
            ),
        ]
    }

    pub(crate) fn std_mailbox(&self) -> [SyncManagerInfo; 2] {
        [
            SyncManagerInfo::mailbox(
                self.std_rx_mailbox_offset,
                self.std_rx_mailbox_size,
                SyncManagerInfo::MAILBOX_RX_CONTROL,
            ),
            SyncManagerInfo::mailbox(
                self.std_tx_mailbox_offset,
                self.std_tx_mailbox_size,
                SyncManagerInfo::MAILBOX_TX_CONTROL,
            ),
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStatus {
    pub link_up: bool,
    pub loop_closed: bool,
    pub signal_detected: bool,
}

#[derive(Debug, Clone)]
pub struct Slave {
    pub(crate) ring_position: u16,
    pub(crate) station_address: u16,
    pub(crate) identity: SlaveIdentity,

    pub(crate) current_state: SlaveState,
    pub(crate) requested_state: AlState,
    pub(crate) error_flag: bool,
    pub(crate) force_config: bool,
    pub(crate) online: bool,

    pub(crate) config: Option<SlaveConfig>,

    pub(crate) sii: SiiInfo,
    pub(crate) sii_image: Vec<u16>,
    pub(crate) base_fmmu_count: u8,
    pub(crate) base_sync_count: u8,
    pub(crate) ports: [PortStatus; 4],

    pub(crate) preop_time: Option<EtherCatSystemTime>,
    pub(crate) sdo_dictionary_fetched: bool,
}

impl Slave {
    /// A freshly found slave, to be brought to PREOP.
    pub fn new(ring_position: u16, station_address: u16) -> Self {
        Self {
            ring_position,
            station_address,
            identity: SlaveIdentity::default(),
            current_state: SlaveState::UNKNOWN,
            requested_state: AlState::PreOperational,
            error_flag: false,
            force_config: false,
            online: true,
            config: None,
            sii: SiiInfo::default(),
            sii_image: Vec::new(),
            base_fmmu_count: 0,
            base_sync_count: 0,
            ports: [PortStatus::default(); 4],
            preop_time: None,
            sdo_dictionary_fetched: false,
        }
    }

    pub fn ring_position(&self) -> u16 {
        self.ring_position
    }

    pub fn station_address(&self) -> u16 {
        self.station_address
    }

    pub fn identity(&self) -> &SlaveIdentity {
        &self.identity
    }

    pub fn current_state(&self) -> SlaveState {
        self.current_state
    }

    pub fn al_state(&self) -> AlState {
        self.current_state.state()
    }

    pub fn requested_state(&self) -> AlState {
        self.requested_state
    }

    pub fn error_flag(&self) -> bool {
        self.error_flag
    }

    pub fn force_config(&self) -> bool {
        self.force_config
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn config(&self) -> Option<&SlaveConfig> {
        self.config.as_ref()
    }

    pub fn sii(&self) -> &SiiInfo {
        &self.sii
    }

    /// The SII contents as read during the scan, word by word.
    pub fn sii_image(&self) -> &[u16] {
        &self.sii_image
    }

    pub fn base_fmmu_count(&self) -> u8 {
        self.base_fmmu_count
    }

    pub fn base_sync_count(&self) -> u8 {
        self.base_sync_count
    }

    pub fn ports(&self) -> &[PortStatus; 4] {
        &self.ports
    }

    pub fn preop_time(&self) -> Option<EtherCatSystemTime> {
        self.preop_time
    }

    pub fn sdo_dictionary_fetched(&self) -> bool {
        self.sdo_dictionary_fetched
    }

    /// Exact match, so a set acknowledge bit never counts as arrived.
    pub(crate) fn is_at_requested_state(&self) -> bool {
        self.current_state.0 == self.requested_state.code()
    }

    pub(crate) fn needs_configuration(&self) -> bool {
        !self.is_at_requested_state() || self.force_config
    }
}

use bitfield::*;
use core::fmt;
use num_enum::TryFromPrimitive;

const R1: u16 = 0x0120; //RW
const R3: u16 = 0x0130; //R
const R6: u16 = 0x0134; //R

bitfield! {
    #[derive(Debug, Clone)]
    pub struct AlControl([u8]);
    pub u8, state, set_state: 3, 0;
    pub acknowledge, set_acknowledge: 4;
    pub u8, appl_specific, set_appl_specific: 8*2-1, 8;
}

impl AlControl<[u8; 2]> {
    pub const ADDRESS: u16 = R1;
    pub const SIZE: usize = 2;

    pub fn new() -> Self {
        Self([0; Self::SIZE])
    }
}

bitfield! {
    #[derive(Debug, Clone)]
    pub struct AlStatus([u8]);
    pub u8, state, _: 3, 0;
    pub change_err, _: 4;
    /// State nibble plus the error bit, as stored in `Slave::current_state`.
    pub u8, raw_state, _: 7, 0;
    pub u8, appl_specific, _: 8*2-1, 8;
}

impl AlStatus<[u8; 2]> {
    pub const ADDRESS: u16 = R3;
    /// Only the state word is polled.
    pub const SIZE: usize = 2;

    pub fn new() -> Self {
        Self([0; Self::SIZE])
    }
}

bitfield! {
    #[derive(Debug, Clone)]
    pub struct AlStatusCodeRegister([u8]);
    pub u16, code, _: 15, 0;
}

impl AlStatusCodeRegister<[u8; 2]> {
    pub const ADDRESS: u16 = R6;
    pub const SIZE: usize = 2;

    pub fn new() -> Self {
        Self([0; Self::SIZE])
    }
}

impl<B: AsRef<[u8]>> AlStatusCodeRegister<B> {
    pub fn al_status_code(&self) -> Result<AlStatusCode, u16> {
        AlStatusCode::try_from(self.code()).map_err(|err| err.number)
    }
}

#[derive(Debug, Clone, Copy, TryFromPrimitive, PartialEq, Eq)]
#[repr(u16)]
pub enum AlStatusCode {
    UnspecifiedError = 0x0001,
    InvalidRequestedStateChange = 0x0011,
    UnknownRequestedState = 0x0012,
    BootstrapNotSupported = 0x0013,
    NoValidFirmware = 0x0014,
    InvalidMailboxConfiguration = 0x0015,
    InvalidMailboxConfigurationBoot = 0x0016,
    InvalidSyncManagerConfiguration = 0x0017,
    NoValidInputsAvailable = 0x0018,
    NoValidOutputs = 0x0019,
    SynchronizationError = 0x001A,
    SyncManagerWatchdog = 0x001B,
    InvalidSyncManagerTypes = 0x001C,
    InvalidOutputConfiguration = 0x001D,
    InvalidInputConfiguration = 0x001E,
    InvalidWatchdogConfiguraion = 0x001F,
    SlaveNeedsColdStart = 0x0020,
    SlaveNeedsInit = 0x0021,
    SlaveNeedsPreop = 0x0022,
    SlaveNeedsSafeop = 0x0023,
    InvalidDcSyncConfiguration = 0x0030,
    InvalidDcLatchConfiguration = 0x0031,
    PllError = 0x0032,
    DcSyncIoError = 0x0033,
    DcSyncTimeoutError = 0x0034,
    MbxEoe = 0x0042,
    MbxCoe = 0x0043,
    MbxFoe = 0x0044,
    MbxSoe = 0x0045,
    MbxVoe = 0x004F,
}

impl AlStatusCode {
    pub fn message(&self) -> &'static str {
        match self {
            Self::UnspecifiedError => "Unspecified error",
            Self::InvalidRequestedStateChange => "Invalid requested state change",
            Self::UnknownRequestedState => "Unknown requested state",
            Self::BootstrapNotSupported => "Bootstrap not supported",
            Self::NoValidFirmware => "No valid firmware",
            Self::InvalidMailboxConfiguration | Self::InvalidMailboxConfigurationBoot => {
                "Invalid mailbox configuration"
            }
            Self::InvalidSyncManagerConfiguration => "Invalid sync manager configuration",
            Self::NoValidInputsAvailable => "No valid inputs available",
            Self::NoValidOutputs => "No valid outputs",
            Self::SynchronizationError => "Synchronisation error",
            Self::SyncManagerWatchdog => "Sync manager watchdog",
            Self::InvalidSyncManagerTypes => "Invalid sync manager types",
            Self::InvalidOutputConfiguration => "Invalid output configuration",
            Self::InvalidInputConfiguration => "Invalid input configuration",
            Self::InvalidWatchdogConfiguraion => "Invalid watchdog configuration",
            Self::SlaveNeedsColdStart => "Slave needs cold start",
            Self::SlaveNeedsInit => "Slave needs INIT",
            Self::SlaveNeedsPreop => "Slave needs PREOP",
            Self::SlaveNeedsSafeop => "Slave needs SAFEOP",
            Self::InvalidDcSyncConfiguration => "Invalid DC SYNCH configuration",
            Self::InvalidDcLatchConfiguration => "Invalid DC latch configuration",
            Self::PllError => "PLL error",
            Self::DcSyncIoError => "Invalid DC IO error",
            Self::DcSyncTimeoutError => "Invalid DC timeout error",
            Self::MbxEoe => "MBOX EOE",
            Self::MbxCoe => "MBOX COE",
            Self::MbxFoe => "MBOX FOE",
            Self::MbxSoe => "MBOX SOE",
            Self::MbxVoe => "MBOX VOE",
        }
    }
}

impl fmt::Display for AlStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}: \"{}\"", *self as u16, self.message())
    }
}

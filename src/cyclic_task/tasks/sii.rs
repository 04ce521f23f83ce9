use super::super::{Datagram, EtherCatSystemTime, FSM_RETRIES};
use crate::error::EcError;
use crate::register::SiiAccess;
use crate::slave_network::Slave;
use core::fmt;
use core::time::Duration;
use log::*;

const SII_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiiTaskError {
    Timeout,
    WriteFailed,
}

impl From<SiiTaskError> for EcError<SiiTaskError> {
    fn from(err: SiiTaskError) -> Self {
        Self::TaskSpecific(err)
    }
}

impl fmt::Display for SiiTaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "SII access timed out"),
            Self::WriteFailed => write!(f, "SII write operation failed"),
        }
    }
}

/// How the slave is addressed while accessing its SII.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiiAddressing {
    /// Auto-increment, usable before station addresses are trusted.
    Position,
    Station,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Error(EcError<SiiTaskError>),
    Idle,
    StartReading,
    ReadCheck,
    ReadFetch,
    StartWriting,
    WriteCheck,
    WriteCheck2,
    End,
}

/// Reads two words from, or writes one word to, the SII of a slave.
#[derive(Debug, Clone, Copy)]
pub struct SiiTask {
    state: State,
    addressing: SiiAddressing,
    word_address: u16,
    value: [u8; 4],
    retries: u8,
    start_time: EtherCatSystemTime,
    check_once_more: bool,
}

impl Default for SiiTask {
    fn default() -> Self {
        Self::new()
    }
}

impl SiiTask {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            addressing: SiiAddressing::Station,
            word_address: 0,
            value: [0; 4],
            retries: FSM_RETRIES,
            start_time: EtherCatSystemTime(0),
            check_once_more: false,
        }
    }

    pub fn start_reading(&mut self, addressing: SiiAddressing, word_address: u16) {
        self.addressing = addressing;
        self.word_address = word_address;
        self.value = [0; 4];
        self.state = State::StartReading;
    }

    /// Writes are always node addressed.
    pub fn start_writing(&mut self, word_address: u16, word: u16) {
        self.addressing = SiiAddressing::Station;
        self.word_address = word_address;
        self.value = [0; 4];
        self.value[..2].copy_from_slice(&word.to_le_bytes());
        self.state = State::StartWriting;
    }

    pub fn is_running(&self) -> bool {
        !matches!(self.state, State::Idle | State::End | State::Error(_))
    }

    pub fn success(&self) -> bool {
        self.state == State::End
    }

    pub fn error(&self) -> Option<EcError<SiiTaskError>> {
        match self.state {
            State::Error(err) => Some(err),
            _ => None,
        }
    }

    /// The four bytes a read returned.
    pub fn value(&self) -> [u8; 4] {
        self.value
    }

    /// First and second word of a read.
    pub fn words(&self) -> (u16, u16) {
        (
            u16::from_le_bytes([self.value[0], self.value[1]]),
            u16::from_le_bytes([self.value[2], self.value[3]]),
        )
    }

    pub fn exec(&mut self, slave: &Slave, datagram: &mut Datagram) -> bool {
        if datagram.is_pending() {
            return self.is_running();
        }
        match self.state {
            State::Idle | State::End | State::Error(_) => {}
            State::StartReading => self.state_start_reading(slave, datagram),
            State::ReadCheck => self.state_read_check(slave, datagram),
            State::ReadFetch => self.state_read_fetch(slave, datagram),
            State::StartWriting => self.state_start_writing(slave, datagram),
            State::WriteCheck => self.state_write_check(slave, datagram),
            State::WriteCheck2 => self.state_write_check2(slave, datagram),
        }
        self.is_running()
    }

    fn read_register<'d>(&self, slave: &Slave, datagram: &'d mut Datagram, size: usize) -> &'d mut [u8] {
        match self.addressing {
            SiiAddressing::Position => datagram.aprd(slave.ring_position, SiiAccess::ADDRESS, size),
            SiiAddressing::Station => datagram.fprd(slave.station_address, SiiAccess::ADDRESS, size),
        }
    }

    fn check_reply(&mut self, slave: &Slave, datagram: &Datagram, what: &str) -> bool {
        if let Err(err) = datagram.check_wkc(1) {
            error!(
                "Reception of SII {} datagram failed on slave {}: {}",
                what,
                slave.ring_position,
                datagram.wc_error(1)
            );
            self.state = State::Error(err);
            false
        } else {
            true
        }
    }

    fn state_start_reading(&mut self, slave: &Slave, datagram: &mut Datagram) {
        let request = match self.addressing {
            SiiAddressing::Position => datagram.apwr(
                slave.ring_position,
                SiiAccess::ADDRESS,
                SiiAccess::READ_REQUEST_SIZE,
            ),
            SiiAddressing::Station => datagram.fpwr(
                slave.station_address,
                SiiAccess::ADDRESS,
                SiiAccess::READ_REQUEST_SIZE,
            ),
        };
        let mut sii = SiiAccess(request);
        sii.set_read_operation(true);
        sii.set_read_address(self.word_address);
        self.retries = FSM_RETRIES;
        self.state = State::ReadCheck;
    }

    fn state_read_check(&mut self, slave: &Slave, datagram: &mut Datagram) {
        if datagram.retry(&mut self.retries) {
            return;
        }
        if !self.check_reply(slave, datagram, "read") {
            return;
        }
        self.start_time = datagram.sent_at();
        self.check_once_more = true;
        self.read_register(slave, datagram, SiiAccess::SIZE);
        self.retries = FSM_RETRIES;
        self.state = State::ReadFetch;
    }

    fn state_read_fetch(&mut self, slave: &Slave, datagram: &mut Datagram) {
        if datagram.retry(&mut self.retries) {
            return;
        }
        if !self.check_reply(slave, datagram, "check/fetch") {
            return;
        }
        let sii = SiiAccess(datagram.data());
        if sii.busy() || sii.read_operation() {
            if datagram.received_at().elapsed_since(self.start_time) >= SII_TIMEOUT {
                if !self.check_once_more {
                    error!("SII: Read timeout on slave {}.", slave.ring_position);
                    self.state = State::Error(SiiTaskError::Timeout.into());
                    return;
                }
                self.check_once_more = false;
            }
            self.read_register(slave, datagram, SiiAccess::SIZE);
            self.retries = FSM_RETRIES;
            return;
        }
        self.value = sii.read_data().to_le_bytes();
        self.state = State::End;
    }

    fn state_start_writing(&mut self, slave: &Slave, datagram: &mut Datagram) {
        let mut sii = SiiAccess(datagram.fpwr(
            slave.station_address,
            SiiAccess::ADDRESS,
            SiiAccess::WRITE_REQUEST_SIZE,
        ));
        sii.set_enable_write_access(true);
        sii.set_write_operation(true);
        sii.set_sii_address(self.word_address as u32);
        sii.set_write_data(u16::from_le_bytes([self.value[0], self.value[1]]));
        self.retries = FSM_RETRIES;
        self.state = State::WriteCheck;
    }

    fn state_write_check(&mut self, slave: &Slave, datagram: &mut Datagram) {
        if datagram.retry(&mut self.retries) {
            return;
        }
        if !self.check_reply(slave, datagram, "write") {
            return;
        }
        self.start_time = datagram.sent_at();
        self.check_once_more = true;
        datagram.fprd(slave.station_address, SiiAccess::ADDRESS, 2);
        self.retries = FSM_RETRIES;
        self.state = State::WriteCheck2;
    }

    fn state_write_check2(&mut self, slave: &Slave, datagram: &mut Datagram) {
        if datagram.retry(&mut self.retries) {
            return;
        }
        if !self.check_reply(slave, datagram, "write check") {
            return;
        }
        let sii = SiiAccess(datagram.data());
        if sii.busy() || sii.write_operation() {
            if datagram.received_at().elapsed_since(self.start_time) >= SII_TIMEOUT {
                if !self.check_once_more {
                    error!("SII: Write timeout on slave {}.", slave.ring_position);
                    self.state = State::Error(SiiTaskError::Timeout.into());
                    return;
                }
                self.check_once_more = false;
            }
            datagram.resend();
            self.retries = FSM_RETRIES;
            return;
        }
        if sii.write_error() {
            error!("SII: Write operation failed on slave {}!", slave.ring_position);
            self.state = State::Error(SiiTaskError::WriteFailed.into());
            return;
        }
        self.state = State::End;
    }
}

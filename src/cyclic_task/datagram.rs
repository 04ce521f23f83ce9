use super::EtherCatSystemTime;
use crate::error::EcError;
use crate::frame::{CommandType, MAX_PDU_DATAGRAM};
use crate::util::get_ap_adp;
use core::fmt;
use heapless::Vec;
use log::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramState {
    /// Prepared by its owner, not yet handed to the master.
    Init,
    Queued,
    Sent,
    Received,
    TimedOut,
    /// Reply mismatch or transmit failure.
    Error,
    /// No reply possible, the link is down.
    LinkDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramAddress {
    /// Auto-increment addressing by ring position.
    Position { position: u16, offset: u16 },
    /// Node addressing by configured station address.
    Station { station_address: u16, offset: u16 },
    Broadcast { offset: u16 },
    Logical(u32),
}

impl DatagramAddress {
    /// ADP and ADO as they go on the wire.
    pub fn wire(&self) -> (u16, u16) {
        match *self {
            Self::Position { position, offset } => (get_ap_adp(position), offset),
            Self::Station {
                station_address,
                offset,
            } => (station_address, offset),
            Self::Broadcast { offset } => (0, offset),
            Self::Logical(address) => ((address & 0x0000_ffff) as u16, (address >> 16) as u16),
        }
    }

    /// Physical memory offset, `None` for logical addressing.
    pub fn offset(&self) -> Option<u16> {
        match *self {
            Self::Position { offset, .. }
            | Self::Station { offset, .. }
            | Self::Broadcast { offset } => Some(offset),
            Self::Logical(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramError {
    /// A reply arrived for a datagram that was not on the wire.
    NotSent,
    /// Command or length of the reply differ from the request.
    Mismatch,
}

/// A single EtherCat command with its payload and lifecycle.
///
/// The owner prepares it with one of the command constructors (`fprd`, `bwr`, ...),
/// the master queues it, the transport sends it and later settles it to
/// `Received`, `TimedOut` or `Error`.
#[derive(Debug, Clone)]
pub struct Datagram {
    command: CommandType,
    address: DatagramAddress,
    data: Vec<u8, MAX_PDU_DATAGRAM>,
    state: DatagramState,
    index: u8,
    working_counter: u16,
    sent_at: EtherCatSystemTime,
    received_at: EtherCatSystemTime,
}

impl Default for Datagram {
    fn default() -> Self {
        Self::new()
    }
}

impl Datagram {
    pub fn new() -> Self {
        Self {
            command: CommandType::NOP,
            address: DatagramAddress::Broadcast { offset: 0 },
            data: Vec::new(),
            state: DatagramState::Init,
            index: 0,
            working_counter: 0,
            sent_at: EtherCatSystemTime(0),
            received_at: EtherCatSystemTime(0),
        }
    }

    fn prepare(&mut self, command: CommandType, address: DatagramAddress, size: usize) -> &mut [u8] {
        debug_assert!(size <= MAX_PDU_DATAGRAM);
        let size = size.min(MAX_PDU_DATAGRAM);
        self.command = command;
        self.address = address;
        self.data.clear();
        // cannot fail, size is clamped to the capacity
        let _ = self.data.resize(size, 0);
        self.state = DatagramState::Init;
        self.working_counter = 0;
        &mut self.data
    }

    pub fn aprd(&mut self, position: u16, offset: u16, size: usize) -> &mut [u8] {
        self.prepare(CommandType::APRD, DatagramAddress::Position { position, offset }, size)
    }

    pub fn apwr(&mut self, position: u16, offset: u16, size: usize) -> &mut [u8] {
        self.prepare(CommandType::APWR, DatagramAddress::Position { position, offset }, size)
    }

    pub fn fprd(&mut self, station_address: u16, offset: u16, size: usize) -> &mut [u8] {
        self.prepare(
            CommandType::FPRD,
            DatagramAddress::Station {
                station_address,
                offset,
            },
            size,
        )
    }

    pub fn fpwr(&mut self, station_address: u16, offset: u16, size: usize) -> &mut [u8] {
        self.prepare(
            CommandType::FPWR,
            DatagramAddress::Station {
                station_address,
                offset,
            },
            size,
        )
    }

    pub fn brd(&mut self, offset: u16, size: usize) -> &mut [u8] {
        self.prepare(CommandType::BRD, DatagramAddress::Broadcast { offset }, size)
    }

    pub fn bwr(&mut self, offset: u16, size: usize) -> &mut [u8] {
        self.prepare(CommandType::BWR, DatagramAddress::Broadcast { offset }, size)
    }

    pub fn lrw(&mut self, logical_address: u32, size: usize) -> &mut [u8] {
        self.prepare(CommandType::LRW, DatagramAddress::Logical(logical_address), size)
    }

    pub fn command(&self) -> CommandType {
        self.command
    }

    pub fn address(&self) -> DatagramAddress {
        self.address
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn state(&self) -> DatagramState {
        self.state
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn working_counter(&self) -> u16 {
        self.working_counter
    }

    pub fn sent_at(&self) -> EtherCatSystemTime {
        self.sent_at
    }

    pub fn received_at(&self) -> EtherCatSystemTime {
        self.received_at
    }

    /// Queued or on the wire. Its owner must not look at it yet.
    pub fn is_pending(&self) -> bool {
        matches!(self.state, DatagramState::Queued | DatagramState::Sent)
    }

    /// Hands a freshly prepared datagram to the master. Returns `false` if there was nothing to queue.
    pub fn queue(&mut self) -> bool {
        if self.state == DatagramState::Init {
            self.state = DatagramState::Queued;
            true
        } else {
            false
        }
    }

    pub fn mark_sent(&mut self, index: u8, sys_time: EtherCatSystemTime) {
        if self.state != DatagramState::Queued {
            warn!("Sending datagram in state {:?}", self.state);
        }
        self.index = index;
        self.sent_at = sys_time;
        self.state = DatagramState::Sent;
    }

    /// Settles the datagram with a reply. The reply must match command, index and length.
    pub fn receive(
        &mut self,
        command: CommandType,
        index: u8,
        data: &[u8],
        working_counter: u16,
        sys_time: EtherCatSystemTime,
    ) -> Result<(), DatagramError> {
        if self.state != DatagramState::Sent {
            warn!(
                "Dropping reply with index 0x{:02X}: datagram is {:?}",
                index, self.state
            );
            return Err(DatagramError::NotSent);
        }
        if command != self.command || index != self.index || data.len() != self.data.len() {
            warn!(
                "Reply {:?}/0x{:02X}/{} does not match datagram {:?}/0x{:02X}/{}",
                command,
                index,
                data.len(),
                self.command,
                self.index,
                self.data.len()
            );
            self.state = DatagramState::Error;
            return Err(DatagramError::Mismatch);
        }
        self.data.copy_from_slice(data);
        self.working_counter = working_counter;
        self.received_at = sys_time;
        self.state = DatagramState::Received;
        Ok(())
    }

    pub fn time_out(&mut self, sys_time: EtherCatSystemTime) {
        if self.state == DatagramState::Sent {
            self.received_at = sys_time;
            self.state = DatagramState::TimedOut;
        }
    }

    /// Settles the datagram without a reply after a transmit failure.
    pub fn fail(&mut self) {
        self.state = DatagramState::Error;
    }

    pub fn link_down(&mut self) {
        self.state = DatagramState::LinkDown;
    }

    /// Sends the same command and payload again.
    pub fn resend(&mut self) {
        self.working_counter = 0;
        self.state = DatagramState::Init;
    }

    /// Resends a timed-out datagram while `retries` lasts.
    pub fn retry(&mut self, retries: &mut u8) -> bool {
        if self.state == DatagramState::TimedOut && *retries > 0 {
            *retries -= 1;
            self.resend();
            true
        } else {
            false
        }
    }

    /// `Ok` if the reply arrived, whatever its working counter.
    pub fn check_received<E>(&self) -> Result<(), EcError<E>> {
        match self.state {
            DatagramState::Received => Ok(()),
            state => Err(state.into()),
        }
    }

    /// `Ok` only for a reply with exactly `expected` as working counter.
    pub fn check_wkc<E>(&self, expected: u16) -> Result<(), EcError<E>> {
        self.check_received()?;
        if self.working_counter == expected {
            Ok(())
        } else {
            Err(EcError::UnexpectedWkc(self.working_counter))
        }
    }

    pub fn wc_error(&self, expected: u16) -> WcError {
        WcError {
            working_counter: self.working_counter,
            expected,
        }
    }
}

/// Human-readable working counter mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WcError {
    pub working_counter: u16,
    pub expected: u16,
}

impl fmt::Display for WcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.working_counter == 0 {
            write!(f, "No response.")
        } else {
            write!(
                f,
                "Datagram processed by {} slaves, expected {}.",
                self.working_counter, self.expected
            )
        }
    }
}

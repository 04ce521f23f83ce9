use super::super::{Datagram, EtherCatSystemTime, FSM_RETRIES};
use crate::error::EcError;
use crate::register::{AlControl, AlStatus, AlStatusCodeRegister};
use crate::slave_network::{AlState, Slave, SlaveState};
use core::fmt;
use core::time::Duration;
use log::*;

/// Ceiling for a state write that nobody answers.
const STATE_WRITE_TIMEOUT: Duration = Duration::from_secs(3);
/// Ceiling for polling AL status, both for the state change and the acknowledge.
const STATE_CHECK_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlStateTransferError {
    /// The state write kept getting a zero working counter.
    NoResponse,
    /// AL status did not change within the ceiling.
    Timeout,
    /// The slave refused the change. The AL status code is attached if it could be read.
    Refused { code: Option<u16> },
    AckTimeout,
}

impl From<AlStateTransferError> for EcError<AlStateTransferError> {
    fn from(err: AlStateTransferError) -> Self {
        Self::TaskSpecific(err)
    }
}

impl fmt::Display for AlStateTransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResponse => write!(f, "no response to state request"),
            Self::Timeout => write!(f, "timeout while changing state"),
            Self::Refused { code: Some(code) } => {
                write!(f, "state change refused, AL status code 0x{:04X}", code)
            }
            Self::Refused { code: None } => write!(f, "state change refused"),
            Self::AckTimeout => write!(f, "timeout while acknowledging state"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlStateTransferMode {
    /// Request a state and verify it.
    Full,
    /// Only clear the error indication of the current state.
    AckOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Error(EcError<AlStateTransferError>),
    Idle,
    Start,
    Check,
    Status,
    Code,
    StartAck,
    Ack,
    CheckAck,
    End,
}

/// Moves one slave to a requested AL state, acknowledging a refusal.
#[derive(Debug, Clone, Copy)]
pub struct AlStateTransfer {
    state: State,
    mode: AlStateTransferMode,
    requested: SlaveState,
    old_state: SlaveState,
    retries: u8,
    take_time: bool,
    start_time: EtherCatSystemTime,
    spontaneous_change: bool,
    al_status_code: Option<u16>,
}

impl Default for AlStateTransfer {
    fn default() -> Self {
        Self::new()
    }
}

impl AlStateTransfer {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            mode: AlStateTransferMode::Full,
            requested: SlaveState::UNKNOWN,
            old_state: SlaveState::UNKNOWN,
            retries: FSM_RETRIES,
            take_time: false,
            start_time: EtherCatSystemTime(0),
            spontaneous_change: false,
            al_status_code: None,
        }
    }

    pub fn start(&mut self, al_state: AlState) {
        self.mode = AlStateTransferMode::Full;
        self.requested = al_state.into();
        self.spontaneous_change = false;
        self.al_status_code = None;
        self.state = State::Start;
    }

    /// Acknowledges whatever state the slave is in.
    pub fn ack(&mut self) {
        self.mode = AlStateTransferMode::AckOnly;
        self.requested = SlaveState::UNKNOWN;
        self.spontaneous_change = false;
        self.al_status_code = None;
        self.state = State::StartAck;
    }

    pub fn mode(&self) -> AlStateTransferMode {
        self.mode
    }

    pub fn is_running(&self) -> bool {
        !matches!(self.state, State::Idle | State::End | State::Error(_))
    }

    pub fn success(&self) -> bool {
        self.state == State::End
    }

    /// The slave changed its state on its own while we were polling.
    pub fn spontaneous_change(&self) -> bool {
        self.spontaneous_change
    }

    pub fn al_status_code(&self) -> Option<u16> {
        self.al_status_code
    }

    pub fn error(&self) -> Option<EcError<AlStateTransferError>> {
        match self.state {
            State::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn wait(&self) -> nb::Result<(), EcError<AlStateTransferError>> {
        match self.state {
            State::End => Ok(()),
            State::Error(err) => Err(nb::Error::Other(err)),
            _ => Err(nb::Error::WouldBlock),
        }
    }

    /// Runs one step. Returns `false` once the transfer has finished.
    pub fn exec(&mut self, slave: &mut Slave, datagram: &mut Datagram) -> bool {
        if datagram.is_pending() {
            return self.is_running();
        }
        match self.state {
            State::Idle | State::End | State::Error(_) => {}
            State::Start => self.state_start(slave, datagram),
            State::Check => self.state_check(slave, datagram),
            State::Status => self.state_status(slave, datagram),
            State::Code => self.state_code(slave, datagram),
            State::StartAck => self.state_start_ack(slave, datagram),
            State::Ack => self.state_ack(slave, datagram),
            State::CheckAck => self.state_check_ack(slave, datagram),
        }
        self.is_running()
    }

    fn fail(&mut self, slave: &mut Slave, err: EcError<AlStateTransferError>) {
        if !self.spontaneous_change {
            slave.error_flag = true;
        }
        self.state = State::Error(err);
    }

    fn write_control(slave: &Slave, datagram: &mut Datagram, state: SlaveState) {
        let mut control = AlControl(datagram.fpwr(
            slave.station_address,
            AlControl::ADDRESS,
            AlControl::SIZE,
        ));
        control.set_state(state.state_code());
        control.set_acknowledge(state.ack_err());
    }

    fn read_status(&mut self, slave: &Slave, datagram: &mut Datagram) {
        datagram.fprd(slave.station_address, AlStatus::ADDRESS, AlStatus::SIZE);
        self.retries = FSM_RETRIES;
    }

    fn take_start_time(&mut self, datagram: &Datagram) {
        if self.take_time {
            self.take_time = false;
            self.start_time = datagram.sent_at();
        }
    }

    fn state_start(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        self.take_time = true;
        self.old_state = slave.current_state;
        Self::write_control(slave, datagram, self.requested);
        self.retries = FSM_RETRIES;
        self.state = State::Check;
    }

    fn state_check(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        if datagram.retry(&mut self.retries) {
            return;
        }
        if let Err(err) = datagram.check_received() {
            error!(
                "Failed to receive state datagram from slave {} ({:?})",
                slave.ring_position,
                datagram.state()
            );
            return self.fail(slave, err);
        }
        self.take_start_time(datagram);

        match datagram.working_counter() {
            0 => {
                if datagram.received_at().elapsed_since(self.start_time) >= STATE_WRITE_TIMEOUT {
                    error!(
                        "Failed to set state {} on slave {}: {}",
                        self.requested,
                        slave.ring_position,
                        datagram.wc_error(1)
                    );
                    return self.fail(slave, AlStateTransferError::NoResponse.into());
                }
                Self::write_control(slave, datagram, self.requested);
                self.retries = FSM_RETRIES;
            }
            1 => {
                self.take_time = true;
                self.read_status(slave, datagram);
                self.spontaneous_change = false;
                self.state = State::Status;
            }
            wkc => {
                error!(
                    "Failed to set state {} on slave {}: {}",
                    self.requested,
                    slave.ring_position,
                    datagram.wc_error(1)
                );
                self.fail(slave, EcError::UnexpectedWkc(wkc));
            }
        }
    }

    fn state_status(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        if datagram.retry(&mut self.retries) {
            return;
        }
        if let Err(err) = datagram.check_wkc(1) {
            error!(
                "Failed to check state {} on slave {}: {}",
                self.requested,
                slave.ring_position,
                datagram.wc_error(1)
            );
            return self.fail(slave, err);
        }
        self.take_start_time(datagram);

        slave.current_state = SlaveState(AlStatus(datagram.data()).raw_state());

        if slave.current_state == self.requested {
            self.state = State::End;
            return;
        }

        if slave.current_state != self.old_state {
            if slave.current_state.state_code() != self.old_state.state_code() {
                // changed on its own just before our request arrived
                self.spontaneous_change = true;
                self.old_state = slave.current_state;
                warn!(
                    "Slave {} changed to {} in the meantime.",
                    slave.ring_position, slave.current_state
                );
                self.read_status(slave, datagram);
                return;
            }

            slave.error_flag = true;
            error!(
                "Failed to set {} state, slave {} refused state change ({}).",
                self.requested, slave.ring_position, slave.current_state
            );
            datagram.fprd(
                slave.station_address,
                AlStatusCodeRegister::ADDRESS,
                AlStatusCodeRegister::SIZE,
            );
            self.retries = FSM_RETRIES;
            self.state = State::Code;
            return;
        }

        if datagram.received_at().elapsed_since(self.start_time) >= STATE_CHECK_TIMEOUT {
            error!(
                "Timeout while setting state {} on slave {}.",
                self.requested, slave.ring_position
            );
            return self.fail(slave, AlStateTransferError::Timeout.into());
        }

        self.read_status(slave, datagram);
    }

    fn state_code(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        if datagram.retry(&mut self.retries) {
            return;
        }
        if let Err(err) = datagram.check_received() {
            error!(
                "Failed to receive AL status code datagram from slave {} ({:?})",
                slave.ring_position,
                datagram.state()
            );
            return self.fail(slave, err);
        }

        if datagram.working_counter() != 1 {
            warn!(
                "Reception of AL status code datagram failed: {}",
                datagram.wc_error(1)
            );
        } else {
            let register = AlStatusCodeRegister(datagram.data());
            self.al_status_code = Some(register.code());
            match register.al_status_code() {
                Ok(code) => error!("AL status message {}.", code),
                Err(code) => error!("Unknown AL status code 0x{:04X}.", code),
            }
        }

        self.state_start_ack(slave, datagram);
    }

    fn state_start_ack(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        Self::write_control(slave, datagram, slave.current_state);
        self.retries = FSM_RETRIES;
        self.state = State::Ack;
    }

    fn state_ack(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        if datagram.retry(&mut self.retries) {
            return;
        }
        if let Err(err) = datagram.check_wkc(1) {
            error!(
                "Reception of state ack datagram failed on slave {}: {}",
                slave.ring_position,
                datagram.wc_error(1)
            );
            return self.fail(slave, err);
        }
        self.take_time = true;
        self.read_status(slave, datagram);
        self.state = State::CheckAck;
    }

    fn state_check_ack(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        if datagram.retry(&mut self.retries) {
            return;
        }
        if let Err(err) = datagram.check_wkc(1) {
            error!(
                "Reception of state ack check datagram failed on slave {}: {}",
                slave.ring_position,
                datagram.wc_error(1)
            );
            return self.fail(slave, err);
        }
        self.take_start_time(datagram);

        slave.current_state = SlaveState(AlStatus(datagram.data()).raw_state());

        if !slave.current_state.ack_err() {
            info!(
                "Acknowledged state {} on slave {}.",
                slave.current_state, slave.ring_position
            );
            self.state = match self.mode {
                AlStateTransferMode::Full => State::Error(
                    AlStateTransferError::Refused {
                        code: self.al_status_code,
                    }
                    .into(),
                ),
                AlStateTransferMode::AckOnly => State::End,
            };
            return;
        }

        if datagram.received_at().elapsed_since(self.start_time) >= STATE_CHECK_TIMEOUT {
            error!(
                "Timeout while acknowledging state {} on slave {}.",
                slave.current_state, slave.ring_position
            );
            return self.fail(slave, AlStateTransferError::AckTimeout.into());
        }

        self.read_status(slave, datagram);
    }
}

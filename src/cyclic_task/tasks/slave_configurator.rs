use super::super::{Datagram, EtherCatSystemTime, FSM_RETRIES};
use super::{AlStateTransfer, AlStateTransferError, CoeHandler, PdoConfigurator};
use crate::error::EcError;
use crate::register::{FmmuRegister, SyncManagerRegister};
use crate::slave_network::{AlState, Slave, SyncManagerInfo, FMMU_PAGE_SIZE, SYNC_PAGE_SIZE};
use core::fmt;
use core::time::Duration;
use log::*;

/// Freshly cleared sync managers may ignore the next datagram for a while.
const MBOX_SYNC_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveConfiguratorError {
    StateChange(AlStateTransferError),
    MailboxSyncTimeout,
    SdoConfig { index: u16, subindex: u8 },
    PdoConfig,
    TooFewFmmus { available: u8, requested: u8 },
    NoSyncManager { sync_index: u8 },
}

impl From<SlaveConfiguratorError> for EcError<SlaveConfiguratorError> {
    fn from(err: SlaveConfiguratorError) -> Self {
        Self::TaskSpecific(err)
    }
}

impl From<EcError<AlStateTransferError>> for EcError<SlaveConfiguratorError> {
    fn from(err: EcError<AlStateTransferError>) -> Self {
        match err {
            EcError::LostPacket => EcError::LostPacket,
            EcError::UnexpectedWkc(wkc) => EcError::UnexpectedWkc(wkc),
            EcError::Datagram(state) => EcError::Datagram(state),
            EcError::TaskSpecific(err) => SlaveConfiguratorError::StateChange(err).into(),
        }
    }
}

impl fmt::Display for SlaveConfiguratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StateChange(err) => fmt::Display::fmt(err, f),
            Self::MailboxSyncTimeout => {
                write!(f, "timeout while configuring mailbox sync managers")
            }
            Self::SdoConfig { index, subindex } => {
                write!(f, "SDO configuration of 0x{:04X}:{:02X} failed", index, subindex)
            }
            Self::PdoConfig => write!(f, "PDO configuration failed"),
            Self::TooFewFmmus {
                available,
                requested,
            } => write!(
                f,
                "slave has less FMMUs ({}) than requested ({})",
                available, requested
            ),
            Self::NoSyncManager { sync_index } => {
                write!(f, "no sync manager {} for FMMU", sync_index)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Error(EcError<SlaveConfiguratorError>),
    Idle,
    Start,
    Init,
    ClearFmmus,
    ClearSync,
    MboxSync,
    BootPreop,
    SdoConf,
    PdoConf,
    PdoSync,
    Fmmu,
    Safeop,
    Op,
    End,
}

/// Brings one slave from whatever state it is in to its requested state,
/// writing FMMUs, sync managers and the application configuration on the way.
#[derive(Debug, Clone, Copy)]
pub struct SlaveConfigurator {
    state: State,
    transfer: AlStateTransfer,
    retries: u8,
    take_time: bool,
    start_time: EtherCatSystemTime,
    sdo_index: usize,
}

impl Default for SlaveConfigurator {
    fn default() -> Self {
        Self::new()
    }
}

impl SlaveConfigurator {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            transfer: AlStateTransfer::new(),
            retries: FSM_RETRIES,
            take_time: false,
            start_time: EtherCatSystemTime(0),
            sdo_index: 0,
        }
    }

    pub fn start(&mut self) {
        self.sdo_index = 0;
        self.state = State::Start;
    }

    pub fn is_running(&self) -> bool {
        !matches!(self.state, State::Idle | State::End | State::Error(_))
    }

    pub fn success(&self) -> bool {
        self.state == State::End
    }

    pub fn error(&self) -> Option<EcError<SlaveConfiguratorError>> {
        match self.state {
            State::Error(err) => Some(err),
            _ => None,
        }
    }

    /// The last state change failed because the slave moved on its own.
    pub fn spontaneous_change(&self) -> bool {
        self.transfer.spontaneous_change()
    }

    pub fn exec<C, P>(
        &mut self,
        slave: &mut Slave,
        datagram: &mut Datagram,
        coe: &mut C,
        pdo: &mut P,
    ) -> bool
    where
        C: CoeHandler,
        P: PdoConfigurator,
    {
        if datagram.is_pending() {
            return self.is_running();
        }
        match self.state {
            State::Idle | State::End | State::Error(_) => {}
            State::Start => self.state_start(slave, datagram),
            State::Init => self.state_init(slave, datagram),
            State::ClearFmmus => self.state_clear_fmmus(slave, datagram),
            State::ClearSync => self.state_clear_sync(slave, datagram),
            State::MboxSync => self.state_mbox_sync(slave, datagram),
            State::BootPreop => self.state_boot_preop(slave, datagram, coe, pdo),
            State::SdoConf => self.state_sdo_conf(slave, datagram, coe, pdo),
            State::PdoConf => self.state_pdo_conf(slave, datagram, pdo),
            State::PdoSync => self.state_pdo_sync(slave, datagram),
            State::Fmmu => self.state_fmmu(slave, datagram),
            State::Safeop => self.state_safeop(slave, datagram),
            State::Op => self.state_op(slave, datagram),
        }
        self.is_running()
    }

    fn fail(&mut self, slave: &mut Slave, err: EcError<SlaveConfiguratorError>) {
        slave.error_flag = true;
        self.state = State::Error(err);
    }

    fn transfer_failed(&mut self, slave: &mut Slave) {
        if !self.transfer.spontaneous_change() {
            slave.error_flag = true;
        }
        let err = self
            .transfer
            .error()
            .unwrap_or(EcError::TaskSpecific(AlStateTransferError::Timeout));
        self.state = State::Error(err.into());
    }

    /// Common reply check of the register writes.
    fn check_write(&mut self, slave: &mut Slave, datagram: &Datagram, what: &str) -> bool {
        if let Err(err) = datagram.check_wkc(1) {
            error!(
                "Failed to {} of slave {}: {}",
                what,
                slave.ring_position,
                datagram.wc_error(1)
            );
            self.fail(slave, err);
            false
        } else {
            true
        }
    }

    fn state_start(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        if slave.is_at_requested_state() && !slave.force_config {
            debug!(
                "Slave {} is already in {}.",
                slave.ring_position, slave.current_state
            );
            self.state = State::End;
            return;
        }
        slave.force_config = false;
        debug!("Configuring slave {}...", slave.ring_position);
        self.enter_init(slave, datagram);
    }

    fn enter_init(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        self.transfer.start(AlState::Init);
        self.state = State::Init;
        self.state_init(slave, datagram);
    }

    fn state_init(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        if self.transfer.exec(slave, datagram) {
            return;
        }
        if !self.transfer.success() {
            return self.transfer_failed(slave);
        }
        debug!("Slave {} is now in INIT.", slave.ring_position);

        if slave.base_fmmu_count == 0 {
            return self.enter_clear_sync(slave, datagram);
        }
        datagram.fpwr(
            slave.station_address,
            FmmuRegister::ADDRESS,
            FMMU_PAGE_SIZE * slave.base_fmmu_count as usize,
        );
        self.retries = FSM_RETRIES;
        self.state = State::ClearFmmus;
    }

    fn state_clear_fmmus(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        if datagram.retry(&mut self.retries) {
            return;
        }
        if !self.check_write(slave, datagram, "clear FMMUs") {
            return;
        }
        self.enter_clear_sync(slave, datagram);
    }

    fn enter_clear_sync(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        if slave.base_sync_count == 0 {
            return self.enter_mbox_sync(slave, datagram);
        }
        datagram.fpwr(
            slave.station_address,
            SyncManagerRegister::ADDRESS,
            SYNC_PAGE_SIZE * slave.base_sync_count as usize,
        );
        self.retries = FSM_RETRIES;
        self.state = State::ClearSync;
    }

    fn state_clear_sync(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        if datagram.retry(&mut self.retries) {
            return;
        }
        if !self.check_write(slave, datagram, "clear sync managers") {
            return;
        }
        self.enter_mbox_sync(slave, datagram);
    }

    fn enter_mbox_sync(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        if slave.is_at_requested_state() {
            debug!("Finished configuration of slave {}.", slave.ring_position);
            self.state = State::End;
            return;
        }
        if slave.sii.mailbox_protocols.is_empty() {
            debug!(
                "Slave {} does not support mailbox communication.",
                slave.ring_position
            );
            return self.enter_boot_preop(slave, datagram);
        }

        let mailbox: [SyncManagerInfo; 2] = if slave.requested_state == AlState::Bootstrap {
            slave.sii.boot_mailbox()
        } else if slave.sii.syncs.len() >= 2 {
            [slave.sii.syncs[0], slave.sii.syncs[1]]
        } else {
            debug!(
                "Slave {} does not provide mailbox sync manager configurations.",
                slave.ring_position
            );
            slave.sii.std_mailbox()
        };
        let pages = datagram.fpwr(
            slave.station_address,
            SyncManagerRegister::ADDRESS,
            SYNC_PAGE_SIZE * 2,
        );
        for (sync, page) in mailbox.iter().zip(pages.chunks_exact_mut(SYNC_PAGE_SIZE)) {
            sync.write_page(sync.default_length, page);
        }
        self.take_time = true;
        self.retries = FSM_RETRIES;
        self.state = State::MboxSync;
    }

    fn state_mbox_sync(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        if datagram.retry(&mut self.retries) {
            return;
        }
        if let Err(err) = datagram.check_received() {
            error!(
                "Failed to receive sync manager configuration datagram for slave {} ({:?}).",
                slave.ring_position,
                datagram.state()
            );
            return self.fail(slave, err);
        }
        if self.take_time {
            self.take_time = false;
            self.start_time = datagram.sent_at();
        }

        if datagram.working_counter() > 1 {
            error!(
                "Failed to set mailbox sync managers of slave {}: {}",
                slave.ring_position,
                datagram.wc_error(1)
            );
            return self.fail(slave, EcError::UnexpectedWkc(datagram.working_counter()));
        }
        if datagram.working_counter() == 0 {
            if datagram.received_at().elapsed_since(self.start_time) >= MBOX_SYNC_TIMEOUT {
                error!(
                    "Timeout while configuring mailbox sync managers of slave {}: {}",
                    slave.ring_position,
                    datagram.wc_error(1)
                );
                return self.fail(slave, SlaveConfiguratorError::MailboxSyncTimeout.into());
            }
            debug!(
                "Resending mailbox sync manager configuration of slave {}.",
                slave.ring_position
            );
            datagram.resend();
            self.retries = FSM_RETRIES;
            return;
        }

        self.enter_boot_preop(slave, datagram);
    }

    fn enter_boot_preop(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        let target = if slave.requested_state == AlState::Bootstrap {
            AlState::Bootstrap
        } else {
            AlState::PreOperational
        };
        self.transfer.start(target);
        self.state = State::BootPreop;
        self.transfer.exec(slave, datagram);
    }

    fn state_boot_preop<C, P>(
        &mut self,
        slave: &mut Slave,
        datagram: &mut Datagram,
        coe: &mut C,
        pdo: &mut P,
    ) where
        C: CoeHandler,
        P: PdoConfigurator,
    {
        if self.transfer.exec(slave, datagram) {
            return;
        }
        if !self.transfer.success() {
            return self.transfer_failed(slave);
        }
        slave.preop_time = Some(datagram.received_at());
        debug!(
            "Slave {} is now in {}.",
            slave.ring_position, slave.current_state
        );

        if slave.is_at_requested_state() {
            debug!("Finished configuration of slave {}.", slave.ring_position);
            self.state = State::End;
            return;
        }
        self.enter_sdo_conf(slave, datagram, coe, pdo);
    }

    fn enter_sdo_conf<C, P>(
        &mut self,
        slave: &mut Slave,
        datagram: &mut Datagram,
        coe: &mut C,
        pdo: &mut P,
    ) where
        C: CoeHandler,
        P: PdoConfigurator,
    {
        let has_sdos = match &slave.config {
            None => return self.enter_safeop(slave, datagram),
            Some(config) => !config.sdo_configs.is_empty(),
        };
        if !has_sdos {
            return self.enter_pdo_conf(slave, datagram, pdo);
        }
        self.sdo_index = 0;
        self.start_sdo_download(slave, coe);
        self.state = State::SdoConf;
        self.state_sdo_conf(slave, datagram, coe, pdo);
    }

    fn start_sdo_download<C: CoeHandler>(&self, slave: &Slave, coe: &mut C) {
        if let Some(sdo) = slave
            .config
            .as_ref()
            .and_then(|config| config.sdo_configs.get(self.sdo_index))
        {
            coe.start_download(slave, sdo.index, sdo.subindex, &sdo.data);
        }
    }

    fn restart(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        info!(
            "Configuration of slave {} was detached, reconfiguring.",
            slave.ring_position
        );
        self.enter_init(slave, datagram);
    }

    fn state_sdo_conf<C, P>(
        &mut self,
        slave: &mut Slave,
        datagram: &mut Datagram,
        coe: &mut C,
        pdo: &mut P,
    ) where
        C: CoeHandler,
        P: PdoConfigurator,
    {
        if slave.config.is_none() {
            return self.restart(slave, datagram);
        }
        if coe.exec(slave, datagram) {
            return;
        }

        let (count, failed) = match &slave.config {
            Some(config) => (
                config.sdo_configs.len(),
                config
                    .sdo_configs
                    .get(self.sdo_index)
                    .map(|sdo| (sdo.index, sdo.subindex)),
            ),
            None => return self.restart(slave, datagram),
        };
        if !coe.success() {
            let (index, subindex) = failed.unwrap_or_default();
            error!(
                "SDO configuration of 0x{:04X}:{:02X} failed for slave {}.",
                index, subindex, slave.ring_position
            );
            return self.fail(
                slave,
                SlaveConfiguratorError::SdoConfig { index, subindex }.into(),
            );
        }

        self.sdo_index += 1;
        if self.sdo_index < count {
            self.start_sdo_download(slave, coe);
            return self.state_sdo_conf(slave, datagram, coe, pdo);
        }
        self.enter_pdo_conf(slave, datagram, pdo);
    }

    fn enter_pdo_conf<P: PdoConfigurator>(
        &mut self,
        slave: &mut Slave,
        datagram: &mut Datagram,
        pdo: &mut P,
    ) {
        pdo.start(slave);
        self.state = State::PdoConf;
        self.state_pdo_conf(slave, datagram, pdo);
    }

    fn state_pdo_conf<P: PdoConfigurator>(
        &mut self,
        slave: &mut Slave,
        datagram: &mut Datagram,
        pdo: &mut P,
    ) {
        if slave.config.is_none() {
            return self.restart(slave, datagram);
        }
        if pdo.exec(slave, datagram) {
            return;
        }
        if slave.config.is_none() {
            return self.restart(slave, datagram);
        }
        if !pdo.success() {
            error!("PDO configuration failed for slave {}.", slave.ring_position);
            return self.fail(slave, SlaveConfiguratorError::PdoConfig.into());
        }
        self.enter_pdo_sync(slave, datagram);
    }

    fn enter_pdo_sync(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        let offset = if slave.sii.mailbox_protocols.is_empty() {
            0
        } else {
            2
        };
        let count = slave.sii.syncs.len().saturating_sub(offset);
        if count == 0 {
            return self.enter_fmmu(slave, datagram);
        }

        let pages = datagram.fpwr(
            slave.station_address,
            SyncManagerRegister::ADDRESS + (SYNC_PAGE_SIZE * offset) as u16,
            SYNC_PAGE_SIZE * count,
        );
        for (i, page) in pages.chunks_exact_mut(SYNC_PAGE_SIZE).enumerate() {
            let index = i + offset;
            let size = slave
                .config
                .as_ref()
                .and_then(|config| config.sync_config(index as u8))
                .map(|sync| sync.byte_size())
                .unwrap_or(0);
            slave.sii.syncs[index].write_page(size, page);
        }
        self.retries = FSM_RETRIES;
        self.state = State::PdoSync;
    }

    fn state_pdo_sync(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        if datagram.retry(&mut self.retries) {
            return;
        }
        if !self.check_write(slave, datagram, "set process data sync managers") {
            return;
        }
        self.enter_fmmu(slave, datagram);
    }

    fn enter_fmmu(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        let config = match &slave.config {
            Some(config) => config,
            None => return self.enter_safeop(slave, datagram),
        };
        let requested = config.used_fmmus() as u8;
        if slave.base_fmmu_count < requested {
            error!(
                "Slave {} has less FMMUs ({}) than requested ({}).",
                slave.ring_position, slave.base_fmmu_count, requested
            );
            let available = slave.base_fmmu_count;
            return self.fail(
                slave,
                SlaveConfiguratorError::TooFewFmmus {
                    available,
                    requested,
                }
                .into(),
            );
        }
        if let Some(fmmu) = config
            .fmmu_configs
            .iter()
            .find(|fmmu| slave.sii.sync(fmmu.sync_index as usize).is_none())
        {
            let sync_index = fmmu.sync_index;
            error!(
                "Failed to determine sync manager {} for FMMU on slave {}.",
                sync_index, slave.ring_position
            );
            return self.fail(slave, SlaveConfiguratorError::NoSyncManager { sync_index }.into());
        }
        if slave.base_fmmu_count == 0 {
            return self.enter_safeop(slave, datagram);
        }

        let pages = datagram.fpwr(
            slave.station_address,
            FmmuRegister::ADDRESS,
            FMMU_PAGE_SIZE * slave.base_fmmu_count as usize,
        );
        for (fmmu, page) in config
            .fmmu_configs
            .iter()
            .zip(pages.chunks_exact_mut(FMMU_PAGE_SIZE))
        {
            let sync = &slave.sii.syncs[fmmu.sync_index as usize];
            let mut register = FmmuRegister(page);
            register.set_logical_start_address(fmmu.logical_start_address);
            register.set_length(fmmu.data_size);
            register.set_logical_start_bit(0);
            register.set_logical_end_bit(7);
            register.set_physical_start_address(sync.physical_start_address);
            if sync.is_output() {
                register.set_write_enable(true);
            } else {
                register.set_read_enable(true);
            }
            register.set_enable(true);
        }
        self.retries = FSM_RETRIES;
        self.state = State::Fmmu;
    }

    fn state_fmmu(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        if datagram.retry(&mut self.retries) {
            return;
        }
        if !self.check_write(slave, datagram, "set FMMUs") {
            return;
        }
        self.enter_safeop(slave, datagram);
    }

    fn enter_safeop(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        self.transfer.start(AlState::SafeOperational);
        self.state = State::Safeop;
        self.state_safeop(slave, datagram);
    }

    fn state_safeop(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        if self.transfer.exec(slave, datagram) {
            return;
        }
        if !self.transfer.success() {
            return self.transfer_failed(slave);
        }
        debug!("Slave {} is now in SAFEOP.", slave.ring_position);

        if slave.is_at_requested_state() {
            debug!("Finished configuration of slave {}.", slave.ring_position);
            self.state = State::End;
            return;
        }
        self.transfer.start(AlState::Operational);
        self.state = State::Op;
        self.state_op(slave, datagram);
    }

    fn state_op(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        if self.transfer.exec(slave, datagram) {
            return;
        }
        if !self.transfer.success() {
            return self.transfer_failed(slave);
        }
        debug!("Slave {} is now in OP.", slave.ring_position);
        self.state = State::End;
    }
}

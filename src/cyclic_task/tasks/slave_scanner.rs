use super::super::{Datagram, FSM_RETRIES};
use super::{SiiAddressing, SiiTask, SiiTaskError};
use crate::error::EcError;
use crate::register::{AlStatus, DlInformation, DlStatus, FixedStationAddress};
use crate::slave_network::{
    MailboxProtocols, PortStatus, SiiInfo, Slave, SlaveIdentity, SlaveState, SyncManagerInfo,
    MAX_FMMUS, MAX_SYNC_MANAGERS,
};
use alloc::vec;
use core::fmt;
use log::*;

/// Word address of the first category header.
const FIRST_CATEGORY_OFFSET: u16 = 0x0040;
/// Upper bound of the SII size walk, in words.
const MAX_SII_SIZE: u32 = 0x2000;

const CATEGORY_GENERAL: u16 = 0x001E;
const CATEGORY_SYNC_MANAGER: u16 = 0x0029;
const CATEGORY_END: u16 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveScannerError {
    Sii(SiiTaskError),
    SiiRead,
    MalformedSii,
}

impl From<SlaveScannerError> for EcError<SlaveScannerError> {
    fn from(err: SlaveScannerError) -> Self {
        Self::TaskSpecific(err)
    }
}

impl fmt::Display for SlaveScannerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sii(err) => fmt::Display::fmt(err, f),
            Self::SiiRead => write!(f, "failed to read SII"),
            Self::MalformedSii => write!(f, "failed to analyze SII category data"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Error(EcError<SlaveScannerError>),
    Idle,
    Start,
    Address,
    AlState,
    Base,
    DataLink,
    SiiSize,
    SiiData,
    End,
}

/// Reads everything the master needs to know about one slave after a bus
/// scan: station address, AL state, FMMU/sync manager counts, port status
/// and the SII contents.
#[derive(Debug, Clone, Copy)]
pub struct SlaveScanner {
    state: State,
    retries: u8,
    sii: SiiTask,
    sii_offset: u16,
    sii_words: u16,
}

impl Default for SlaveScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl SlaveScanner {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            retries: FSM_RETRIES,
            sii: SiiTask::new(),
            sii_offset: 0,
            sii_words: 0,
        }
    }

    pub fn start(&mut self) {
        self.state = State::Start;
    }

    pub fn is_running(&self) -> bool {
        !matches!(self.state, State::Idle | State::End | State::Error(_))
    }

    pub fn success(&self) -> bool {
        self.state == State::End
    }

    pub fn error(&self) -> Option<EcError<SlaveScannerError>> {
        match self.state {
            State::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn exec(&mut self, slave: &mut Slave, datagram: &mut Datagram) -> bool {
        if datagram.is_pending() {
            return self.is_running();
        }
        match self.state {
            State::Idle | State::End | State::Error(_) => {}
            State::Start => self.state_start(slave, datagram),
            State::Address => self.state_address(slave, datagram),
            State::AlState => self.state_al_state(slave, datagram),
            State::Base => self.state_base(slave, datagram),
            State::DataLink => self.state_data_link(slave, datagram),
            State::SiiSize => self.state_sii_size(slave, datagram),
            State::SiiData => self.state_sii_data(slave, datagram),
        }
        self.is_running()
    }

    fn fail(&mut self, slave: &mut Slave, err: EcError<SlaveScannerError>) {
        slave.error_flag = true;
        self.state = State::Error(err);
    }

    fn check_reply(&mut self, slave: &mut Slave, datagram: &mut Datagram, what: &str) -> bool {
        if datagram.retry(&mut self.retries) {
            return false;
        }
        if let Err(err) = datagram.check_wkc(1) {
            error!(
                "Failed to {} of slave {}: {}",
                what,
                slave.ring_position,
                datagram.wc_error(1)
            );
            self.fail(slave, err);
            return false;
        }
        true
    }

    fn state_start(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        let mut address = FixedStationAddress(datagram.apwr(
            slave.ring_position,
            FixedStationAddress::ADDRESS,
            FixedStationAddress::SIZE,
        ));
        address.set_configured_station_address(slave.station_address);
        self.retries = FSM_RETRIES;
        self.state = State::Address;
    }

    fn state_address(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        if !self.check_reply(slave, datagram, "write station address") {
            return;
        }
        datagram.fprd(slave.station_address, AlStatus::ADDRESS, AlStatus::SIZE);
        self.retries = FSM_RETRIES;
        self.state = State::AlState;
    }

    fn state_al_state(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        if !self.check_reply(slave, datagram, "read AL state") {
            return;
        }
        slave.current_state = SlaveState(AlStatus(datagram.data()).raw_state());
        if slave.current_state.ack_err() {
            warn!(
                "Slave {} has state error bit set ({})!",
                slave.ring_position, slave.current_state
            );
        }
        datagram.fprd(
            slave.station_address,
            DlInformation::ADDRESS,
            DlInformation::SIZE,
        );
        self.retries = FSM_RETRIES;
        self.state = State::Base;
    }

    fn state_base(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        if !self.check_reply(slave, datagram, "read base data") {
            return;
        }
        let info = DlInformation(datagram.data());
        slave.base_fmmu_count = info.number_of_supported_fmmu_entities();
        if slave.base_fmmu_count as usize > MAX_FMMUS {
            warn!(
                "Slave {} has more FMMUs ({}) than the master can handle ({}).",
                slave.ring_position, slave.base_fmmu_count, MAX_FMMUS
            );
            slave.base_fmmu_count = MAX_FMMUS as u8;
        }
        slave.base_sync_count = info.number_of_supported_sm_channels();
        if slave.base_sync_count as usize > MAX_SYNC_MANAGERS {
            warn!(
                "Slave {} provides more sync managers ({}) than the master can handle ({}).",
                slave.ring_position, slave.base_sync_count, MAX_SYNC_MANAGERS
            );
            slave.base_sync_count = MAX_SYNC_MANAGERS as u8;
        }
        datagram.fprd(slave.station_address, DlStatus::ADDRESS, DlStatus::SIZE);
        self.retries = FSM_RETRIES;
        self.state = State::DataLink;
    }

    fn state_data_link(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        if !self.check_reply(slave, datagram, "read DL status") {
            return;
        }
        let status = DlStatus(datagram.data());
        for (i, port) in slave.ports.iter_mut().enumerate() {
            *port = PortStatus {
                link_up: status.link(i),
                loop_closed: status.loop_closed(i),
                signal_detected: status.signal_detected(i),
            };
        }

        self.sii_offset = FIRST_CATEGORY_OFFSET;
        self.sii
            .start_reading(SiiAddressing::Station, self.sii_offset);
        self.state = State::SiiSize;
        self.sii.exec(slave, datagram);
    }

    fn sii_failed(&mut self, slave: &mut Slave, what: &str) {
        error!("Failed to {} of slave {}.", what, slave.ring_position);
        let err = match self.sii.error() {
            Some(EcError::TaskSpecific(err)) => SlaveScannerError::Sii(err).into(),
            Some(EcError::LostPacket) => EcError::LostPacket,
            Some(EcError::UnexpectedWkc(wkc)) => EcError::UnexpectedWkc(wkc),
            Some(EcError::Datagram(state)) => EcError::Datagram(state),
            None => SlaveScannerError::SiiRead.into(),
        };
        self.fail(slave, err);
    }

    fn state_sii_size(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        if self.sii.exec(slave, datagram) {
            return;
        }
        if !self.sii.success() {
            return self.sii_failed(slave, "read SII size");
        }

        let (category_type, category_size) = self.sii.words();
        if category_type != CATEGORY_END {
            let next_offset = 2 + self.sii_offset as u32 + category_size as u32;
            if next_offset < MAX_SII_SIZE {
                self.sii_offset = next_offset as u16;
                self.sii
                    .start_reading(SiiAddressing::Station, self.sii_offset);
                self.sii.exec(slave, datagram);
                return;
            }
            warn!(
                "SII size of slave {} exceeds {} words (0xffff limiter missing?).",
                slave.ring_position, MAX_SII_SIZE
            );
            self.sii_words = FIRST_CATEGORY_OFFSET;
        } else {
            self.sii_words = self.sii_offset + 1;
        }

        slave.sii_image = vec![0; self.sii_words as usize];
        self.sii_offset = 0;
        self.sii
            .start_reading(SiiAddressing::Station, self.sii_offset);
        self.state = State::SiiData;
        self.sii.exec(slave, datagram);
    }

    fn state_sii_data(&mut self, slave: &mut Slave, datagram: &mut Datagram) {
        if self.sii.exec(slave, datagram) {
            return;
        }
        if !self.sii.success() {
            return self.sii_failed(slave, "fetch SII contents");
        }

        let offset = self.sii_offset as usize;
        let (first, second) = self.sii.words();
        slave.sii_image[offset] = first;
        if let Some(word) = slave.sii_image.get_mut(offset + 1) {
            *word = second;
        }

        if self.sii_offset + 2 < self.sii_words {
            self.sii_offset += 2;
            self.sii
                .start_reading(SiiAddressing::Station, self.sii_offset);
            self.sii.exec(slave, datagram);
            return;
        }

        match evaluate_sii(&slave.sii_image) {
            Ok((identity, sii)) => {
                slave.identity = identity;
                slave.sii = sii;
                info!(
                    "Slave {}: vendor 0x{:08X}, product 0x{:08X}, {} sync managers, {} FMMUs.",
                    slave.ring_position,
                    slave.identity.vendor_id,
                    slave.identity.product_code,
                    slave.sii.syncs.len(),
                    slave.base_fmmu_count
                );
                self.state = State::End;
            }
            Err(reason) => {
                error!(
                    "Failed to analyze category data of slave {}: {}.",
                    slave.ring_position, reason
                );
                self.fail(slave, SlaveScannerError::MalformedSii.into());
            }
        }
    }
}

fn word(image: &[u16], address: u16) -> u16 {
    image.get(address as usize).copied().unwrap_or(0)
}

fn dword(image: &[u16], address: u16) -> u32 {
    word(image, address) as u32 | (word(image, address + 1) as u32) << 16
}

fn byte(data: &[u16], index: usize) -> u8 {
    data[index / 2].to_le_bytes()[index % 2]
}

fn evaluate_sii(image: &[u16]) -> Result<(SlaveIdentity, SiiInfo), &'static str> {
    let identity = SlaveIdentity {
        alias: word(image, 0x0004),
        vendor_id: dword(image, 0x0008),
        product_code: dword(image, 0x000A),
        revision_number: dword(image, 0x000C),
        serial_number: dword(image, 0x000E),
    };
    let mut sii = SiiInfo {
        boot_rx_mailbox_offset: word(image, 0x0014),
        boot_rx_mailbox_size: word(image, 0x0015),
        boot_tx_mailbox_offset: word(image, 0x0016),
        boot_tx_mailbox_size: word(image, 0x0017),
        std_rx_mailbox_offset: word(image, 0x0018),
        std_rx_mailbox_size: word(image, 0x0019),
        std_tx_mailbox_offset: word(image, 0x001A),
        std_tx_mailbox_size: word(image, 0x001B),
        mailbox_protocols: MailboxProtocols(word(image, 0x001C)),
        ..SiiInfo::default()
    };

    let words = image.len();
    let mut position = FIRST_CATEGORY_OFFSET as usize;
    if words <= position {
        // no category data
        return Ok((identity, sii));
    }
    while image[position] != CATEGORY_END {
        if position + 2 > words {
            return Err("category header incomplete");
        }
        let category_type = image[position] & 0x7FFF;
        let size = image[position + 1] as usize;
        position += 2;
        if position + size > words {
            return Err("category data incomplete");
        }
        let data = &image[position..position + size];
        match category_type {
            CATEGORY_GENERAL => {
                if size * 2 != 32 {
                    return Err("wrong size of general category");
                }
                sii.coe_details = byte(data, 5);
            }
            CATEGORY_SYNC_MANAGER => {
                if (size * 2) % 8 != 0 {
                    return Err("invalid sync manager category size");
                }
                for entry in data.chunks_exact(4) {
                    let sync = SyncManagerInfo {
                        physical_start_address: entry[0],
                        default_length: entry[1],
                        control: byte(entry, 4),
                        enable: byte(entry, 6),
                    };
                    if sii.syncs.push(sync).is_err() {
                        return Err("exceeded maximum number of sync managers");
                    }
                }
            }
            other => debug!("Skipping SII category 0x{:04X}.", other),
        }
        position += size;
        if position >= words {
            return Err("next category header missing");
        }
    }
    Ok((identity, sii))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cyclic_task::test_util::settle;
    use crate::frame::CommandType;
    use alloc::vec::Vec;

    fn sii_image(general_size: u16) -> Vec<u16> {
        let mut image = vec![0u16; FIRST_CATEGORY_OFFSET as usize];
        image[0x04] = 0x0007;
        image[0x08] = 0x0002;
        image[0x0A] = 0x03EC;
        image[0x0B] = 0x0C4E;
        image[0x18] = 0x1000;
        image[0x19] = 0x0080;
        image[0x1A] = 0x1080;
        image[0x1B] = 0x0080;
        image[0x1C] = MailboxProtocols::COE;

        image.extend_from_slice(&[CATEGORY_GENERAL, general_size]);
        let mut general = vec![0u16; general_size as usize];
        if let Some(word) = general.get_mut(2) {
            // byte 5: CoE details
            *word = 0x0300;
        }
        image.extend_from_slice(&general);

        image.extend_from_slice(&[CATEGORY_SYNC_MANAGER, 8]);
        image.extend_from_slice(&[0x1000, 0x0080, 0x0026, 0x0001]);
        image.extend_from_slice(&[0x1080, 0x0080, 0x0022, 0x0001]);
        image.push(CATEGORY_END);
        image
    }

    /// Answers every datagram the scanner sends like a single slave would.
    fn run(scanner: &mut SlaveScanner, slave: &mut Slave, image: &[u16], wkc: u16) {
        let mut datagram = Datagram::new();
        let mut sii_address = 0u16;
        let mut now = 0;
        scanner.start();
        while scanner.exec(slave, &mut datagram) {
            now += 1;
            match (datagram.command(), datagram.address().offset()) {
                (CommandType::APWR, Some(0x0010)) => settle(&mut datagram, wkc, None, now),
                (CommandType::FPRD, Some(0x0130)) => {
                    settle(&mut datagram, 1, Some(&[0x01, 0x00]), now)
                }
                (CommandType::FPRD, Some(0x0000)) => {
                    settle(&mut datagram, 1, Some(&[0x11, 0x00, 0x00, 0x00, 0x08, 0x08]), now)
                }
                (CommandType::FPRD, Some(0x0110)) => {
                    settle(&mut datagram, 1, Some(&[0x10, 0x02]), now)
                }
                (CommandType::FPWR, Some(0x0502)) => {
                    let data = datagram.data();
                    sii_address = u16::from_le_bytes([data[2], data[3]]);
                    settle(&mut datagram, 1, None, now);
                }
                (CommandType::FPRD, Some(0x0502)) => {
                    let first = word(image, sii_address).to_le_bytes();
                    let second = word(image, sii_address + 1).to_le_bytes();
                    let reply = [
                        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, first[0], first[1], second[0],
                        second[1],
                    ];
                    settle(&mut datagram, 1, Some(&reply), now);
                }
                other => panic!("unexpected datagram {:?}", other),
            }
        }
    }

    #[test]
    fn scan_reads_identity_and_sync_managers() {
        let image = sii_image(16);
        let mut slave = Slave::new(1, 2);
        let mut scanner = SlaveScanner::new();
        run(&mut scanner, &mut slave, &image, 1);

        assert!(scanner.success());
        assert!(!slave.error_flag());
        assert_eq!(slave.current_state(), SlaveState(0x01));
        assert_eq!(slave.base_fmmu_count(), 8);
        assert_eq!(slave.base_sync_count(), 8);
        assert!(slave.ports()[0].link_up);
        assert!(slave.ports()[0].signal_detected);
        assert!(!slave.ports()[1].link_up);
        assert_eq!(slave.sii_image(), &image[..]);

        let identity = slave.identity();
        assert_eq!(identity.alias, 7);
        assert_eq!(identity.vendor_id, 0x0000_0002);
        assert_eq!(identity.product_code, 0x0C4E_03EC);

        let sii = slave.sii();
        assert!(sii.mailbox_protocols.contains(MailboxProtocols::COE));
        assert_eq!(sii.std_tx_mailbox_offset, 0x1080);
        assert!(sii.enable_sdo_info());
        assert_eq!(sii.syncs.len(), 2);
        assert_eq!(
            sii.sync(1),
            Some(&SyncManagerInfo {
                physical_start_address: 0x1080,
                default_length: 0x80,
                control: 0x22,
                enable: 1,
            })
        );
    }

    #[test]
    fn malformed_general_category_fails() {
        let image = sii_image(12);
        let mut slave = Slave::new(0, 1);
        let mut scanner = SlaveScanner::new();
        run(&mut scanner, &mut slave, &image, 1);

        assert_eq!(
            scanner.error(),
            Some(EcError::TaskSpecific(SlaveScannerError::MalformedSii))
        );
        assert!(slave.error_flag());
    }

    #[test]
    fn missing_slave_fails_at_the_station_address() {
        let mut slave = Slave::new(3, 4);
        let mut scanner = SlaveScanner::new();
        run(&mut scanner, &mut slave, &[], 0);

        assert_eq!(scanner.error(), Some(EcError::UnexpectedWkc(0)));
        assert!(slave.error_flag());
    }

    #[test]
    fn image_without_categories() {
        let mut image = vec![0u16; FIRST_CATEGORY_OFFSET as usize];
        image[0x08] = 0x0002;
        image.push(CATEGORY_END);
        let (identity, sii) = evaluate_sii(&image).unwrap();
        assert_eq!(identity.vendor_id, 2);
        assert!(sii.syncs.is_empty());
        assert!(sii.mailbox_protocols.is_empty());
    }
}

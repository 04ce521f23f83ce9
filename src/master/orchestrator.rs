use super::{
    EtherCatMaster, RegisterDirection, RequestId, RequestState, SdoDirection,
};
use crate::cyclic_task::tasks::{BusHooks, CoeHandler, PdoConfigurator};
use crate::cyclic_task::DatagramState;
use crate::register::{AlStatus, DcReceiveTime, FixedStationAddress};
use crate::slave_network::{AlState, MailboxProtocols, Slave, SlaveState, SlaveStates};
use log::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum MasterState {
    Start,
    Broadcast,
    ClearAddresses,
    MeasureDelays,
    ScanSlave,
    ReadState,
    Acknowledge,
    ConfigureSlave,
    Idle,
    SdoRequest(RequestId),
    SdoDictionary,
    SiiWrite(RequestId),
    RegisterRequest(RequestId),
}

impl<C, P, H> EtherCatMaster<C, P, H>
where
    C: CoeHandler,
    P: PdoConfigurator,
    H: BusHooks,
{
    pub(super) fn step(&mut self) {
        match self.state {
            MasterState::Start => self.state_start(),
            MasterState::Broadcast => self.state_broadcast(),
            MasterState::ClearAddresses => self.state_clear_addresses(),
            MasterState::MeasureDelays => self.state_measure_delays(),
            MasterState::ScanSlave => self.state_scan_slave(),
            MasterState::ReadState => self.state_read_state(),
            MasterState::Acknowledge => self.state_acknowledge(),
            MasterState::ConfigureSlave => self.state_configure_slave(),
            MasterState::Idle => self.state_idle(),
            MasterState::SdoRequest(id) => self.state_sdo_request(id),
            MasterState::SdoDictionary => self.state_sdo_dictionary(),
            MasterState::SiiWrite(id) => self.state_sii_write(id),
            MasterState::RegisterRequest(id) => self.state_register_request(id),
        }
    }

    fn enter_start(&mut self) {
        self.state = MasterState::Start;
        self.state_start();
    }

    fn state_start(&mut self) {
        self.datagram.brd(AlStatus::ADDRESS, AlStatus::SIZE);
        self.state = MasterState::Broadcast;
    }

    fn state_broadcast(&mut self) {
        match self.datagram.state() {
            DatagramState::Received => {}
            DatagramState::TimedOut => {
                // the broadcast is retried forever
                self.datagram.resend();
                return;
            }
            DatagramState::LinkDown => {
                self.link_down();
                return self.enter_start();
            }
            state => {
                warn!("State broadcast failed ({:?}), sending it again.", state);
                self.datagram.resend();
                return;
            }
        }

        let responding = self.datagram.working_counter();
        if responding != self.slaves_responding {
            self.topology_change_pending = true;
            self.slaves_responding = responding;
            info!("{} slave(s) responding.", responding);
        }

        let states = SlaveStates(AlStatus(self.datagram.data()).raw_state());
        if states != self.slave_states {
            self.slave_states = states;
            info!("Slave states: {}.", states);
        }

        if self.topology_change_pending && self.gates.scan.try_enter() {
            return self.start_scan();
        }
        self.enter_read_states();
    }

    fn link_down(&mut self) {
        if self.slaves_responding != 0 || !self.slaves.is_empty() {
            warn!(
                "Link down, dropping {} slave(s) ({:?}).",
                self.slaves.len(),
                self.datagram.state()
            );
            self.hooks.eoe_detach_all();
        }
        self.slaves_responding = 0;
        self.slaves.clear();
    }

    fn start_scan(&mut self) {
        self.topology_change_pending = false;
        self.scan_state = RequestState::Busy;
        self.scan_error = false;
        self.scan_started = self.now;

        self.hooks.eoe_detach_all();
        self.slaves.clear();

        if self.slaves_responding == 0 {
            info!("No slaves on the bus.");
            return self.finish_scan();
        }

        self.slaves = (0..self.slaves_responding)
            .map(|position| Slave::new(position, position + 1))
            .collect();
        self.datagram
            .bwr(FixedStationAddress::ADDRESS, FixedStationAddress::SIZE);
        self.retries = self.config.retries;
        self.state = MasterState::ClearAddresses;
    }

    fn abort_scan(&mut self) {
        self.scan_state = RequestState::Failure;
        // try again with the next broadcast
        self.topology_change_pending = true;
        self.gates.scan.leave();
        self.enter_start();
    }

    fn finish_scan(&mut self) {
        for (&position, config) in self.configs.iter() {
            if let Some(slave) = self.slaves.get_mut(position as usize) {
                slave.config = Some(config.clone());
            }
        }
        self.hooks.compute_dc_topology(&self.slaves);

        info!(
            "Bus scanning completed in {} ms.",
            self.now.elapsed_since(self.scan_started).as_millis()
        );
        self.scan_state = if self.scan_error {
            RequestState::Failure
        } else {
            RequestState::Success
        };
        self.gates.scan.leave();
        self.enter_start();
    }

    fn state_clear_addresses(&mut self) {
        if self.datagram.retry(&mut self.retries) {
            return;
        }
        if let Err(err) = self.datagram.check_received::<()>() {
            error!("Failed to receive address clearing datagram: {:?}.", err);
            return self.abort_scan();
        }
        let cleared = self.datagram.working_counter();
        if cleared != self.slaves_responding {
            warn!(
                "Failed to clear all station addresses: Cleared {} of {}.",
                cleared, self.slaves_responding
            );
        }

        self.datagram
            .bwr(DcReceiveTime::ADDRESS, DcReceiveTime::SIZE);
        self.retries = self.config.retries;
        self.state = MasterState::MeasureDelays;
    }

    fn state_measure_delays(&mut self) {
        if self.datagram.retry(&mut self.retries) {
            return;
        }
        if let Err(err) = self.datagram.check_received::<()>() {
            error!("Failed to receive delay measuring datagram: {:?}.", err);
            return self.abort_scan();
        }
        let latched = self.datagram.working_counter();
        if latched != self.slaves_responding {
            warn!(
                "Failed to measure delays: {} of {} slaves latched.",
                latched, self.slaves_responding
            );
        }

        info!("Scanning bus.");
        self.slave_index = 0;
        self.scanner.start();
        self.state = MasterState::ScanSlave;
        self.state_scan_slave();
    }

    fn state_scan_slave(&mut self) {
        let slave = match self.slaves.get_mut(self.slave_index) {
            Some(slave) => slave,
            None => return self.abort_scan(),
        };
        if self.scanner.exec(slave, &mut self.datagram) {
            return;
        }

        if !self.scanner.success() {
            self.scan_error = true;
            if let Some(err) = self.scanner.error() {
                error!("Failed to scan slave {}: {}.", slave.ring_position, err);
            }
        } else if slave
            .sii
            .mailbox_protocols
            .contains(MailboxProtocols::EOE)
        {
            self.hooks.eoe_attach(slave);
        }

        self.slave_index += 1;
        if self.slave_index < self.slaves.len() {
            self.scanner.start();
            return self.state_scan_slave();
        }
        self.finish_scan();
    }

    fn enter_read_states(&mut self) {
        self.slave_index = 0;
        self.read_slave_state();
    }

    fn read_slave_state(&mut self) {
        match self.slaves.get(self.slave_index) {
            Some(slave) => {
                self.datagram
                    .fprd(slave.station_address, AlStatus::ADDRESS, AlStatus::SIZE);
                self.retries = self.config.retries;
                self.state = MasterState::ReadState;
            }
            None => self.enter_idle(),
        }
    }

    fn next_slave_state(&mut self) {
        self.slave_index += 1;
        self.read_slave_state();
    }

    fn state_read_state(&mut self) {
        if self.datagram.retry(&mut self.retries) {
            return;
        }
        let slave = match self.slaves.get_mut(self.slave_index) {
            Some(slave) => slave,
            None => return self.enter_start(),
        };

        if self.datagram.check_wkc::<()>(1).is_err() {
            if slave.online {
                warn!(
                    "Slave {} did not answer its state read: {}",
                    slave.ring_position,
                    self.datagram.wc_error(1)
                );
            }
            slave.online = false;
            self.topology_change_pending = true;
            return self.enter_start();
        }

        let state = SlaveState(AlStatus(self.datagram.data()).raw_state());
        if state != slave.current_state {
            debug!("Slave {}: state {}.", slave.ring_position, state);
            slave.current_state = state;
        }
        if !slave.online {
            info!("Slave {} is online again.", slave.ring_position);
            slave.online = true;
        }

        if state.ack_err() && !slave.error_flag {
            self.transfer.ack();
            self.state = MasterState::Acknowledge;
            return self.state_acknowledge();
        }

        if slave.needs_configuration() && !slave.error_flag && self.gates.config.try_enter() {
            if self.config_state != RequestState::Busy {
                self.config_state = RequestState::Busy;
                self.config_error = false;
            }
            self.configurator.start();
            self.state = MasterState::ConfigureSlave;
            return self.state_configure_slave();
        }
        self.next_slave_state();
    }

    fn state_acknowledge(&mut self) {
        let slave = match self.slaves.get_mut(self.slave_index) {
            Some(slave) => slave,
            None => return self.enter_start(),
        };
        if self.transfer.exec(slave, &mut self.datagram) {
            return;
        }
        if !self.transfer.success() {
            error!(
                "Failed to acknowledge state change on slave {}.",
                slave.ring_position
            );
        }
        self.next_slave_state();
    }

    fn state_configure_slave(&mut self) {
        let slave = match self.slaves.get_mut(self.slave_index) {
            Some(slave) => slave,
            None => {
                self.gates.config.leave();
                return self.enter_start();
            }
        };
        if self.configurator.exec(
            slave,
            &mut self.datagram,
            &mut self.coe,
            &mut self.pdo,
        ) {
            return;
        }
        self.gates.config.leave();

        if self.configurator.success() {
            info!("Slave {} is in {}.", slave.ring_position, slave.current_state);
        } else {
            self.config_error = true;
            if let Some(err) = self.configurator.error() {
                error!("Failed to configure slave {}: {}.", slave.ring_position, err);
            }
        }
        self.next_slave_state();
    }

    fn enter_idle(&mut self) {
        if self.config_state == RequestState::Busy {
            self.config_state = if self.config_error {
                RequestState::Failure
            } else {
                RequestState::Success
            };
        }
        self.state = MasterState::Idle;
        self.state_idle();
    }

    /// Starts exactly one piece of secondary work, or begins the next pass.
    fn state_idle(&mut self) {
        if self.start_sdo_request()
            || self.start_sdo_dictionary()
            || self.start_sii_write()
            || self.start_register_request()
        {
            return;
        }
        self.enter_start();
    }

    fn start_sdo_request(&mut self) -> bool {
        while let Some(request) = self.sdo_requests.next_queued() {
            let position = request.body.slave;
            let slave = match self.slaves.get(position as usize) {
                Some(slave)
                    if slave.online
                        && !slave.error_flag
                        && slave.al_state() != AlState::Init =>
                {
                    slave
                }
                _ => {
                    warn!(
                        "Discarding SDO request, slave {} is not available.",
                        position
                    );
                    request.state = RequestState::Failure;
                    continue;
                }
            };

            request.state = RequestState::Busy;
            let body = &request.body;
            match body.direction {
                SdoDirection::Upload => self.coe.start_upload(slave, body.index, body.subindex),
                SdoDirection::Download => {
                    self.coe
                        .start_download(slave, body.index, body.subindex, &body.data)
                }
            }
            debug!(
                "Processing SDO request 0x{:04X}:{:02X} for slave {}.",
                body.index, body.subindex, position
            );
            let id = request.id;
            self.slave_index = position as usize;
            self.state = MasterState::SdoRequest(id);
            self.state_sdo_request(id);
            return true;
        }
        false
    }

    fn state_sdo_request(&mut self, id: RequestId) {
        let slave = match self.slaves.get_mut(self.slave_index) {
            Some(slave) => slave,
            None => return self.finish_request(id, false),
        };
        if self.coe.exec(slave, &mut self.datagram) {
            return;
        }

        let success = self.coe.success();
        if let Some(request) = self.sdo_requests.get_mut(id) {
            if success && request.body.direction == SdoDirection::Upload {
                request.body.data = self.coe.upload_data().to_vec();
            }
        }
        if !success {
            debug!("Failed to process SDO request for slave {}.", slave.ring_position);
        }
        self.finish_request(id, success);
    }

    fn finish_request(&mut self, id: RequestId, success: bool) {
        let state = if success {
            RequestState::Success
        } else {
            RequestState::Failure
        };
        match self.state {
            MasterState::SdoRequest(_) => self.sdo_requests.set_state(id, state),
            MasterState::SiiWrite(_) => self.sii_requests.set_state(id, state),
            MasterState::RegisterRequest(_) => self.register_requests.set_state(id, state),
            _ => {}
        }
        self.enter_start();
    }

    fn start_sdo_dictionary(&mut self) -> bool {
        if !self.config.fetch_sdo_dictionary {
            return false;
        }
        let now = self.now;
        let delay = self.config.sdo_dictionary_delay;
        let position = self.slaves.iter().position(|slave| {
            slave.sii.mailbox_protocols.contains(MailboxProtocols::COE)
                && slave.sii.enable_sdo_info()
                && !slave.sdo_dictionary_fetched
                && slave.al_state() != AlState::Init
                && slave
                    .preop_time
                    .map_or(false, |preop| now.elapsed_since(preop) >= delay)
                && slave.online
                && !slave.error_flag
        });
        let position = match position {
            Some(position) => position,
            None => return false,
        };

        let slave = &mut self.slaves[position];
        slave.sdo_dictionary_fetched = true;
        debug!("Fetching SDO dictionary of slave {}.", position);
        self.coe.start_dictionary(slave);
        self.slave_index = position;
        self.state = MasterState::SdoDictionary;
        self.state_sdo_dictionary();
        true
    }

    fn state_sdo_dictionary(&mut self) {
        let slave = match self.slaves.get_mut(self.slave_index) {
            Some(slave) => slave,
            None => return self.enter_start(),
        };
        if self.coe.exec(slave, &mut self.datagram) {
            return;
        }
        if self.coe.success() {
            debug!("Fetched SDO dictionary of slave {}.", slave.ring_position);
        } else {
            warn!(
                "Failed to fetch SDO dictionary of slave {}.",
                slave.ring_position
            );
        }
        self.enter_start();
    }

    fn start_sii_write(&mut self) -> bool {
        while let Some(request) = self.sii_requests.next_queued() {
            let position = request.body.slave;
            match self.slaves.get(position as usize) {
                Some(slave) if slave.online => {}
                _ => {
                    warn!(
                        "Discarding SII write request, slave {} is not available.",
                        position
                    );
                    request.state = RequestState::Failure;
                    continue;
                }
            }
            let first = match request.body.words.first() {
                Some(&word) => word,
                None => {
                    request.state = RequestState::Success;
                    continue;
                }
            };

            request.state = RequestState::Busy;
            info!(
                "Writing {} SII word(s) to slave {}.",
                request.body.words.len(),
                position
            );
            self.sii.start_writing(request.body.word_offset, first);
            self.sii_word_index = 0;
            let id = request.id;
            self.slave_index = position as usize;
            self.state = MasterState::SiiWrite(id);
            self.state_sii_write(id);
            return true;
        }
        false
    }

    fn state_sii_write(&mut self, id: RequestId) {
        let slave = match self.slaves.get_mut(self.slave_index) {
            Some(slave) => slave,
            None => return self.finish_request(id, false),
        };
        if self.sii.exec(slave, &mut self.datagram) {
            return;
        }
        if !self.sii.success() {
            slave.error_flag = true;
            if let Some(err) = self.sii.error() {
                error!("Failed to write SII data to slave {}: {}.", slave.ring_position, err);
            }
            return self.finish_request(id, false);
        }

        let request = match self.sii_requests.get_mut(id) {
            Some(request) => request,
            None => return self.enter_start(),
        };
        let written = self.sii_word_index;
        let word_address = request.body.word_offset as usize + written;
        if let (Some(image), Some(&word)) = (
            slave.sii_image.get_mut(word_address),
            request.body.words.get(written),
        ) {
            *image = word;
        }

        self.sii_word_index += 1;
        if let Some(&next) = request.body.words.get(self.sii_word_index) {
            let address = request.body.word_offset + self.sii_word_index as u16;
            self.sii.start_writing(address, next);
            self.sii.exec(slave, &mut self.datagram);
            return;
        }
        debug!(
            "Finished writing {} SII word(s) to slave {}.",
            request.body.words.len(),
            slave.ring_position
        );
        self.finish_request(id, true);
    }

    fn start_register_request(&mut self) -> bool {
        while let Some(request) = self.register_requests.next_queued() {
            let position = request.body.slave;
            let station_address = match self.slaves.get(position as usize) {
                Some(slave) if slave.online => slave.station_address,
                _ => {
                    warn!(
                        "Discarding register request, slave {} is not available.",
                        position
                    );
                    request.state = RequestState::Failure;
                    continue;
                }
            };

            request.state = RequestState::Busy;
            let body = &request.body;
            match body.direction {
                RegisterDirection::Read => {
                    self.datagram
                        .fprd(station_address, body.address, body.data.len());
                }
                RegisterDirection::Write => {
                    self.datagram
                        .fpwr(station_address, body.address, body.data.len())
                        .copy_from_slice(&body.data);
                }
            }
            self.retries = self.config.retries;
            self.slave_index = position as usize;
            self.state = MasterState::RegisterRequest(request.id);
            return true;
        }
        false
    }

    fn state_register_request(&mut self, id: RequestId) {
        if self.datagram.retry(&mut self.retries) {
            return;
        }
        let success = self.datagram.check_wkc::<()>(1).is_ok();
        if success {
            if let Some(request) = self.register_requests.get_mut(id) {
                if request.body.direction == RegisterDirection::Read {
                    request.body.data = self.datagram.data().to_vec();
                }
            }
        } else {
            warn!(
                "Register request for slave {} failed: {}",
                self.slave_index,
                self.datagram.wc_error(1)
            );
        }
        self.finish_request(id, success);
    }
}

#[cfg(test)]
mod tests {
    use super::super::{EtherCatMaster, MasterConfig, RequestError, RequestState};
    use crate::cyclic_task::test_util::{lose, settle};
    use crate::cyclic_task::{DatagramState, EtherCatSystemTime};
    use crate::frame::CommandType;
    use crate::slave_network::AlState;

    fn master() -> EtherCatMaster {
        EtherCatMaster::new(MasterConfig::default())
    }

    fn tick(master: &mut EtherCatMaster, at_ms: u64) {
        master.exec(EtherCatSystemTime::from_millis(at_ms));
    }

    fn is_state_broadcast(master: &EtherCatMaster) -> bool {
        master.datagram().command() == CommandType::BRD
            && master.datagram().address().offset() == Some(0x0130)
    }

    #[test]
    fn empty_bus_keeps_broadcasting() {
        let mut master = master();
        tick(&mut master, 0);
        assert!(is_state_broadcast(&master));
        settle(master.datagram_mut(), 0, None, 1);
        tick(&mut master, 1);
        // nothing changed, straight back to the next broadcast
        assert!(is_state_broadcast(&master));
        assert_eq!(master.datagram().state(), DatagramState::Init);
        assert_eq!(master.slaves_responding(), 0);
        assert!(!master.topology_change_pending());
    }

    #[test]
    fn timed_out_broadcast_is_resent() {
        let mut master = master();
        tick(&mut master, 0);
        for at in 1..10 {
            lose(master.datagram_mut(), at);
            tick(&mut master, at);
            assert!(is_state_broadcast(&master));
            assert_eq!(master.datagram().state(), DatagramState::Init);
        }
    }

    #[test]
    fn mismatched_broadcast_reply_is_resent() {
        let mut master = master();
        master.gates().scan.deny();
        tick(&mut master, 0);
        settle(master.datagram_mut(), 2, Some(&[0x02, 0x00]), 1);
        tick(&mut master, 1);
        assert_eq!(master.slaves_responding(), 2);
        assert!(is_state_broadcast(&master));

        assert!(master.datagram_mut().queue());
        let now = EtherCatSystemTime::from_millis(2);
        master.datagram_mut().mark_sent(0, now);
        assert!(master
            .datagram_mut()
            .receive(CommandType::BRD, 0, &[0x02], 2, now)
            .is_err());
        tick(&mut master, 2);
        // a link loss would have forgotten the responding slaves
        assert_eq!(master.slaves_responding(), 2);
        assert!(master.topology_change_pending());
        assert!(is_state_broadcast(&master));
        assert_eq!(master.datagram().state(), DatagramState::Init);
    }

    #[test]
    fn changed_slave_count_starts_a_scan() {
        let mut master = master();
        tick(&mut master, 0);
        settle(master.datagram_mut(), 3, Some(&[0x01, 0x00]), 1);
        tick(&mut master, 1);

        assert_eq!(master.slaves_responding(), 3);
        assert!(!master.topology_change_pending());
        assert_eq!(master.scan_state(), RequestState::Busy);
        assert!(master.gates().scan.is_busy());
        assert_eq!(master.slaves().len(), 3);
        assert_eq!(master.slave(2).unwrap().station_address(), 3);
        assert_eq!(master.datagram().command(), CommandType::BWR);
        assert_eq!(master.datagram().address().offset(), Some(0x0010));
        assert_eq!(master.datagram().data(), &[0, 0]);

        settle(master.datagram_mut(), 3, None, 2);
        tick(&mut master, 2);
        assert_eq!(master.datagram().command(), CommandType::BWR);
        assert_eq!(master.datagram().address().offset(), Some(0x0900));
        assert_eq!(master.datagram().len(), 4);

        settle(master.datagram_mut(), 3, None, 3);
        tick(&mut master, 3);
        // the first slave gets its station address
        assert_eq!(master.datagram().command(), CommandType::APWR);
        assert_eq!(master.datagram().data(), &[0x01, 0x00]);
    }

    #[test]
    fn denied_scan_keeps_topology_change_pending() {
        let mut master = master();
        master.gates().scan.deny();
        tick(&mut master, 0);
        settle(master.datagram_mut(), 2, Some(&[0x01, 0x00]), 1);
        tick(&mut master, 1);

        assert!(master.topology_change_pending());
        assert!(master.slaves().is_empty());
        assert_eq!(master.scan_state(), RequestState::Queued);
        // no slaves known, so the pass ends at once and broadcasts again
        assert!(is_state_broadcast(&master));

        master.gates().scan.allow();
        settle(master.datagram_mut(), 2, Some(&[0x01, 0x00]), 2);
        tick(&mut master, 2);
        assert_eq!(master.scan_state(), RequestState::Busy);
        assert_eq!(master.slaves().len(), 2);
    }

    #[test]
    fn link_down_forgets_all_slaves() {
        let mut master = master();
        tick(&mut master, 0);
        settle(master.datagram_mut(), 1, Some(&[0x01, 0x00]), 1);
        tick(&mut master, 1);
        assert_eq!(master.slaves().len(), 1);

        // address clearing succeeds, then the link goes away
        settle(master.datagram_mut(), 1, None, 2);
        tick(&mut master, 2);
        settle(master.datagram_mut(), 1, None, 3);
        tick(&mut master, 3);

        // let the scan of the single slave fail quickly
        for at in 4..20 {
            if is_state_broadcast(&master) {
                break;
            }
            settle(master.datagram_mut(), 0, None, at);
            tick(&mut master, at);
        }
        assert!(is_state_broadcast(&master));
        assert_eq!(master.scan_state(), RequestState::Failure);
        assert!(master.slave(0).unwrap().error_flag());

        assert!(master.datagram_mut().queue());
        master.datagram_mut().link_down();
        tick(&mut master, 30);
        assert!(master.slaves().is_empty());
        assert_eq!(master.slaves_responding(), 0);
        assert!(is_state_broadcast(&master));
    }

    #[test]
    fn requests_to_unknown_slaves() {
        let mut master = master();
        assert_eq!(
            master.request_state(4, AlState::Operational),
            Err(RequestError::UnknownSlave(4))
        );
        assert_eq!(
            master.request_state(0, AlState::InvalidOrMixed),
            Err(RequestError::InvalidState)
        );
        assert_eq!(master.clear_error(0), Err(RequestError::UnknownSlave(0)));
        assert!(matches!(
            master.write_register(0, 0x0f00, &[0u8; 1500]),
            Err(RequestError::TooLarge { size: 1500, .. })
        ));
        assert!(matches!(
            master.write_sii(0, 0xfffe, &[1, 2, 3]),
            Err(RequestError::TooLarge { size: 6, max: 4 })
        ));

        let id = master.read_register(7, 0x0130, 2).unwrap();
        assert_eq!(master.register_state(id), Some(RequestState::Queued));

        // first pass on an empty bus ends in idle, where the request is discarded
        tick(&mut master, 0);
        settle(master.datagram_mut(), 0, None, 1);
        tick(&mut master, 1);
        assert_eq!(master.register_state(id), Some(RequestState::Failure));
        assert!(master.take_register(id).is_some());
        assert!(master.take_register(id).is_none());
    }
}

mod common;

use common::*;
use ethercat_master_fsm::cyclic_task::tasks::NoPdoConfig;
use ethercat_master_fsm::cyclic_task::DatagramAddress;
use ethercat_master_fsm::master::{RegisterDirection, RequestError, RequestState, SdoDirection};
use ethercat_master_fsm::{EtherCatMaster, MasterConfig};

fn io_master() -> (EtherCatMaster, SimulatedBus, Clock) {
    init_logger();
    let mut master = EtherCatMaster::new(MasterConfig::default());
    let mut bus = SimulatedBus::new(vec![SimSlave::io()]);
    let mut clock = Clock::default();
    assert!(clock.run_until(&mut master, &mut bus, 3000, |m, _| settled(m, 1)));
    (master, bus, clock)
}

fn coe_master(config: MasterConfig) -> (EtherCatMaster<ScriptedCoe>, SimulatedBus, Clock) {
    init_logger();
    let coe = ScriptedCoe {
        upload_value: vec![0x34, 0x12],
        ..ScriptedCoe::default()
    };
    let master = EtherCatMaster::with_handlers(config, coe, NoPdoConfig, ());
    (master, SimulatedBus::new(vec![SimSlave::coe()]), Clock::default())
}

fn no_dictionary() -> MasterConfig {
    MasterConfig {
        fetch_sdo_dictionary: false,
        ..MasterConfig::default()
    }
}

#[test]
fn register_requests_are_served_in_order() {
    let (mut master, mut bus, mut clock) = io_master();

    let write = master.write_register(0, 0x0F80, &[0xAA, 0x55]).unwrap();
    let read = master.read_register(0, 0x0F80, 2).unwrap();
    assert!(clock.run_until(&mut master, &mut bus, 100, |m, _| {
        m.register_state(read).map_or(false, |state| state.is_finished())
    }));
    assert_eq!(master.register_state(write), Some(RequestState::Success));
    assert_eq!(&bus.slaves[0].memory[0x0F80..0x0F82], &[0xAA, 0x55]);

    let request = master.take_register(read).unwrap();
    assert_eq!(request.state(), RequestState::Success);
    assert_eq!(request.body.direction, RegisterDirection::Read);
    assert_eq!(request.body.data, vec![0xAA, 0x55]);

    let writes: Vec<_> = bus.writes_to(0x0F80).collect();
    assert_eq!(writes.len(), 1);
    let reads = bus.log.iter().position(|r| r.is_read_of(0x0F80)).unwrap();
    assert!(bus.log.iter().position(|r| r.is_write_to(0x0F80)).unwrap() < reads);
}

#[test]
fn register_request_for_missing_slave_is_discarded() {
    let (mut master, mut bus, mut clock) = io_master();

    let id = master.read_register(3, 0x0130, 2).unwrap();
    assert!(clock.run_until(&mut master, &mut bus, 100, |m, _| {
        m.register_state(id) == Some(RequestState::Failure)
    }));
    // station 4 would be the fourth slave, nothing was sent there
    assert!(bus.log.iter().all(|record| !matches!(
        record.address,
        DatagramAddress::Station {
            station_address: 4,
            ..
        }
    )));
}

#[test]
fn sii_write_reaches_slave_and_image() {
    let (mut master, mut bus, mut clock) = io_master();

    let id = master.write_sii(0, 0x0004, &[0x1234, 0x5678]).unwrap();
    assert!(clock.run_until(&mut master, &mut bus, 200, |m, _| {
        m.sii_write_state(id).map_or(false, |state| state.is_finished())
    }));
    assert_eq!(master.sii_write_state(id), Some(RequestState::Success));
    assert_eq!(&bus.slaves[0].sii[0x04..0x06], &[0x1234, 0x5678]);
    assert_eq!(&master.slave(0).unwrap().sii_image()[0x04..0x06], &[0x1234, 0x5678]);

    let requests: Vec<_> = bus
        .writes_to(0x0502)
        .filter(|record| record.data.len() == 8)
        .collect();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[1].data,
        vec![0x01, 0x02, 0x05, 0x00, 0x00, 0x00, 0x78, 0x56]
    );

    let request = master.take_sii_write(id).unwrap();
    assert_eq!(request.body.words, vec![0x1234, 0x5678]);
    assert!(!master.slave(0).unwrap().error_flag());
}

#[test]
fn rejected_sii_write_flags_the_slave() {
    let (mut master, mut bus, mut clock) = io_master();
    bus.slaves[0].sii_write_protected = true;
    let before = master.slave(0).unwrap().sii_image().to_vec();

    let id = master.write_sii(0, 0x0004, &[0x1234]).unwrap();
    assert!(clock.run_until(&mut master, &mut bus, 200, |m, _| {
        m.sii_write_state(id).map_or(false, |state| state.is_finished())
    }));
    assert_eq!(master.sii_write_state(id), Some(RequestState::Failure));
    assert!(master.slave(0).unwrap().error_flag());
    assert_eq!(master.slave(0).unwrap().sii_image(), &before[..]);
}

#[test]
fn oversized_sii_write_is_rejected() {
    let (mut master, _, _) = io_master();
    assert_eq!(
        master.write_sii(0, 0xFFFF, &[1, 2]),
        Err(RequestError::TooLarge { size: 4, max: 2 })
    );
    assert!(master.write_sii(0, 0xFFFF, &[1]).is_ok());
}

#[test]
fn sdo_upload_and_download() {
    let (mut master, mut bus, mut clock) = coe_master(no_dictionary());
    assert!(clock.run_until(&mut master, &mut bus, 3000, |m, _| settled(m, 1)));

    let upload = master.sdo_upload(0, 0x1018, 0x01);
    let download = master.sdo_download(0, 0x6040, 0x00, &[0x0F, 0x00]);
    assert!(clock.run_until(&mut master, &mut bus, 100, |m, _| {
        m.sdo_state(download).map_or(false, |state| state.is_finished())
    }));

    let upload = master.take_sdo(upload).unwrap();
    assert_eq!(upload.state(), RequestState::Success);
    assert_eq!(upload.body.direction, SdoDirection::Upload);
    assert_eq!(upload.body.data, vec![0x34, 0x12]);
    assert_eq!(master.sdo_state(download), Some(RequestState::Success));

    assert_eq!(
        master.coe().calls,
        vec![
            CoeCall::Upload {
                slave: 0,
                index: 0x1018,
                subindex: 0x01,
            },
            CoeCall::Download {
                slave: 0,
                index: 0x6040,
                subindex: 0x00,
                data: vec![0x0F, 0x00],
            },
        ]
    );
}

#[test]
fn failed_sdo_request() {
    let (mut master, mut bus, mut clock) = coe_master(no_dictionary());
    assert!(clock.run_until(&mut master, &mut bus, 3000, |m, _| settled(m, 1)));

    master.coe_mut().fail = true;
    let id = master.sdo_upload(0, 0x1018, 0x01);
    assert!(clock.run_until(&mut master, &mut bus, 100, |m, _| {
        m.sdo_state(id).map_or(false, |state| state.is_finished())
    }));
    let request = master.take_sdo(id).unwrap();
    assert_eq!(request.state(), RequestState::Failure);
    assert!(request.body.data.is_empty());
    // a failed request does not block the slave
    assert!(!master.slave(0).unwrap().error_flag());
}

#[test]
fn sdo_request_for_slave_in_init_is_discarded() {
    let (mut master, mut bus, mut clock) = coe_master(no_dictionary());
    master.gates().config.deny();
    assert!(clock.run_until(&mut master, &mut bus, 3000, |m, _| {
        m.scan_state() == RequestState::Success
    }));
    assert_eq!(bus.slaves[0].al_status(), 0x01);

    let id = master.sdo_download(0, 0x6040, 0x00, &[0x0F, 0x00]);
    assert!(clock.run_until(&mut master, &mut bus, 100, |m, _| {
        m.sdo_state(id) == Some(RequestState::Failure)
    }));
    assert!(master.coe().calls.is_empty());
}

#[test]
fn dictionary_is_fetched_once_after_the_delay() {
    let (mut master, mut bus, mut clock) = coe_master(MasterConfig::default());
    assert!(clock.run_until(&mut master, &mut bus, 3000, |m, _| settled(m, 1)));
    let preop_ms = master.slave(0).unwrap().preop_time().unwrap().0 / 1_000_000;

    assert!(clock.run_until(&mut master, &mut bus, 5000, |m, _| !m.coe().calls.is_empty()));
    let waited = clock.0 - preop_ms;
    assert!((3000..3010).contains(&waited), "fetched after {} ms", waited);
    assert_eq!(master.coe().calls, vec![CoeCall::Dictionary { slave: 0 }]);
    assert!(master.slave(0).unwrap().sdo_dictionary_fetched());

    clock.run(&mut master, &mut bus, 1000);
    assert_eq!(master.coe().calls.len(), 1);
}

#[test]
fn no_dictionary_for_plain_slaves() {
    init_logger();
    let mut master = EtherCatMaster::with_handlers(
        MasterConfig::default(),
        ScriptedCoe::default(),
        NoPdoConfig,
        (),
    );
    let mut bus = SimulatedBus::new(vec![SimSlave::io()]);
    let mut clock = Clock::default();
    assert!(clock.run_until(&mut master, &mut bus, 3000, |m, _| settled(m, 1)));

    clock.run(&mut master, &mut bus, 4000);
    assert!(master.coe().calls.is_empty());
    assert!(!master.slave(0).unwrap().sdo_dictionary_fetched());
}

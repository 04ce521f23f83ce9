use ethercat_master_fsm::hal::*;
use ethercat_master_fsm::master::RequestState;
use ethercat_master_fsm::{
    AlState, EtherCatMaster, EtherCatSystemTime, EthernetTransport, MasterConfig,
};
use pnet_datalink::{self, Channel::Ethernet, DataLinkReceiver, DataLinkSender, NetworkInterface};
use std::env;
use std::time::{Duration, Instant};

struct PnetDevice {
    tx_buf: [u8; 1500],
    rx_buf: Vec<u8>,
    tx: Box<dyn DataLinkSender>,
    rx: Box<dyn DataLinkReceiver>,
}

impl PnetDevice {
    fn open(network_interface_name: &str) -> Self {
        let interface_names_match = |iface: &NetworkInterface| iface.name == network_interface_name;
        let interfaces = pnet_datalink::interfaces();
        let interface = interfaces
            .into_iter()
            .find(interface_names_match)
            .expect("interface not found");
        let config = pnet_datalink::Config {
            // the master is tick driven, never block on receive
            read_timeout: Some(Duration::from_micros(100)),
            ..Default::default()
        };
        let (tx, rx) = match pnet_datalink::channel(&interface, config) {
            Ok(Ethernet(tx, rx)) => (tx, rx),
            Ok(_) => panic!("unhandled interface"),
            Err(e) => panic!("unable to create channel: {}", e),
        };
        Self {
            tx_buf: [0; 1500],
            rx_buf: Vec::with_capacity(1500),
            tx,
            rx,
        }
    }
}

impl<'a> RawEthernetDevice<'a> for PnetDevice {
    type TxToken = PnetTxToken<'a>;
    type RxToken = PnetRxToken<'a>;

    fn transmit(&'a mut self) -> Option<Self::TxToken> {
        Some(PnetTxToken(&mut self.tx, &mut self.tx_buf))
    }

    fn receive(&'a mut self) -> Option<Self::RxToken> {
        let frame = self.rx.next().ok()?;
        self.rx_buf.clear();
        self.rx_buf.extend_from_slice(frame);
        Some(PnetRxToken(&self.rx_buf))
    }
}

struct PnetTxToken<'a>(&'a mut Box<dyn DataLinkSender + 'static>, &'a mut [u8]);

impl<'a> TxToken for PnetTxToken<'a> {
    fn consume<F>(self, len: usize, f: F) -> Result<(), ()>
    where
        F: FnOnce(&mut [u8]) -> Result<(), ()>,
    {
        let b = f(&mut self.1[..len]);
        match self.0.send_to(&self.1[..len], None) {
            Some(Ok(_)) => b,
            _ => Err(()),
        }
    }
}

struct PnetRxToken<'a>(&'a [u8]);

impl<'a> RxToken for PnetRxToken<'a> {
    fn consume<F>(self, f: F) -> Result<(), ()>
    where
        F: FnOnce(&[u8]) -> Result<(), ()>,
    {
        f(self.0)
    }
}

fn parse_state(name: &str) -> Option<AlState> {
    match name {
        "init" => Some(AlState::Init),
        "preop" => Some(AlState::PreOperational),
        "safeop" => Some(AlState::SafeOperational),
        "op" => Some(AlState::Operational),
        _ => None,
    }
}

fn main() {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    if let Some(name) = args.get(1) {
        let target = args
            .get(2)
            .map(|state| parse_state(state).expect("state is one of init, preop, safeop, op"))
            .unwrap_or(AlState::PreOperational);
        run(name, target);
    } else {
        println!("Specify the name of network interface as an argument from the following.");
        for (i, interface) in pnet_datalink::interfaces().iter().enumerate() {
            println!("{}:", i);
            println!("    Description: {}", interface.description);
            println!("    Name: {}", interface.name);
        }
    }
}

fn run(interf_name: &str, target: AlState) {
    let device = PnetDevice::open(interf_name);
    let mut transport = EthernetTransport::new(device);
    let mut master = EtherCatMaster::new(MasterConfig::default());

    let start = Instant::now();
    let mut requested = false;
    while start.elapsed() < Duration::from_secs(30) {
        let now = EtherCatSystemTime(start.elapsed().as_nanos() as u64);
        if let Err(err) = master.cycle(&mut transport, now) {
            log::warn!("Cycle failed: {:?}", err);
        }

        if !requested && master.scan_state() == RequestState::Success {
            requested = true;
            for slave in master.slaves() {
                let identity = slave.identity();
                println!(
                    "{}: vendor 0x{:08X} product 0x{:08X} state {}",
                    slave.ring_position(),
                    identity.vendor_id,
                    identity.product_code,
                    slave.current_state()
                );
            }
            for position in 0..master.slaves().len() as u16 {
                master.request_state(position, target).unwrap();
            }
        }
        if master.scan_state() == RequestState::Busy {
            requested = false;
        }
        std::thread::sleep(Duration::from_micros(500));
    }

    for slave in master.slaves() {
        println!(
            "{}: {}{}",
            slave.ring_position(),
            slave.current_state(),
            if slave.error_flag() { " (error)" } else { "" }
        );
    }
}

use super::super::Datagram;
use crate::slave_network::Slave;
use log::*;

/// CoE access used while configuring slaves and for application SDO requests.
///
/// A handler is started with one of the `start_*` calls and then stepped
/// with `exec` whenever the shared datagram has settled, until `exec`
/// returns `false`.
pub trait CoeHandler {
    fn start_download(&mut self, slave: &Slave, index: u16, subindex: u8, data: &[u8]);

    fn start_upload(&mut self, slave: &Slave, index: u16, subindex: u8);

    /// Reads the object dictionary of a slave that supports SDO information.
    fn start_dictionary(&mut self, slave: &Slave);

    fn exec(&mut self, slave: &mut Slave, datagram: &mut Datagram) -> bool;

    fn success(&self) -> bool;

    /// Payload of the last successful upload.
    fn upload_data(&self) -> &[u8];
}

/// Applies the PDO assignment and mapping of a slave's configuration.
pub trait PdoConfigurator {
    fn start(&mut self, slave: &Slave);

    fn exec(&mut self, slave: &mut Slave, datagram: &mut Datagram) -> bool;

    fn success(&self) -> bool;
}

/// Notifications the master gives after a bus scan.
pub trait BusHooks {
    fn eoe_attach(&mut self, _slave: &Slave) {}

    fn eoe_detach_all(&mut self) {}

    fn compute_dc_topology(&mut self, _slaves: &[Slave]) {}
}

impl BusHooks for () {}

/// No mailbox stack: every CoE request fails without touching the bus.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCoe;

impl CoeHandler for NoCoe {
    fn start_download(&mut self, slave: &Slave, index: u16, subindex: u8, _data: &[u8]) {
        warn!(
            "No CoE handler, cannot download 0x{:04X}:{:02X} to slave {}.",
            index, subindex, slave.ring_position
        );
    }

    fn start_upload(&mut self, slave: &Slave, index: u16, subindex: u8) {
        warn!(
            "No CoE handler, cannot upload 0x{:04X}:{:02X} from slave {}.",
            index, subindex, slave.ring_position
        );
    }

    fn start_dictionary(&mut self, slave: &Slave) {
        debug!(
            "No CoE handler, skipping SDO dictionary of slave {}.",
            slave.ring_position
        );
    }

    fn exec(&mut self, _slave: &mut Slave, _datagram: &mut Datagram) -> bool {
        false
    }

    fn success(&self) -> bool {
        false
    }

    fn upload_data(&self) -> &[u8] {
        &[]
    }
}

/// Leaves the default mapping from the SII in place.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPdoConfig;

impl PdoConfigurator for NoPdoConfig {
    fn start(&mut self, _slave: &Slave) {}

    fn exec(&mut self, _slave: &mut Slave, _datagram: &mut Datagram) -> bool {
        false
    }

    fn success(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cyclic_task::DatagramState;

    #[test]
    fn defaults_never_touch_the_datagram() {
        let mut slave = Slave::new(0, 1);
        let mut datagram = Datagram::new();

        let mut coe = NoCoe;
        coe.start_download(&slave, 0x8000, 1, &[1]);
        assert!(!coe.exec(&mut slave, &mut datagram));
        assert!(!coe.success());
        assert!(coe.upload_data().is_empty());

        let mut pdo = NoPdoConfig;
        pdo.start(&slave);
        assert!(!pdo.exec(&mut slave, &mut datagram));
        assert!(pdo.success());

        assert_eq!(datagram.state(), DatagramState::Init);
        assert!(datagram.is_empty());
    }
}

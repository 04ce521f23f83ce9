use bit_field::BitField;
use bitfield::*;

bitfield! {
    #[derive(Debug, Clone)]
    pub struct DlInformation([u8]);
    pub u8, ethercat_type, _: 8*1-1, 8*0;
    pub u8, revision, _: 8*2-1, 8*1;
    pub u16, build_number, _: 8*4-1, 8*2;
    /// Number of supported FMMU channels (or entities) of the Ethercat Slave Controller.
    pub u8, number_of_supported_fmmu_entities, _: 8*5-1, 8*4;
    /// Number of supported SyncManager channels (or entities) of the EtherCAT Slave Controller
    pub u8, number_of_supported_sm_channels, _: 8*6-1, 8*5;
}

impl DlInformation<[u8; 6]> {
    pub const ADDRESS: u16 = 0x0000;
    /// Base data only; the feature bytes are not evaluated.
    pub const SIZE: usize = 6;

    pub fn new() -> Self {
        Self([0; Self::SIZE])
    }
}

bitfield! {
    #[derive(Debug, Clone)]
    pub struct FixedStationAddress([u8]);
    pub u16, configured_station_address, set_configured_station_address: 8*2-1, 8*0;
}

impl FixedStationAddress<[u8; 2]> {
    pub const ADDRESS: u16 = 0x0010;
    pub const SIZE: usize = 2;

    pub fn new() -> Self {
        Self([0; Self::SIZE])
    }
}

bitfield! {
    #[derive(Debug, Clone)]
    pub struct DlStatus([u8]);
    pub pdi_operational, _: 0;
    pub dls_user_watch_dog_status, _: 1;
    pub extended_link_detection, _: 2;
    pub u8, link_status, _: 7, 4;
    pub u8, loop_and_signal, _: 15, 8;
}

impl DlStatus<[u8; 2]> {
    pub const ADDRESS: u16 = 0x0110;
    pub const SIZE: usize = 2;

    pub fn new() -> Self {
        Self([0; Self::SIZE])
    }
}

impl<B: AsRef<[u8]>> DlStatus<B> {
    pub fn link(&self, port: usize) -> bool {
        self.link_status().get_bit(port)
    }

    pub fn loop_closed(&self, port: usize) -> bool {
        self.loop_and_signal().get_bit(port * 2)
    }

    pub fn signal_detected(&self, port: usize) -> bool {
        self.loop_and_signal().get_bit(port * 2 + 1)
    }
}

bitfield! {
    /// SII control/status word, address and data, starting at 0x0502.
    #[derive(Debug, Clone)]
    pub struct SiiAccess([u8]);
    pub enable_write_access, set_enable_write_access: 0;
    pub read_size, _: 6;
    pub address_algorithm, _: 7;
    pub read_operation, set_read_operation: 8;
    pub write_operation, set_write_operation: 8+1;
    pub reload_operation, set_reload_operation: 8+2;
    pub check_sum_error, _: 8+3;
    pub device_info_error, _: 8+4;
    pub command_error, _: 8+5;
    pub write_error, _: 8+6;
    pub busy, _: 8+7;
    pub u32, sii_address, set_sii_address: 8*6-1, 8*2;
    /// Word address of a read request, which only carries 16 bits.
    pub u16, read_address, set_read_address: 8*4-1, 8*2;
    pub u32, read_data, _: 8*10-1, 8*6;
    pub u16, write_data, set_write_data: 8*8-1, 8*6;
}

impl SiiAccess<[u8; 10]> {
    pub const ADDRESS: u16 = 0x0502;
    /// Read request: control word and word address.
    pub const READ_REQUEST_SIZE: usize = 4;
    /// Write request: control word, address and one data word.
    pub const WRITE_REQUEST_SIZE: usize = 8;
    /// Status poll of a read, including the four data bytes.
    pub const SIZE: usize = 10;

    pub fn new() -> Self {
        Self([0; Self::SIZE])
    }
}

bitfield! {
    #[derive(Debug, Clone)]
    pub struct FmmuRegister([u8]);
    pub u32, logical_start_address, set_logical_start_address: 8*4-1, 8*0;
    pub u16, length, set_length: 8*6-1, 8*4;
    pub u8, logical_start_bit, set_logical_start_bit: 8*6+2, 8*6;
    pub u8, logical_end_bit, set_logical_end_bit: 8*7+2, 8*7;
    pub u16, physical_start_address, set_physical_start_address: 8*10-1, 8*8;
    pub u8, physical_start_bit, set_physical_start_bit: 8*10+2, 8*10;
    pub read_enable, set_read_enable: 8*11;
    pub write_enable, set_write_enable: 8*11+1;
    pub enable, set_enable: 8*12;
}

impl FmmuRegister<[u8; 16]> {
    pub const ADDRESS: u16 = 0x0600;
    pub const SIZE: usize = 16;

    pub fn new() -> Self {
        Self([0; Self::SIZE])
    }
}

bitfield! {
    #[derive(Debug, Clone)]
    pub struct SyncManagerRegister([u8]);
    pub u16, physical_start_address, set_physical_start_address: 8*2-1, 8*0;
    pub u16, length, set_length: 8*4-1, 8*2;
    pub u8, control, set_control: 8*5-1, 8*4;
    pub u8, buffer_type, _: 8*4+1, 8*4;
    pub u8, direction, _: 8*4+3, 8*4+2;
    pub u8, status, _: 8*6-1, 8*5;
    pub channel_enable, set_channel_enable: 8*6;
    pub repeat, set_repeat: 8*6+1;
    pub channel_enable_pdi, _: 8*7;
    pub repeat_ack, _: 8*7+1;
}

impl SyncManagerRegister<[u8; 8]> {
    pub const ADDRESS: u16 = 0x0800;
    pub const SIZE: usize = 8;

    pub fn new() -> Self {
        Self([0; Self::SIZE])
    }
}

bitfield! {
    #[derive(Debug, Clone)]
    pub struct DcReceiveTime([u8]);
    pub u32, receive_time_port0, set_receive_time_port0: 8*4-1, 8*0;
}

impl DcReceiveTime<[u8; 4]> {
    pub const ADDRESS: u16 = 0x0900;
    /// Writing the port-0 latch makes every slave record its receive times.
    pub const SIZE: usize = 4;

    pub fn new() -> Self {
        Self([0; Self::SIZE])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fmmu_page_layout() {
        let mut fmmu = FmmuRegister::new();
        fmmu.set_logical_start_address(0x0001_0000);
        fmmu.set_length(4);
        fmmu.set_logical_end_bit(7);
        fmmu.set_physical_start_address(0x1100);
        fmmu.set_write_enable(true);
        fmmu.set_enable(true);
        assert_eq!(
            fmmu.0,
            [0x00, 0x00, 0x01, 0x00, 0x04, 0x00, 0x00, 0x07, 0x00, 0x11, 0x00, 0x02, 0x01, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn sii_read_reply() {
        let sii = SiiAccess([0x00, 0x01, 0x08, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]);
        assert!(!sii.busy());
        assert_eq!(sii.sii_address(), 0x0008);
        assert_eq!(sii.read_data(), 0x0000_0002);
    }

    #[test]
    fn dl_status_ports() {
        let status = DlStatus([0b0011_0000, 0b0000_0110]);
        assert!(status.link(0));
        assert!(status.link(1));
        assert!(!status.link(2));
        assert!(status.signal_detected(0));
        assert!(status.loop_closed(1));
        assert!(!status.loop_closed(0));
    }
}

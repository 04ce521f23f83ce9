use bitfield::*;
use num_enum::FromPrimitive;

const BROADCAST_MAC: u64 = 0xFF_FF_FF_FF_FF_FF;
/// Source MAC of every frame the master sends. Frames carrying it are our own echoes.
pub(crate) const SRC_MAC: u64 = 0x05_05_05_05_05_05;
pub(crate) const ETHERCAT_TYPE: u16 = 0x88A4;
pub(crate) const WKC_LENGTH: usize = 2;

const MAX_FRAME_WITHOUT_FCS: usize = 1514;
/// Largest payload a single datagram can carry.
pub const MAX_PDU_DATAGRAM: usize = MAX_FRAME_WITHOUT_FCS
    - EthernetHeader::SIZE
    - EtherCatHeader::SIZE
    - EtherCatPduHeader::SIZE
    - WKC_LENGTH;

bitfield! {
    #[derive(Debug, Clone)]
    pub struct EthernetHeader(MSB0 [u8]);
    u64;
    pub destination, set_destination: 47, 0;
    pub source, set_source: 95, 48;
    u16;
    pub ether_type, set_ether_type: 111, 96;
}

impl EthernetHeader<[u8; 14]> {
    pub const SIZE: usize = 14;
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> EthernetHeader<T> {
    /// Broadcast destination, master source, EtherCat ether type.
    pub fn set_ethercat_default(&mut self) {
        self.set_destination(BROADCAST_MAC);
        self.set_source(SRC_MAC);
        self.set_ether_type(ETHERCAT_TYPE);
    }
}

bitfield! {
    /// Length of all PDUs that follow and the frame type (1 for PDUs).
    #[derive(Debug, Clone)]
    pub struct EtherCatHeader([u8]);
    u16;
    pub length, set_length: 10, 0;
    u8;
    pub ethercat_type, set_ethercat_type: 15, 12;
}

impl EtherCatHeader<[u8; 2]> {
    pub const SIZE: usize = 2;
}

bitfield! {
    #[derive(Debug, Clone)]
    pub struct EtherCatPduHeader([u8]);
    u8;
    pub command_type, set_command_type: 7, 0;
    pub index, set_index: 15, 8;
    u16;
    pub adp, set_adp: 31, 16;
    pub ado, set_ado: 47, 32;
    pub length, set_length: 58, 48;
    u8;
    pub is_circulated, set_is_circulated: 62;
    pub has_next, set_has_next: 63;
    u16;
    pub irq, set_irq: 79, 64;
}

impl EtherCatPduHeader<[u8; 10]> {
    pub const SIZE: usize = 10;
}

impl<T: AsRef<[u8]>> EtherCatPduHeader<T> {
    /// Payload following the header, `None` if the buffer is cut short.
    pub fn data(&self) -> Option<&[u8]> {
        let end = EtherCatPduHeader::SIZE + self.length() as usize;
        self.0.as_ref().get(EtherCatPduHeader::SIZE..end)
    }

    pub fn wkc(&self) -> Option<u16> {
        let start = EtherCatPduHeader::SIZE + self.length() as usize;
        let bytes = self.0.as_ref().get(start..start + WKC_LENGTH)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> EtherCatPduHeader<T> {
    /// Writes the working counter behind the payload. Returns `false` if it does not fit.
    pub fn set_wkc(&mut self, wkc: u16) -> bool {
        let start = EtherCatPduHeader::SIZE + self.length() as usize;
        match self.0.as_mut().get_mut(start..start + WKC_LENGTH) {
            Some(bytes) => {
                bytes.copy_from_slice(&wkc.to_le_bytes());
                true
            }
            None => false,
        }
    }
}

/// EtherCat command of a PDU.
///
/// Auto increment (`AP*`) commands address a slave by ring position, configured
/// address (`FP*`) commands by station address, broadcasts reach every slave and
/// logical (`L*`) commands go through the FMMUs.
#[derive(Debug, Clone, Copy, FromPrimitive, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandType {
    NOP = 0x00,
    APRD = 0x01,
    APWR = 0x02,
    APRW = 0x03,
    FPRD = 0x04,
    FPWR = 0x05,
    FPRW = 0x06,
    /// Every slave ORs its memory into the payload.
    BRD = 0x07,
    BWR = 0x08,
    BRW = 0x09,
    LRD = 0x0A,
    LWR = 0x0B,
    LRW = 0x0C,
    /// Read by position, write by every other slave.
    ARMW = 0x0D,
    FRMW = 0x0E,
    #[num_enum(default)]
    Invalid,
}

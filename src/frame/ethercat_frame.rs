use super::ethercat::*;

/// One Ethernet frame carrying a chain of EtherCat PDUs.
#[derive(Debug, Clone)]
pub struct EtherCatFrame<B> {
    buffer: B,
    free_offset: usize,
}

impl<B: AsRef<[u8]>> EtherCatFrame<B> {
    pub const HEADER_SIZE: usize = EthernetHeader::SIZE + EtherCatHeader::SIZE;

    /// Wraps a received frame. Returns `None` for frames that are not EtherCat.
    pub fn parse(buffer: B) -> Option<Self> {
        let bytes = buffer.as_ref();
        if bytes.len() < Self::HEADER_SIZE {
            return None;
        }
        let eth = EthernetHeader(bytes);
        if eth.ether_type() != ETHERCAT_TYPE {
            return None;
        }
        let length = EtherCatHeader(&bytes[EthernetHeader::SIZE..]).length() as usize;
        if bytes.len() < Self::HEADER_SIZE + length {
            return None;
        }
        Some(Self {
            buffer,
            free_offset: Self::HEADER_SIZE + length,
        })
    }

    pub fn source(&self) -> u64 {
        EthernetHeader(self.buffer.as_ref()).source()
    }

    #[inline]
    pub fn packet(&self) -> &[u8] {
        &self.buffer.as_ref()[..self.free_offset]
    }

    pub fn pdus(&self) -> EtherCatPdus {
        EtherCatPdus {
            buffer: self.packet(),
            offset: Self::HEADER_SIZE,
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> EtherCatFrame<B> {
    pub fn new(mut buffer: B) -> Self {
        buffer.as_mut().fill(0);
        EthernetHeader(buffer.as_mut()).set_ethercat_default();
        let mut ec_header = EtherCatHeader(&mut buffer.as_mut()[EthernetHeader::SIZE..]);
        ec_header.set_length(0);
        ec_header.set_ethercat_type(1);
        Self {
            buffer,
            free_offset: Self::HEADER_SIZE,
        }
    }

    pub fn remaining_capacity(&self) -> usize {
        self.buffer.as_ref().len().saturating_sub(self.free_offset)
    }

    /// Appends a PDU with a zero working counter. Returns `false` if it does not fit.
    pub fn add_pdu(&mut self, command: CommandType, index: u8, adp: u16, ado: u16, data: &[u8]) -> bool {
        let pdu_len = EtherCatPduHeader::SIZE + data.len() + WKC_LENGTH;
        if data.len() > MAX_PDU_DATAGRAM || pdu_len > self.remaining_capacity() {
            return false;
        }
        if let Some(last) = self.pdus().last_offset() {
            EtherCatPduHeader(&mut self.buffer.as_mut()[last..]).set_has_next(true);
        }
        let offset = self.free_offset;
        let buf = self.buffer.as_mut();
        let data_offset = offset + EtherCatPduHeader::SIZE;
        buf[data_offset..data_offset + data.len()].copy_from_slice(data);
        let mut pdu = EtherCatPduHeader(&mut buf[offset..offset + pdu_len]);
        pdu.set_command_type(command as u8);
        pdu.set_index(index);
        pdu.set_adp(adp);
        pdu.set_ado(ado);
        pdu.set_length(data.len() as u16);
        pdu.set_is_circulated(false);
        pdu.set_has_next(false);
        pdu.set_irq(0);
        pdu.set_wkc(0);

        self.free_offset += pdu_len;
        let datagrams_length = (self.free_offset - Self::HEADER_SIZE) as u16;
        EtherCatHeader(&mut buf[EthernetHeader::SIZE..]).set_length(datagrams_length);
        true
    }
}

#[derive(Debug, Clone)]
pub struct EtherCatPdus<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> EtherCatPdus<'a> {
    fn last_offset(mut self) -> Option<usize> {
        let mut last = None;
        while let Some((offset, _)) = self.next_with_offset() {
            last = Some(offset);
        }
        last
    }

    fn next_with_offset(&mut self) -> Option<(usize, EtherCatPduHeader<&'a [u8]>)> {
        let rest = self.buffer.get(self.offset..)?;
        if rest.len() < EtherCatPduHeader::SIZE + WKC_LENGTH {
            return None;
        }
        let pdu = EtherCatPduHeader(rest);
        let pdu_len = EtherCatPduHeader::SIZE + pdu.length() as usize + WKC_LENGTH;
        if rest.len() < pdu_len {
            return None;
        }
        let offset = self.offset;
        self.offset += pdu_len;
        Some((offset, EtherCatPduHeader(&rest[..pdu_len])))
    }
}

impl<'a> Iterator for EtherCatPdus<'a> {
    type Item = EtherCatPduHeader<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_with_offset().map(|(_, pdu)| pdu)
    }
}

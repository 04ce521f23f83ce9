#[inline]
pub(crate) fn next_ethercat_packet_index(index: u8) -> u8 {
    index.wrapping_add(1)
}

#[inline]
pub(crate) fn get_ap_adp(slave_number: u16) -> u16 {
    if slave_number == 0 {
        0
    } else {
        0xFFFF - (slave_number - 1)
    }
}

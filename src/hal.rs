/// A smoltcp-like raw network interface.
pub trait RawEthernetDevice<'a> {
    type TxToken: TxToken + 'a;
    type RxToken: RxToken + 'a;

    /// If phy is not busy, return token. It should be non-blocking.
    fn transmit(&'a mut self) -> Option<Self::TxToken>;

    /// Return token if a frame has arrived. It should be non-blocking.
    fn receive(&'a mut self) -> Option<Self::RxToken>;

    /// `false` once the link is known to be down.
    fn link_up(&self) -> bool {
        true
    }
}

pub trait TxToken {
    fn consume<F>(self, len: usize, f: F) -> Result<(), ()>
    where
        F: FnOnce(&mut [u8]) -> Result<(), ()>;
}

pub trait RxToken {
    fn consume<F>(self, f: F) -> Result<(), ()>
    where
        F: FnOnce(&[u8]) -> Result<(), ()>;
}

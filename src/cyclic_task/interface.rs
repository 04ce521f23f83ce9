use super::{Datagram, DatagramState, EtherCatSystemTime};
use crate::frame::*;
use crate::hal::{RawEthernetDevice, RxToken, TxToken};
use crate::util::next_ethercat_packet_index;
use core::time::Duration;
use log::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The device had no transmit token, the datagram stays queued.
    TxBusy,
    TxError,
    RxError,
    LinkDown,
    NotQueued,
}

/// Moves datagrams between the master and the wire.
///
/// `send` puts a queued datagram on the wire, `poll` settles a sent one to
/// `Received`, `TimedOut` or `Error` once that is known.
pub trait Transport {
    fn send(
        &mut self,
        datagram: &mut Datagram,
        sys_time: EtherCatSystemTime,
    ) -> Result<(), TransportError>;

    fn poll(&mut self, datagram: &mut Datagram, sys_time: EtherCatSystemTime);
}

/// Sends every datagram in its own Ethernet frame.
#[derive(Debug)]
pub struct EthernetTransport<D>
where
    D: for<'d> RawEthernetDevice<'d>,
{
    ethdev: D,
    index: u8,
    timeout: Duration,
}

impl<D> EthernetTransport<D>
where
    D: for<'d> RawEthernetDevice<'d>,
{
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10);

    pub fn new(ethdev: D) -> Self {
        Self::with_timeout(ethdev, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(ethdev: D, timeout: Duration) -> Self {
        Self {
            ethdev,
            index: 0,
            timeout,
        }
    }

    pub fn device(&self) -> &D {
        &self.ethdev
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.ethdev
    }

    pub fn release(self) -> D {
        self.ethdev
    }
}

impl<D> Transport for EthernetTransport<D>
where
    D: for<'d> RawEthernetDevice<'d>,
{
    fn send(
        &mut self,
        datagram: &mut Datagram,
        sys_time: EtherCatSystemTime,
    ) -> Result<(), TransportError> {
        let Self { ethdev, index, .. } = self;
        if datagram.state() != DatagramState::Queued {
            return Err(TransportError::NotQueued);
        }
        if !ethdev.link_up() {
            datagram.link_down();
            return Err(TransportError::LinkDown);
        }
        let tx_token = ethdev.transmit().ok_or(TransportError::TxBusy)?;

        let next_index = next_ethercat_packet_index(*index);
        let (adp, ado) = datagram.address().wire();
        let len = EtherCatFrame::<&[u8]>::HEADER_SIZE
            + EtherCatPduHeader::SIZE
            + datagram.len()
            + WKC_LENGTH;
        let command = datagram.command();
        let data = datagram.data();
        let result = tx_token.consume(len, |buffer| {
            let mut frame = EtherCatFrame::new(buffer);
            if frame.add_pdu(command, next_index, adp, ado, data) {
                Ok(())
            } else {
                Err(())
            }
        });
        if result.is_err() {
            error!("Failed to transmit {:?} datagram", command);
            datagram.fail();
            return Err(TransportError::TxError);
        }
        *index = next_index;
        datagram.mark_sent(next_index, sys_time);
        Ok(())
    }

    fn poll(&mut self, datagram: &mut Datagram, sys_time: EtherCatSystemTime) {
        let Self {
            ethdev, timeout, ..
        } = self;
        if datagram.state() != DatagramState::Sent {
            return;
        }
        if !ethdev.link_up() {
            datagram.link_down();
            return;
        }
        while datagram.state() == DatagramState::Sent {
            let rx_token = if let Some(token) = ethdev.receive() {
                token
            } else {
                break;
            };
            let rx_result = rx_token.consume(|buffer| {
                let frame = if let Some(frame) = EtherCatFrame::parse(buffer) {
                    frame
                } else {
                    return Ok(());
                };
                if frame.source() == SRC_MAC {
                    return Ok(());
                }
                for pdu in frame.pdus() {
                    if pdu.index() != datagram.index() {
                        debug!("Ignoring stale reply with index 0x{:02X}", pdu.index());
                        continue;
                    }
                    let (data, wkc) = match (pdu.data(), pdu.wkc()) {
                        (Some(data), Some(wkc)) => (data, wkc),
                        _ => return Err(()),
                    };
                    let command = CommandType::from(pdu.command_type());
                    let _ = datagram.receive(command, pdu.index(), data, wkc, sys_time);
                    break;
                }
                Ok(())
            });
            if rx_result.is_err() {
                warn!("Failed to receive frame");
            }
        }
        if datagram.state() == DatagramState::Sent
            && sys_time.elapsed_since(datagram.sent_at()) >= *timeout
        {
            debug!("Datagram 0x{:02X} timed out", datagram.index());
            datagram.time_out(sys_time);
        }
    }
}

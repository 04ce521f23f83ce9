use crate::cyclic_task::DatagramState;
use core::fmt;

/// Failure of a datagram-driven task. `E` carries the task's own causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcError<E> {
    /// Timed out after the retry budget was used up.
    LostPacket,
    UnexpectedWkc(u16),
    /// Settled in a state other than `Received`.
    Datagram(DatagramState),
    TaskSpecific(E),
}

impl<E> From<DatagramState> for EcError<E> {
    fn from(state: DatagramState) -> Self {
        match state {
            DatagramState::TimedOut => Self::LostPacket,
            state => Self::Datagram(state),
        }
    }
}

impl<E: fmt::Display> fmt::Display for EcError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LostPacket => write!(f, "datagram timed out"),
            Self::UnexpectedWkc(wkc) => write!(f, "unexpected working counter {}", wkc),
            Self::Datagram(state) => write!(f, "datagram not received (state {:?})", state),
            Self::TaskSpecific(err) => write!(f, "{}", err),
        }
    }
}

mod datagram;
mod interface;
pub mod tasks;

use core::ops::Add;
use core::time::Duration;

pub use datagram::*;
pub use interface::*;

/// Retry budget for datagrams that time out.
pub const FSM_RETRIES: u8 = 3;

/// Monotonic time in nanoseconds, supplied by the caller on every tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct EtherCatSystemTime(pub u64);

impl EtherCatSystemTime {
    pub fn from_millis(ms: u64) -> Self {
        Self(ms * 1_000_000)
    }

    /// Time passed since `earlier`, zero if `earlier` lies in the future.
    pub fn elapsed_since(&self, earlier: EtherCatSystemTime) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for EtherCatSystemTime {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs.as_nanos() as u64)
    }
}

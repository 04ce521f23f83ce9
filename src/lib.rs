#![cfg_attr(not(test), no_std)]
extern crate alloc;

pub mod cyclic_task;
pub mod error;
pub mod frame;
pub mod hal;
pub mod master;
pub mod register;
pub mod slave_network;
pub(crate) mod util;

pub use cyclic_task::{Datagram, EtherCatSystemTime, EthernetTransport, Transport};
pub use error::EcError;
pub use master::{EtherCatMaster, MasterConfig, MasterGates};
pub use slave_network::{AlState, Slave, SlaveConfig};

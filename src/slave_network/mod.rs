mod config;
mod slave;

pub use config::*;
pub use slave::*;

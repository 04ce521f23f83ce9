mod al_state_transfer;
mod mailbox;
mod sii;
mod slave_configurator;
mod slave_scanner;

pub use al_state_transfer::*;
pub use mailbox::*;
pub use sii::*;
pub use slave_configurator::*;
pub use slave_scanner::*;

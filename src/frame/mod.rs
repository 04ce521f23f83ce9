mod ethercat;
mod ethercat_frame;

pub use ethercat::*;
pub use ethercat_frame::*;

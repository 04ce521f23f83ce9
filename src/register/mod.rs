mod application;
mod datalink;

pub use application::*;
pub use datalink::*;

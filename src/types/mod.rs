pub mod analysis;
pub mod log;
pub mod message;

pub use analysis::*;
pub use log::*;
pub use message::*;

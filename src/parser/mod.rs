pub mod decoder;
pub mod format;
pub mod stream;

pub use decoder::*;
pub use format::*;
pub use stream::*;

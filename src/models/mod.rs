pub mod delta;
pub mod session;

pub use delta::*;
pub use session::*;

pub mod health;
pub mod diagnostics;
pub mod ws;

pub use health::*;
pub use diagnostics::*;
pub use ws::*;

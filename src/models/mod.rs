pub mod envelope;
pub mod health;
pub mod diagnostics;
pub mod error;

pub use envelope::*;
pub use health::*;
pub use diagnostics::*;
pub use error::*;

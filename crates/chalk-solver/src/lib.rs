pub mod diagnostics;
pub mod newton;
pub mod system;

pub use diagnostics::*;
pub use newton::*;
pub use system::*;

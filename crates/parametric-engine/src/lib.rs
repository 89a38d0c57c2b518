//! Constraint-driven sketch engine: a curve/constraint graph, its
//! compilation into a nonlinear system, and the solve session that runs it.

pub mod compile;
pub mod dataset;
mod equations;
pub mod session;

pub use compile::*;
pub use dataset::*;
pub use session::*;

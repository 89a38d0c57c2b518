pub mod constraint;
pub mod geometry;
pub mod id;
pub mod value_ref;

pub use constraint::*;
pub use geometry::*;
pub use id::*;
pub use value_ref::*;

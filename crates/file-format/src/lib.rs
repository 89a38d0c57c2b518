pub mod errors;
pub mod load;
pub mod metadata;
pub mod migrate;
pub mod save;

pub use errors::{ExportError, LoadError};
pub use load::{load_dataset, load_dataset_from};
pub use metadata::SketchMetadata;
pub use save::{save_dataset, save_dataset_to, FORMAT_VERSION};

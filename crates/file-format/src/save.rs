use std::fs;
use std::path::Path;

use chalk_types::Curve;
use parametric_engine::{ConstraintEntry, DataSet};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::ExportError;
use crate::metadata::SketchMetadata;

/// Current file format version.
pub const FORMAT_VERSION: u32 = 1;

/// The top-level file structure.
#[derive(Debug, Clone, Serialize)]
pub struct SketchFile {
    /// Format identifier.
    pub format: String,
    /// Format version number.
    pub version: u32,
    /// Sketch metadata.
    pub sketch: SketchMetadata,
    /// Document id of the sketch.
    pub dataset: Uuid,
    /// Curves in insertion order.
    pub curves: Vec<Curve>,
    /// Constraints in insertion order.
    pub constraints: Vec<ConstraintEntry>,
}

/// Serialize a sketch to a pretty-printed JSON string.
pub fn save_dataset(dataset: &DataSet, metadata: &SketchMetadata) -> String {
    let file = SketchFile {
        format: "chalkline".to_string(),
        version: FORMAT_VERSION,
        sketch: metadata.clone(),
        dataset: dataset.id(),
        curves: dataset.curves().to_vec(),
        constraints: dataset.constraints().to_vec(),
    };
    serde_json::to_string_pretty(&file).expect("sketch serialization should never fail")
}

/// Write a sketch to `path` as JSON.
pub fn save_dataset_to(
    dataset: &DataSet,
    metadata: &SketchMetadata,
    path: impl AsRef<Path>,
) -> Result<(), ExportError> {
    let path = path.as_ref();
    fs::write(path, save_dataset(dataset, metadata)).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

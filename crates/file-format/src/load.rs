use std::fs;
use std::path::Path;

use chalk_types::Curve;
use parametric_engine::{ConstraintEntry, DataSet};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::LoadError;
use crate::metadata::SketchMetadata;
use crate::save::FORMAT_VERSION;

/// The top-level file structure for deserialization.
#[derive(Debug, Clone, Deserialize)]
pub struct SketchFileRaw {
    pub format: String,
    pub version: u32,
    pub sketch: SketchMetadata,
    pub dataset: Uuid,
    pub curves: Vec<Curve>,
    pub constraints: Vec<ConstraintEntry>,
}

/// Deserialize a sketch from a JSON string.
///
/// Validates the format identifier and version, then rebuilds the sketch,
/// which revalidates every constraint against the loaded curves and
/// reserves all loaded ids so they are never minted again in this process.
/// Returns the dataset and sketch metadata.
pub fn load_dataset(json: &str) -> Result<(DataSet, SketchMetadata), LoadError> {
    let raw: SketchFileRaw =
        serde_json::from_str(json).map_err(|e| LoadError::ParseError(e.to_string()))?;

    // Validate format identifier
    if raw.format != "chalkline" {
        return Err(LoadError::UnknownFormat(raw.format));
    }

    // Validate version
    if raw.version > FORMAT_VERSION {
        return Err(LoadError::FutureVersion {
            file_version: raw.version,
            supported_version: FORMAT_VERSION,
        });
    }

    // Apply migrations if needed (version < current)
    let raw = if raw.version < FORMAT_VERSION {
        let from_version = raw.version;
        crate::migrate::migrate(raw, from_version, FORMAT_VERSION)?
    } else {
        raw
    };

    let dataset = DataSet::from_parts(raw.dataset, raw.curves, raw.constraints)?;
    Ok((dataset, raw.sketch))
}

/// Read a sketch from a JSON file at `path`.
pub fn load_dataset_from(path: impl AsRef<Path>) -> Result<(DataSet, SketchMetadata), LoadError> {
    let path = path.as_ref();
    let json = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_dataset(&json)
}

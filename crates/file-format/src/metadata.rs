use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sketch metadata stored alongside the curves and constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SketchMetadata {
    /// Human-readable sketch name.
    pub name: String,
    /// When the sketch was first created.
    pub created: DateTime<Utc>,
    /// When the sketch was last modified.
    pub modified: DateTime<Utc>,
}

impl SketchMetadata {
    /// Create metadata with the given name and current timestamp.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            created: now,
            modified: now,
        }
    }
}

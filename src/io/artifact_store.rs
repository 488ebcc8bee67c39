//! Persisting attribution artifacts
//!
//! Comparisons are written as `<root>/heatmaps/heatmap_<stem>.png`.

use crate::attribution::AttributionArtifact;
use crate::error::EngineError;
use std::path::{Path, PathBuf};

/// Directory below the storage root that holds rendered comparisons
pub const HEATMAP_DIR: &str = "heatmaps";

/// Filesystem store for rendered comparisons
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Store rooted at `root` (created on first write)
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Storage root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write the comparison PNG of `artifact`
    ///
    /// # Arguments
    ///
    /// * `artifact` - Attribution to persist
    /// * `stem` - File name stem, typically a request or image identifier
    ///
    /// # Returns
    ///
    /// Path of the written file relative to the storage root.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidInput` for a stem that is empty or contains
    /// path separators, and `EngineError::Io` when writing fails.
    pub fn persist(&self, artifact: &AttributionArtifact, stem: &str) -> Result<PathBuf, EngineError> {
        if stem.is_empty() || stem.contains(['/', '\\']) || stem == "." || stem == ".." {
            return Err(EngineError::InvalidInput(format!(
                "Invalid artifact name '{}'",
                stem
            )));
        }

        let relative = Path::new(HEATMAP_DIR).join(format!("heatmap_{}.png", stem));
        let path = self.root.join(&relative);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&path, &artifact.rendered_comparison)?;

        log::debug!(
            "Persisted attribution for '{}' to {}",
            artifact.target,
            path.display()
        );
        Ok(relative)
    }
}

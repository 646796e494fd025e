use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::selection::SelectionMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read mirror config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse mirror config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tunables for [`crate::SceneMirror`]. Every field is optional in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Cursor travel (pixels) before a press on a selected entity becomes a
    /// drag.
    pub drag_threshold_px: f32,
    /// Rectangle decodes at or above this pixel count run on the rayon pool.
    pub parallel_decode_min_pixels: usize,
    pub default_selection_mode: SelectionMode,
    pub plate_count: usize,
    pub gizmo_handles: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            drag_threshold_px: 4.0,
            parallel_decode_min_pixels: 64 * 64,
            default_selection_mode: SelectionMode::Instance,
            plate_count: 1,
            gizmo_handles: 0,
        }
    }
}

impl MirrorConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_fields_take_defaults() {
        let config = MirrorConfig::from_json_str(r#"{ "plate_count": 3 }"#).expect("parse");
        assert_eq!(config.plate_count, 3);
        assert_eq!(config.drag_threshold_px, 4.0);
        assert_eq!(config.default_selection_mode, SelectionMode::Instance);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{ "default_selection_mode": "volume", "gizmo_handles": 6 }}"#
        )
        .expect("write config");
        let config = MirrorConfig::from_json_file(file.path()).expect("load");
        assert_eq!(config.default_selection_mode, SelectionMode::Volume);
        assert_eq!(config.gizmo_handles, 6);
    }

    #[test]
    fn reports_missing_file_and_bad_json() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = MirrorConfig::from_json_file(&dir.path().join("absent.json"))
            .expect_err("missing file");
        assert!(matches!(err, ConfigError::Io { .. }));
        let err = MirrorConfig::from_json_str("{ nope").expect_err("bad json");
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}

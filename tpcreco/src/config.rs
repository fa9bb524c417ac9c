//! Reconstruction configuration as read from YAML or JSON files.

use std::path::Path;

use common::FileFormat;
use serde::{Deserialize, Serialize};

use crate::clusterer::ClustererConfig;
use crate::error::RecoError;
use crate::tracking::TrackerConfig;

/// Clusterer and tracker settings for one reconstruction pass. Missing
/// sections and fields take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoConfig {
    pub clusterer: ClustererConfig,
    pub tracker: TrackerConfig,
}

impl RecoConfig {
    /// Validate both sections, panicking if invalid.
    pub fn validate(&self) {
        self.clusterer.validate();
        self.tracker.validate();
    }

    /// Load from a `.yaml`/`.yml` or `.json` file. The result is not validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RecoError> {
        let path = path.as_ref();
        let format = FileFormat::from_path(path).map_err(|source| RecoError::ConfigFormat {
            path: path.to_path_buf(),
            source,
        })?;
        let text = std::fs::read_to_string(path).map_err(|source| RecoError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config = common::deserialize(&text, format).map_err(|source| RecoError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("Loaded reconstruction config from {}", path.display());
        Ok(config)
    }

    pub fn serialize(&self, format: FileFormat) -> Result<String, common::SerdeFormatError> {
        common::serialize(self, format)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::tracking::FollowDirection;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tpcreco-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_file_round_trip_in_both_formats() {
        let config = RecoConfig {
            clusterer: ClustererConfig::high_occupancy(),
            tracker: TrackerConfig {
                direction: FollowDirection::Outward,
                ..TrackerConfig::cosmics()
            },
        };
        for (name, format) in [("rt.yaml", FileFormat::Yaml), ("rt.json", FileFormat::Json)] {
            let path = temp_path(name);
            std::fs::write(&path, config.serialize(format).unwrap()).unwrap();
            let back = RecoConfig::from_file(&path).unwrap();
            std::fs::remove_file(&path).unwrap();
            assert_eq!(back, config, "round trip through {}", name);
        }
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let path = temp_path("partial.yml");
        std::fs::write(&path, "tracker:\n  min_clusters: 25\n").unwrap();
        let config = RecoConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.tracker.min_clusters, 25);
        assert_eq!(config.tracker.max_chi2, TrackerConfig::default().max_chi2);
        assert_eq!(config.clusterer, ClustererConfig::default());
        config.validate();
    }

    #[test]
    fn test_unsupported_extension() {
        let err = RecoConfig::from_file("reco.toml").unwrap_err();
        assert!(matches!(err, RecoError::ConfigFormat { .. }), "got {}", err);
    }

    #[test]
    fn test_missing_file() {
        let err = RecoConfig::from_file(temp_path("does-not-exist.yaml")).unwrap_err();
        assert!(matches!(err, RecoError::ConfigIo { .. }), "got {}", err);
    }

    #[test]
    fn test_malformed_file() {
        let path = temp_path("bad.json");
        std::fs::write(&path, "{ \"tracker\": ").unwrap();
        let err = RecoConfig::from_file(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(err, RecoError::ConfigParse { .. }), "got {}", err);
    }
}

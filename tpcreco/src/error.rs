use std::path::PathBuf;

use thiserror::Error;

/// Failures that prevent a reconstructor or its inputs from being built.
///
/// Problems inside an event (bad digits, rejected clusters, stopped tracks)
/// never surface here; they show up as absent output or as tags.
#[derive(Debug, Error)]
pub enum RecoError {
    #[error("No drift velocity / time-zero calibration supplied; coordinates cannot be computed")]
    MissingDriftCalibration,

    #[error("Calibration table '{table}' has {actual} entries, geometry requires {expected}")]
    CalibrationShape {
        table: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Failed to read config '{path}': {source}")]
    ConfigIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unsupported config file '{path}': {source}")]
    ConfigFormat {
        path: PathBuf,
        source: common::FileExtensionError,
    },

    #[error("Failed to parse config '{path}': {source}")]
    ConfigParse {
        path: PathBuf,
        source: common::SerdeFormatError,
    },
}

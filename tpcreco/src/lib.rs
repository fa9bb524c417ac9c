//! TPC hit and track reconstruction.
//!
//! This library turns the raw pad-row samples of a time projection chamber
//! into space points and tracks:
//! - Peak finding and centroiding on per-row (pad, time) signal grids
//! - Unfolding of overlapping clusters
//! - Drift-time to local-coordinate transformation with calibration hooks
//! - Row-by-row Kalman track following with seeding and shared-cluster
//!   arbitration
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tpcreco::{CalibrationSnapshot, ConstantDrift, Geometry, RecoConfig, Reconstructor};
//!
//! let geometry = Arc::new(Geometry::default());
//! let calibration = CalibrationSnapshot::uniform(&geometry, 1.0, 1.0)
//!     .with_drift(Arc::new(ConstantDrift::default()));
//! let config = RecoConfig::from_file("reco.yaml")?;
//!
//! let reco = Reconstructor::new(geometry, Arc::new(calibration), config)?;
//! let event = reco.reconstruct(&digits);
//! println!("Found {} tracks", event.tracks.len());
//! ```

mod calibration;
mod cluster;
pub mod clusterer;
mod config;
mod digit;
mod error;
mod geometry;
mod reconstruction;
mod signal_grid;
pub mod tracking;
mod transform;

#[cfg(test)]
pub mod testing;

// ============================================================================
// Detector description and inputs
// ============================================================================

pub use digit::DigitSample;
pub use geometry::{Geometry, PadRow, Side};
pub use signal_grid::{GUARD, SignalGrid};

// ============================================================================
// Calibration
// ============================================================================

pub use calibration::{
    CalibrationCache, CalibrationSnapshot, ConstantDrift, ConstantShape, DiffusionShapeModel,
    DistortionMap, DriftCalibration, ShapeModel,
};
pub use transform::{CoordinateTransform, LocalPoint};

// ============================================================================
// Clusters
// ============================================================================

pub use cluster::{Cluster, ClusterKind, ClusterRef, ClusterStore, ShapeInfo};
pub use clusterer::{ClusterFinder, ClustererConfig, ClusteringStats};

// ============================================================================
// Tracking
// ============================================================================

pub use tracking::{
    FollowDirection, StopReason, TrackState, TrackStatus, Tracker, TrackerConfig, TrackingStats,
};

// ============================================================================
// Pipeline
// ============================================================================

pub use config::RecoConfig;
pub use error::RecoError;
pub use reconstruction::{EventResult, EventStats, Reconstructor};

//! One-event pipeline: digits → clusters → seeds → tracks.

use std::sync::Arc;

use crate::calibration::CalibrationSnapshot;
use crate::cluster::ClusterStore;
use crate::clusterer::{ClusterFinder, ClusteringStats};
use crate::config::RecoConfig;
use crate::digit::DigitSample;
use crate::error::RecoError;
use crate::geometry::Geometry;
use crate::tracking::{TrackState, Tracker, TrackingStats};

/// Per-event counters from both passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventStats {
    pub clustering: ClusteringStats,
    pub tracking: TrackingStats,
}

/// Reconstruction output of one event.
#[derive(Debug, Clone)]
pub struct EventResult {
    /// All clusters, with usage counters set by the returned tracks.
    pub clusters: ClusterStore,
    /// Tracks in quality order.
    pub tracks: Vec<TrackState>,
    pub stats: EventStats,
}

/// Runs clustering and tracking for a stream of events that share geometry,
/// calibration and configuration.
#[derive(Debug, Clone)]
pub struct Reconstructor {
    finder: ClusterFinder,
    tracker: Tracker,
}

impl Reconstructor {
    /// Validates the geometry and both configurations (panicking if invalid)
    /// and fails if the calibration lacks drift information.
    pub fn new(
        geometry: Arc<Geometry>,
        calibration: Arc<CalibrationSnapshot>,
        config: RecoConfig,
    ) -> Result<Self, RecoError> {
        geometry.validate();
        config.validate();
        let finder = ClusterFinder::new(geometry.clone(), calibration, config.clusterer)?;
        let tracker = Tracker::new(geometry, config.tracker);
        Ok(Self { finder, tracker })
    }

    pub fn finder(&self) -> &ClusterFinder {
        &self.finder
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn reconstruct(&self, digits: &[DigitSample]) -> EventResult {
        let (mut clusters, clustering) = self.finder.find_event(digits);
        let (tracks, tracking) = self.tracker.reconstruct(&mut clusters);

        tracing::info!(
            "Event reconstructed: {} digits, {} clusters, {} seeds, {} tracks",
            digits.len(),
            clustering.clusters,
            tracking.seeds,
            tracking.tracks
        );
        EventResult {
            clusters,
            tracks,
            stats: EventStats {
                clustering,
                tracking,
            },
        }
    }
}

//! Cluster finding on raw pad-row signals.
//!
//! # Algorithm Overview
//!
//! 1. **Grid**: Digits of one (sector, row) are gain-equalized and
//!    zero-suppressed into a [`SignalGrid`].
//!
//! 2. **Peaks**: Local maxima of the cross neighbourhood that pass the
//!    absolute and noise-scaled amplitude gates seed clusters.
//!
//! 3. **Moments**: Charge and centroid come from the 5×5 window around each
//!    peak, with virtual charge filling sub-threshold tails.
//!
//! 4. **Shape**: Measured variances are compared with the single-hit
//!    expectation. Wide clusters are unfolded, narrow ones are treated as noise.
//!
//! Rows are independent and processed in parallel; output order is fixed by
//! (sector, row, pad, time) regardless of scheduling.

mod builder;
mod config;
mod peak;
mod unfold;


use std::sync::Arc;

pub use builder::{Moments, Window, window_moments};
pub use config::ClustererConfig;
pub use peak::{Peak, find_peaks};
pub use unfold::{UnfoldParams, UnfoldResult, unfold};

use builder::ClusterBuilder;
use common::parallel::{default_concurrency, par_map_limited};

use crate::calibration::CalibrationSnapshot;
use crate::cluster::{Cluster, ClusterKind, ClusterStore};
use crate::digit::DigitSample;
use crate::error::RecoError;
use crate::geometry::Geometry;
use crate::signal_grid::SignalGrid;
use crate::transform::CoordinateTransform;

/// Counters collected while clustering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusteringStats {
    /// Rows that had at least one digit.
    pub rows_processed: usize,
    /// Digits outside the geometry, on dead pads or with bad amplitude.
    pub dropped_digits: usize,
    pub peaks: usize,
    pub clusters: usize,
    pub unfolded: usize,
    /// Narrow clusters, whether kept or not.
    pub noise_clusters: usize,
    pub edge_clusters: usize,
}

impl ClusteringStats {
    fn merge(&mut self, other: &Self) {
        self.rows_processed += other.rows_processed;
        self.dropped_digits += other.dropped_digits;
        self.peaks += other.peaks;
        self.clusters += other.clusters;
        self.unfolded += other.unfolded;
        self.noise_clusters += other.noise_clusters;
        self.edge_clusters += other.edge_clusters;
    }
}

/// Finds clusters in one event's digits.
///
/// Holds shared read-only geometry and calibration, so one finder can serve
/// many events and many rows at once.
#[derive(Debug, Clone)]
pub struct ClusterFinder {
    geometry: Arc<Geometry>,
    calibration: Arc<CalibrationSnapshot>,
    transform: CoordinateTransform,
    config: ClustererConfig,
}

impl ClusterFinder {
    /// Fails when the calibration carries no drift information or its pad
    /// tables do not match the geometry.
    pub fn new(
        geometry: Arc<Geometry>,
        calibration: Arc<CalibrationSnapshot>,
        config: ClustererConfig,
    ) -> Result<Self, RecoError> {
        config.validate();
        calibration.check_geometry(&geometry)?;
        let transform =
            CoordinateTransform::new(geometry.clone(), &calibration, config.time_of_flight)?;
        Ok(Self {
            geometry,
            calibration,
            transform,
            config,
        })
    }

    pub fn config(&self) -> &ClustererConfig {
        &self.config
    }

    pub fn transform(&self) -> &CoordinateTransform {
        &self.transform
    }

    /// Clusters of one row in pad-major order.
    pub fn find_row(&self, grid: &SignalGrid) -> Vec<Cluster> {
        self.cluster_row(grid).0
    }

    fn cluster_row(&self, grid: &SignalGrid) -> (Vec<Cluster>, ClusteringStats) {
        let (sector, row) = (grid.sector(), grid.row());
        let noise = self.calibration.row_noise(sector, row);
        let peaks = find_peaks(grid, noise, &self.config);

        let builder = ClusterBuilder {
            grid,
            row: self.geometry.row(row),
            z_width: self.geometry.z_width(),
            transform: &self.transform,
            shape: self.calibration.shape().as_ref(),
            config: &self.config,
        };

        let mut stats = ClusteringStats {
            rows_processed: 1,
            peaks: peaks.len(),
            ..Default::default()
        };
        let mut clusters = Vec::with_capacity(peaks.len());
        for peak in &peaks {
            let Some(cluster) = builder.build(peak) else {
                stats.noise_clusters += 1;
                continue;
            };
            match cluster.kind {
                ClusterKind::Unfolded { .. } => stats.unfolded += 1,
                ClusterKind::NoiseRejected => stats.noise_clusters += 1,
                ClusterKind::Simple => {}
            }
            if cluster.edge {
                stats.edge_clusters += 1;
            }
            clusters.push(cluster);
        }
        stats.clusters = clusters.len();
        (clusters, stats)
    }

    /// Cluster a whole event.
    ///
    /// Digits are bucketed by (sector, row); digits naming a sector or row
    /// outside the geometry are dropped with a warning.
    pub fn find_event(&self, digits: &[DigitSample]) -> (ClusterStore, ClusteringStats) {
        let geo = &*self.geometry;
        let mut stats = ClusteringStats::default();
        let mut buckets: Vec<Vec<&DigitSample>> = vec![Vec::new(); geo.n_row_slots()];

        for digit in digits {
            let (sector, row) = (digit.sector as usize, digit.row as usize);
            if sector >= geo.n_sectors() || row >= geo.n_rows() {
                tracing::warn!(
                    "Dropping digit with unknown sector {} / row {}",
                    sector,
                    row
                );
                stats.dropped_digits += 1;
                continue;
            }
            buckets[geo.row_index(sector, row)].push(digit);
        }

        let tasks: Vec<usize> = (0..buckets.len())
            .filter(|&slot| !buckets[slot].is_empty())
            .collect();
        let concurrency = match self.config.max_concurrent_rows {
            0 => default_concurrency(tasks.len()),
            n => n,
        };

        let results = par_map_limited(&tasks, concurrency, |&slot| {
            let (sector, row) = (slot / geo.n_rows(), slot % geo.n_rows());
            let (grid, dropped) = SignalGrid::from_digits(
                sector,
                row,
                geo.row(row).n_pads,
                geo.n_time_bins,
                buckets[slot].iter().copied(),
                self.calibration.row_gain(sector, row),
                self.config.zero_suppression,
            );
            let (clusters, mut row_stats) = self.cluster_row(&grid);
            row_stats.dropped_digits += dropped;
            (clusters, row_stats)
        });

        let mut store = ClusterStore::new(geo);
        for (&slot, (clusters, row_stats)) in tasks.iter().zip(results) {
            stats.merge(&row_stats);
            store.set_row(slot / geo.n_rows(), slot % geo.n_rows(), clusters);
        }

        tracing::debug!(
            "Clustered {} rows: {} peaks, {} clusters ({} unfolded, {} noise, {} dropped digits)",
            stats.rows_processed,
            stats.peaks,
            stats.clusters,
            stats.unfolded,
            stats.noise_clusters,
            stats.dropped_digits
        );
        (store, stats)
    }
}

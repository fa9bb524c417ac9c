//! Row-by-row track following: predict, search the road, gate, update.

use nalgebra::{Matrix5, Vector5};

use super::config::TrackerConfig;
use super::state::{StopReason, TrackHit, TrackState, TrackStatus, UpdateOutcome};
use crate::cluster::{ClusterRef, ClusterStore};
use crate::geometry::Geometry;

/// Diagonal covariance a refit starts from.
const REFIT_VARIANCE: [f64; 5] = [4.0, 4.0, 1e-2, 1e-2, 1e-4];

/// Follows tracks through the rows of a [`ClusterStore`].
///
/// Only reads the store, so any number of tracks can be followed at once.
#[derive(Debug, Clone, Copy)]
pub struct Follower<'a> {
    geometry: &'a Geometry,
    config: &'a TrackerConfig,
}

impl<'a> Follower<'a> {
    pub fn new(geometry: &'a Geometry, config: &'a TrackerConfig) -> Self {
        Self { geometry, config }
    }

    /// Follow from the state's current row in the configured direction until
    /// the track stops. A stopped state is left as it is.
    pub fn follow(&self, state: &mut TrackState, store: &ClusterStore) {
        if state.is_stopped() {
            return;
        }
        state.status = TrackStatus::Propagating;
        let step = self.config.direction.step();

        loop {
            let next = state.row as isize + step;
            if next < 0 || next as usize >= self.geometry.n_rows() {
                state.stop(StopReason::EndOfRows);
                break;
            }
            let row = next as usize;

            if !self.step_to_row(state, row) {
                state.stop(StopReason::BendLimit);
                break;
            }

            let foundable = self.is_foundable(state, row);
            let accepted = match self.search(state, store, row) {
                Some(cluster) => self.try_update(state, store, cluster),
                None => false,
            };
            if !accepted && foundable {
                state.add_miss();
            }

            if state.missing_run > self.config.max_missing_rows {
                state.stop(StopReason::MissingRows);
                break;
            }
        }
    }

    /// Propagate to `row`, rotating into the neighbouring sector when the
    /// prediction leaves the current one, and add scattering noise.
    pub fn step_to_row(&self, state: &mut TrackState, row: usize) -> bool {
        let geo = self.geometry;
        let max_snp = self.config.max_snp;
        let x1 = state.x;
        let x2 = geo.row(row).radius;

        if !state.propagate_to(x2, max_snp) {
            return false;
        }
        if geo.sectors_per_side >= 3 && state.y().abs() > geo.sector_edge(x2) {
            let steps: isize = if state.y() > 0.0 { 1 } else { -1 };
            if !state.rotate(steps as f64 * geo.sector_angle(), max_snp) {
                return false;
            }
            let from = state.sector;
            state.sector = geo.neighbour_sector(state.sector, steps);
            tracing::trace!("Track crossed from sector {} to {}", from, state.sector);
            if !state.propagate_to(x2, max_snp) {
                return false;
            }
        }

        if self.config.multiple_scattering {
            let momentum = self.config.momentum(state.curvature(), state.tgl());
            state.add_multiple_scattering(
                x2 - x1,
                momentum,
                self.config.particle_mass,
                self.config.radiation_length,
            );
        }
        state.row = row;
        true
    }

    /// Rows whose prediction falls in the dead band at the sector or pad-row
    /// edge cannot be expected to carry a cluster.
    pub fn is_foundable(&self, state: &TrackState, row: usize) -> bool {
        let pad_row = self.geometry.row(row);
        let limit = pad_row
            .half_width()
            .min(self.geometry.sector_edge(pad_row.radius));
        state.y().abs() < limit - self.config.dead_zone
    }

    /// Nearest cluster to the prediction inside the road, in units of the
    /// road half widths.
    pub fn search(
        &self,
        state: &TrackState,
        store: &ClusterStore,
        row: usize,
    ) -> Option<ClusterRef> {
        let pad_row = self.geometry.row(row);
        let z_width = self.geometry.z_width();
        let config = self.config;

        let mut best: Option<(usize, f64)> = None;
        for (i, cluster) in store.row(state.sector, row).iter().enumerate() {
            let (ey2, ez2) = config.cluster_errors.variances(cluster, pad_row, z_width);
            let road_y =
                (config.road_sigmas * (state.cov[(0, 0)] + ey2).sqrt()).min(config.max_road_y);
            let road_z =
                (config.road_sigmas * (state.cov[(1, 1)] + ez2).sqrt()).min(config.max_road_z);
            let dy = cluster.position.y - state.y();
            let dz = cluster.position.z - state.z();
            if dy.abs() > road_y || dz.abs() > road_z {
                continue;
            }
            let distance = (dy / road_y).powi(2) + (dz / road_z).powi(2);
            if best.is_none_or(|(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }
        best.map(|(i, _)| ClusterRef::new(state.sector, row, i))
    }

    /// Gate and update with one cluster. Returns whether it was attached.
    fn try_update(&self, state: &mut TrackState, store: &ClusterStore, r: ClusterRef) -> bool {
        let cluster = store.get(r);
        let (ey2, ez2) = self.config.cluster_errors.variances(
            cluster,
            self.geometry.row(r.row as usize),
            self.geometry.z_width(),
        );
        match state.update(
            cluster.position.y,
            cluster.position.z,
            ey2,
            ez2,
            self.config.max_chi2,
            self.config.max_snp,
        ) {
            UpdateOutcome::Accepted { chi2 } => {
                state.add_hit(r, chi2);
                true
            }
            UpdateOutcome::Gated { chi2 } => {
                tracing::trace!("Cluster {:?} failed the gate, chi2 {:.2}", r, chi2);
                false
            }
            UpdateOutcome::Singular => {
                tracing::trace!("Singular innovation covariance at row {}", r.row);
                false
            }
        }
    }

    /// Refit through the track's own clusters, last to first, from a reset
    /// covariance. `None` when the trajectory cannot be propagated through
    /// the hits or any hit fails to update, so the caller keeps the track
    /// with exactly the hits it already counted.
    pub fn refit(&self, track: &TrackState, store: &ClusterStore) -> Option<TrackState> {
        let geo = self.geometry;
        let max_snp = self.config.max_snp;

        let mut state = TrackState::new(
            track.sector,
            track.row,
            track.x,
            track.params,
            Matrix5::from_diagonal(&Vector5::from(REFIT_VARIANCE)),
        );
        state.status = TrackStatus::Propagating;

        let mut hits = Vec::with_capacity(track.hits.len());
        for hit in track.hits.iter().rev() {
            let cluster = store.get(hit.cluster);
            let sector = cluster.sector as usize;
            if sector != state.sector {
                let steps = if geo.neighbour_sector(state.sector, 1) == sector {
                    1
                } else if geo.neighbour_sector(state.sector, -1) == sector {
                    -1
                } else {
                    return None;
                };
                if !state.rotate(steps as f64 * geo.sector_angle(), max_snp) {
                    return None;
                }
                state.sector = sector;
            }

            let row = hit.cluster.row as usize;
            let x1 = state.x;
            if !state.propagate_to(geo.row(row).radius, max_snp) {
                return None;
            }
            if self.config.multiple_scattering {
                let momentum = self.config.momentum(state.curvature(), state.tgl());
                state.add_multiple_scattering(
                    state.x - x1,
                    momentum,
                    self.config.particle_mass,
                    self.config.radiation_length,
                );
            }
            state.row = row;

            let (ey2, ez2) = self
                .config
                .cluster_errors
                .variances(cluster, geo.row(row), geo.z_width());
            match state.update(
                cluster.position.y,
                cluster.position.z,
                ey2,
                ez2,
                f64::INFINITY,
                max_snp,
            ) {
                UpdateOutcome::Accepted { chi2 } => hits.push(TrackHit {
                    cluster: hit.cluster,
                    chi2,
                }),
                outcome => {
                    tracing::trace!("Refit rejected {:?}: {:?}", hit.cluster, outcome);
                    return None;
                }
            }
        }

        hits.reverse();
        state.chi2 = hits.iter().map(|h| h.chi2).sum();
        state.hits = hits;
        state.n_foundable = track.n_foundable;
        state.status = track.status;
        Some(state)
    }
}

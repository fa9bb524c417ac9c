//! Row-by-row Kalman track following.
//!
//! # Algorithm Overview
//!
//! 1. **Seeding**: Cluster triplets in the first rows of the follow
//!    direction give initial parameters and a diagonal covariance.
//!
//! 2. **Phase 1 (parallel)**: Every seed is followed independently through
//!    the rows: predict on the helix, search the road, gate on χ², update.
//!
//! 3. **Phase 2 (sequential)**: Candidates are ranked by quality. Clusters
//!    claimed by several tracks go to the best one; tracks sharing too much
//!    or left too short are dropped.
//!
//! 4. **Phase 3 (parallel, optional)**: Survivors are refitted through their
//!    own clusters from a reset covariance.

mod arbitration;
mod config;
mod follower;
mod seeding;
mod state;

#[cfg(test)]
mod tests;

use std::sync::Arc;

pub use arbitration::{ArbitrationStats, quality_order, resolve_shared};
pub use config::{B2C, ClusterErrorConfig, FollowDirection, TrackerConfig};
pub use follower::Follower;
pub use seeding::{anchor_rows, circle_curvature, find_seeds};
pub use state::{StopReason, TrackHit, TrackState, TrackStatus, UpdateOutcome};

use common::parallel::{default_concurrency, par_map_limited};

use crate::cluster::ClusterStore;
use crate::geometry::Geometry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackingStats {
    pub seeds: usize,
    pub arbitration: ArbitrationStats,
    /// Refits that could not propagate or update; the unrefitted track is kept.
    pub refit_failures: usize,
    pub tracks: usize,
}

#[derive(Debug, Clone)]
pub struct Tracker {
    geometry: Arc<Geometry>,
    config: TrackerConfig,
}

impl Tracker {
    pub fn new(geometry: Arc<Geometry>, config: TrackerConfig) -> Self {
        config.validate();
        Self { geometry, config }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn follower(&self) -> Follower<'_> {
        Follower::new(&self.geometry, &self.config)
    }

    pub fn find_seeds(&self, store: &ClusterStore) -> Vec<TrackState> {
        find_seeds(store, &self.geometry, &self.config)
    }

    fn concurrency(&self, len: usize) -> usize {
        match self.config.max_concurrent_tracks {
            0 => default_concurrency(len),
            n => n,
        }
    }

    /// Seed and track one event. Cluster usage counters end up counting the
    /// returned tracks.
    pub fn reconstruct(&self, store: &mut ClusterStore) -> (Vec<TrackState>, TrackingStats) {
        let seeds = self.find_seeds(store);
        self.run(store, seeds)
    }

    /// Follow, arbitrate and optionally refit the given seeds.
    pub fn run(
        &self,
        store: &mut ClusterStore,
        seeds: Vec<TrackState>,
    ) -> (Vec<TrackState>, TrackingStats) {
        let mut stats = TrackingStats {
            seeds: seeds.len(),
            ..Default::default()
        };
        let follower = self.follower();

        // Phase 1: independent following
        let candidates = {
            let store = &*store;
            par_map_limited(&seeds, self.concurrency(seeds.len()), |seed| {
                let mut state = seed.clone();
                follower.follow(&mut state, store);
                state
            })
        };

        // Phase 2: shared-cluster arbitration
        store.reset_usage();
        let (kept, arbitration) = resolve_shared(
            candidates,
            store,
            self.config.max_shared_fraction,
            self.config.min_clusters,
        );
        stats.arbitration = arbitration;

        // Phase 3: refit
        let tracks = if self.config.refit {
            let store = &*store;
            let refitted = par_map_limited(&kept, self.concurrency(kept.len()), |track| {
                follower.refit(track, store)
            });
            kept.into_iter()
                .zip(refitted)
                .map(|(track, refit)| match refit {
                    Some(refit) => refit,
                    None => {
                        stats.refit_failures += 1;
                        track
                    }
                })
                .collect()
        } else {
            kept
        };

        stats.tracks = tracks.len();
        tracing::debug!(
            "Tracking: {} seeds -> {} tracks ({} refit failures)",
            stats.seeds,
            stats.tracks,
            stats.refit_failures
        );
        (tracks, stats)
    }
}

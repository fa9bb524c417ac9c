//! Shared-cluster resolution between followed tracks.
//!
//! Sequential by nature: whether a track keeps a cluster depends on which
//! better tracks were kept before it.

use std::cmp::Ordering;

use super::state::TrackState;
use crate::cluster::ClusterStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArbitrationStats {
    /// Tracks dropped for sharing too much with better tracks.
    pub dropped_shared: usize,
    /// Tracks left with too few clusters.
    pub dropped_short: usize,
    /// Clusters removed from kept tracks because a better track owns them.
    pub detached: usize,
}

/// Better tracks first: more clusters, then lower χ²/ndf.
pub fn quality_order(a: &TrackState, b: &TrackState) -> Ordering {
    b.n_clusters()
        .cmp(&a.n_clusters())
        .then_with(|| a.chi2_per_ndf().total_cmp(&b.chi2_per_ndf()))
}

/// Keep tracks in quality order, giving each cluster to the best track that
/// claims it. The store's usage counters record the ownership; they must be
/// zero on entry.
///
/// Returned tracks are in quality order; ties keep the input order.
pub fn resolve_shared(
    candidates: Vec<TrackState>,
    store: &mut ClusterStore,
    max_shared_fraction: f64,
    min_clusters: usize,
) -> (Vec<TrackState>, ArbitrationStats) {
    let mut stats = ArbitrationStats::default();
    let mut ranked: Vec<(usize, TrackState)> = candidates.into_iter().enumerate().collect();
    ranked.sort_by(|(ia, a), (ib, b)| quality_order(a, b).then(ia.cmp(ib)));

    let mut kept = Vec::with_capacity(ranked.len());
    for (_, mut track) in ranked {
        let total = track.n_clusters();
        let shared = track
            .hits
            .iter()
            .filter(|h| store.get(h.cluster).usage() > 0)
            .count();

        if total == 0 || shared as f64 > max_shared_fraction * total as f64 {
            stats.dropped_shared += usize::from(total > 0);
            stats.dropped_short += usize::from(total == 0);
            continue;
        }

        if shared > 0 {
            track.hits.retain(|h| store.get(h.cluster).usage() == 0);
            track.chi2 = track.hits.iter().map(|h| h.chi2).sum();
            stats.detached += shared;
        }

        if track.n_clusters() < min_clusters {
            stats.dropped_short += 1;
            continue;
        }

        for hit in &track.hits {
            store.increment_usage(hit.cluster);
        }
        kept.push(track);
    }

    tracing::debug!(
        "Arbitration kept {} tracks ({} shared, {} short, {} clusters detached)",
        kept.len(),
        stats.dropped_shared,
        stats.dropped_short,
        stats.detached
    );
    (kept, stats)
}

use std::sync::Arc;

use common::FileFormat;
use common::float_ext::FloatExt;
use nalgebra::{Matrix5, Vector5};

use super::*;
use crate::cluster::{Cluster, ClusterRef, ClusterStore};
use crate::testing::{helix_clusters, helix_state, tracking_geometry};
use crate::transform::LocalPoint;

const TRACK_A: [f64; 5] = [2.0, 50.0, 0.05, 0.3, 0.002];
const TRACK_B: [f64; 5] = [-8.0, 120.0, -0.1, 0.4, -0.001];

fn assert_psd(cov: &Matrix5<f64>, context: &str) {
    let scale = cov.abs().max().max(1e-300);
    let asym = (cov - cov.transpose()).abs().max();
    assert!(asym <= 1e-12 * scale, "{}: covariance not symmetric ({})", context, asym);
    let eigen = cov.symmetric_eigen();
    for e in eigen.eigenvalues.iter() {
        assert!(*e >= -1e-9 * scale, "{}: negative eigenvalue {}", context, e);
    }
}

// ============================================================================
// Track state
// ============================================================================

#[test]
fn test_propagation_follows_the_circle() {
    let (y, z, snp, tgl, c) = (2.0, 10.0, 0.1, 0.5, 0.01);
    let params = Vector5::new(y, z, snp, tgl, c);
    let mut state = TrackState::new(0, 0, 100.0, params, Matrix5::identity() * 0.01);

    // centre of the circle in the local frame
    let cos_phi = (1.0 - snp * snp).sqrt();
    let (x0, y0) = (100.0 - snp / c, y + cos_phi / c);
    let radius = 1.0 / c;

    for x2 in [110.0, 90.0] {
        let mut s = state.clone();
        assert!(s.propagate_to(x2, 0.85));
        let expected_y = y0 - (radius * radius - (x2 - x0).powi(2)).sqrt();
        assert!(s.y().approx_eq_eps(expected_y, 1e-9), "y at {}: {} vs {}", x2, s.y(), expected_y);
        let f2 = snp + c * (x2 - 100.0);
        assert!(s.snp().approximately_eq(f2));
        let arc = (f2.asin() - snp.asin()) / c;
        assert!(
            s.z().approx_eq_eps(z + tgl * arc, 1e-6),
            "z at {}: {} vs {}",
            x2,
            s.z(),
            z + tgl * arc
        );
        assert_psd(&s.cov, "after propagation");
    }

    // short steps use the small-angle path length
    let mut s = state.clone();
    assert!(s.propagate_to(103.0, 0.85));
    let arc = ((snp + 0.03f64).asin() - snp.asin()) / c;
    assert!(s.z().approx_eq_eps(z + tgl * arc, 1e-3));

    // there and back again
    assert!(state.propagate_to(120.0, 0.85));
    assert!(state.propagate_to(100.0, 0.85));
    assert!(state.y().approx_eq_eps(y, 1e-9));
    assert!(state.z().approx_eq_eps(z, 1e-9));
}

#[test]
fn test_propagation_refuses_steep_bends() {
    let params = Vector5::new(0.0, 0.0, 0.8, 0.0, 0.01);
    let mut state = TrackState::new(0, 0, 100.0, params, Matrix5::identity());
    let before = state.clone();
    assert!(!state.propagate_to(110.0, 0.85), "sin phi would reach 0.9");
    assert_eq!(state, before, "refused propagation leaves the state untouched");
    assert!(state.propagate_to(103.0, 0.85));
}

#[test]
fn test_stopped_state_is_read_only() {
    let params = Vector5::new(0.0, 0.0, 0.1, 0.0, 0.0);
    let mut state = TrackState::new(0, 0, 100.0, params, Matrix5::identity());
    state.stop(StopReason::EndOfRows);
    state.stop(StopReason::MissingRows);
    assert_eq!(state.status, TrackStatus::Stopped(StopReason::EndOfRows));
    assert!(!state.propagate_to(101.0, 0.85));
    assert_eq!(state.x, 100.0);
    assert_eq!(state.status.to_string(), "Stopped");
}

#[test]
fn test_rotation_keeps_global_position() {
    let params = Vector5::new(5.0, 20.0, 0.2, 0.1, 0.003);
    let mut state = TrackState::new(0, 0, 100.0, params, Matrix5::identity() * 0.01);
    let alpha = 0.4;
    let before = LocalPoint::new(state.x, state.y(), state.z()).to_global(alpha);

    assert!(state.rotate(0.3, 0.85));
    let after = LocalPoint::new(state.x, state.y(), state.z()).to_global(alpha + 0.3);
    for (a, b) in before.iter().zip(after.iter()) {
        assert!(a.approx_eq_eps(*b, 1e-9), "{:?} vs {:?}", before, after);
    }
    assert!(state.snp().approx_eq_eps((0.2f64.asin() - 0.3).sin(), 1e-12));
    assert_psd(&state.cov, "after rotation");

    assert!(state.rotate(-0.3, 0.85));
    assert!(state.y().approx_eq_eps(5.0, 1e-9));
    assert!(state.x.approx_eq_eps(100.0, 1e-9));
    assert!(state.snp().approx_eq_eps(0.2, 1e-12));
}

#[test]
fn test_update_moves_towards_measurement() {
    let cov = Matrix5::from_diagonal(&Vector5::new(0.01, 0.01, 1e-4, 1e-4, 1e-6));
    let mut state = TrackState::new(0, 0, 100.0, Vector5::new(0.0, 0.0, 0.0, 0.0, 0.0), cov);

    let predicted = state.predicted_chi2(0.1, 0.0, 0.01, 0.01).unwrap();
    let outcome = state.update(0.1, 0.0, 0.01, 0.01, 30.0, 0.85);
    assert_eq!(outcome, UpdateOutcome::Accepted { chi2: predicted });
    assert!(predicted.approximately_eq(0.5));
    assert!(state.y().approximately_eq(0.05));
    assert!(state.cov[(0, 0)].approximately_eq(0.005));
    assert_psd(&state.cov, "after update");

    let gated = state.update(5.0, 0.0, 0.01, 0.01, 30.0, 0.85);
    assert!(matches!(gated, UpdateOutcome::Gated { chi2 } if chi2 > 30.0));
    assert!(state.y().approximately_eq(0.05), "gated update changes nothing");
}

#[test]
fn test_singular_innovation_is_a_rejection() {
    let mut state = TrackState::new(0, 0, 100.0, Vector5::zeros(), Matrix5::zeros());
    let before = state.clone();
    assert_eq!(state.update(0.1, 0.1, 0.0, 0.0, 30.0, 0.85), UpdateOutcome::Singular);
    assert_eq!(state, before);
    assert!(state.predicted_chi2(0.1, 0.1, 0.0, 0.0).is_none());
}

#[test]
fn test_covariance_stays_positive() {
    let geometry = tracking_geometry();
    let config = TrackerConfig::default();
    let start = helix_state(&geometry, 0, 39, TRACK_A);
    let mut store = ClusterStore::new(&geometry);
    let refs = helix_clusters(&geometry, &config, &start, false, Some((0.05, 7)), &mut store);
    assert_eq!(refs.len(), 39);

    let follower = Follower::new(&geometry, &config);
    let mut state = start.clone();
    for r in refs {
        assert!(follower.step_to_row(&mut state, r.row as usize));
        assert_psd(&state.cov, "after propagation");
        let cluster = store.get(r);
        let (ey2, ez2) = config
            .cluster_errors
            .variances(cluster, geometry.row(r.row as usize), geometry.z_width());
        state.update(cluster.position.y, cluster.position.z, ey2, ez2, 1e9, 0.99);
        assert_psd(&state.cov, "after update");
    }
}

// ============================================================================
// Following
// ============================================================================

#[test]
fn test_exact_helix_has_zero_chi2() {
    common::log_setup::setup_test_logging();
    let geometry = tracking_geometry();
    let config = TrackerConfig::default();
    let start = helix_state(&geometry, 0, 39, TRACK_A);
    let mut store = ClusterStore::new(&geometry);
    let refs = helix_clusters(&geometry, &config, &start, false, None, &mut store);

    let mut state = start.clone();
    Follower::new(&geometry, &config).follow(&mut state, &store);

    assert_eq!(state.status, TrackStatus::Stopped(StopReason::EndOfRows));
    assert_eq!(state.n_clusters(), refs.len(), "every row accepted");
    assert!(state.chi2 < 1e-9, "chi2 {}", state.chi2);
    assert_eq!(state.n_foundable, 39);
    assert_eq!(state.found_ratio(), 1.0);
    let attached: Vec<ClusterRef> = state.hits.iter().map(|h| h.cluster).collect();
    assert_eq!(attached, refs);
    assert_eq!(state.row, 0);
}

#[test]
fn test_track_crosses_into_neighbour_sector() {
    let geometry = tracking_geometry();
    let config = TrackerConfig::default();
    let start = helix_state(&geometry, 0, 39, [18.0, 50.0, -0.3, 0.2, 0.0]);
    let mut store = ClusterStore::new(&geometry);
    let refs = helix_clusters(&geometry, &config, &start, false, None, &mut store);
    assert_eq!(refs.len(), 39);
    assert_eq!(refs.first().map(|r| r.sector), Some(0));
    assert_eq!(refs.last().map(|r| r.sector), Some(1), "generator crossed the edge");

    let mut state = start.clone();
    Follower::new(&geometry, &config).follow(&mut state, &store);
    assert_eq!(state.sector, 1);
    assert_eq!(state.n_clusters(), 39);
    assert!(state.chi2 < 1e-9);
    assert!(state.y().abs() < 5.0, "ends near the centre of sector 1, y = {}", state.y());
}

#[test]
fn test_missing_rows_stop_the_track() {
    let geometry = tracking_geometry();
    let config = TrackerConfig::default();
    let start = helix_state(&geometry, 0, 39, TRACK_A);
    let mut full = ClusterStore::new(&geometry);
    helix_clusters(&geometry, &config, &start, false, None, &mut full);

    let mut store = ClusterStore::new(&geometry);
    for (r, cluster) in full.iter() {
        if r.row >= 30 {
            store.push(cluster.clone());
        }
    }

    let mut state = start.clone();
    Follower::new(&geometry, &config).follow(&mut state, &store);
    assert_eq!(state.status, TrackStatus::Stopped(StopReason::MissingRows));
    assert_eq!(state.n_clusters(), 9);
    assert_eq!(state.missing_run, config.max_missing_rows + 1);
    assert_eq!(state.n_foundable, 9 + config.max_missing_rows + 1);
    assert_eq!(state.row, 29 - config.max_missing_rows);
}

#[test]
fn test_refit_never_drops_a_counted_hit() {
    let geometry = tracking_geometry();
    let config = TrackerConfig::default();
    let start = helix_state(&geometry, 0, 39, TRACK_A);
    let mut store = ClusterStore::new(&geometry);
    let refs = helix_clusters(&geometry, &config, &start, false, None, &mut store);

    let mut track = start.clone();
    let follower = Follower::new(&geometry, &config);
    follower.follow(&mut track, &store);
    assert_eq!(track.n_clusters(), refs.len());

    let refit = follower.refit(&track, &store).expect("clean hits refit");
    assert_eq!(refit.hits.len(), track.hits.len());

    // a cluster the refit cannot use must not vanish from the track
    let broken = refs[20];
    let mut cluster = store.get(broken).clone();
    cluster.position.y = f64::NAN;
    store.set_row(broken.sector as usize, broken.row as usize, vec![cluster]);
    assert!(follower.refit(&track, &store).is_none());
}

#[test]
fn test_bend_limit_stops_the_track() {
    let geometry = tracking_geometry();
    let config = TrackerConfig {
        max_missing_rows: 100,
        ..TrackerConfig::default()
    };
    let mut state = helix_state(&geometry, 0, 39, [0.0, 50.0, -0.7, 0.0, 0.01]);
    let store = ClusterStore::new(&geometry);
    Follower::new(&geometry, &config).follow(&mut state, &store);
    assert_eq!(state.status, TrackStatus::Stopped(StopReason::BendLimit));
}

// ============================================================================
// Seeding, arbitration, tracker
// ============================================================================

#[test]
fn test_seeding_recovers_helix_parameters() {
    let geometry = tracking_geometry();
    let config = TrackerConfig::default();
    let start = helix_state(&geometry, 0, 39, TRACK_A);
    let mut store = ClusterStore::new(&geometry);
    helix_clusters(&geometry, &config, &start, true, None, &mut store);

    assert_eq!(anchor_rows(&geometry, &config), vec![39, 29, 19]);
    let seeds = find_seeds(&store, &geometry, &config);
    assert_eq!(seeds.len(), 3, "one seed per anchor row");

    let seed = &seeds[0];
    assert_eq!((seed.sector, seed.row), (0, 39));
    assert_eq!(seed.status, TrackStatus::Seeded);
    assert_eq!(seed.n_clusters(), 1);
    assert!(seed.y().approx_eq_eps(TRACK_A[0], 1e-9));
    assert!(seed.z().approx_eq_eps(TRACK_A[1], 1e-9));
    assert!(seed.snp().approx_eq_eps(TRACK_A[2], 1e-6), "snp {}", seed.snp());
    assert!(seed.tgl().approx_eq_eps(TRACK_A[3], 1e-5), "tgl {}", seed.tgl());
    assert!(seed.curvature().approx_eq_eps(TRACK_A[4], 1e-7), "C {}", seed.curvature());
    assert_psd(&seed.cov, "seed");
}

#[test]
fn test_circle_curvature_sign() {
    // counter-clockwise with increasing x
    let p0 = LocalPoint::new(0.0, 0.0, 0.0);
    let p1 = LocalPoint::new(1.0, 0.0, 0.0);
    let p2 = LocalPoint::new(2.0, 0.0, 0.0);
    assert_eq!(circle_curvature(&p0, &p1, &p2), 0.0);

    let r = 50.0f64;
    let on_circle = |x: f64| LocalPoint::new(x, r - (r * r - x * x).sqrt(), 0.0);
    let c = circle_curvature(&on_circle(-5.0), &on_circle(0.0), &on_circle(5.0));
    assert!(c.approx_eq_eps(1.0 / r, 1e-12), "curvature {}", c);
    let mirrored = |x: f64| LocalPoint::new(x, -(r - (r * r - x * x).sqrt()), 0.0);
    let c = circle_curvature(&mirrored(-5.0), &mirrored(0.0), &mirrored(5.0));
    assert!(c.approx_eq_eps(-1.0 / r, 1e-12));
}

fn arbitration_store() -> (ClusterStore, Vec<ClusterRef>) {
    let geometry = tracking_geometry();
    let mut store = ClusterStore::new(&geometry);
    let refs = (0..9)
        .map(|row| {
            let point = LocalPoint::new(geometry.row(row).radius, 0.0, 10.0);
            store.push(Cluster::at_position(0, row, point, 100.0))
        })
        .collect();
    (store, refs)
}

fn candidate(refs: &[ClusterRef]) -> TrackState {
    let mut state = TrackState::new(0, 0, 85.0, Vector5::zeros(), Matrix5::identity());
    for &r in refs {
        state.add_hit(r, 1.0);
    }
    state.stop(StopReason::EndOfRows);
    state
}

#[test]
fn test_arbitration_gives_clusters_to_better_tracks() {
    let (mut store, refs) = arbitration_store();
    let short = candidate(&refs[0..3]);
    let best = candidate(&refs[0..7]);
    let partial = candidate(&refs[5..9]);

    let (kept, stats) = resolve_shared(vec![short, partial, best], &mut store, 0.5, 2);
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].n_clusters(), 7, "best track first");
    assert_eq!(kept[1].n_clusters(), 2, "shared clusters detached");
    assert_eq!(kept[1].chi2, 2.0);
    let left: Vec<ClusterRef> = kept[1].hits.iter().map(|h| h.cluster).collect();
    assert_eq!(left, refs[7..9].to_vec());

    assert_eq!(stats.dropped_shared, 1);
    assert_eq!(stats.detached, 2);
    assert_eq!(stats.dropped_short, 0);
    for r in &refs {
        assert_eq!(store.get(*r).usage(), 1, "each cluster owned once");
    }
}

#[test]
fn test_arbitration_drops_short_tracks() {
    let (mut store, refs) = arbitration_store();
    let (kept, stats) = resolve_shared(vec![candidate(&refs[0..3])], &mut store, 0.5, 5);
    assert!(kept.is_empty());
    assert_eq!(stats.dropped_short, 1);
    assert_eq!(store.get(refs[0]).usage(), 0);
}

#[test]
fn test_tracker_resolves_duplicate_seeds() {
    common::log_setup::setup_test_logging();
    let geometry = Arc::new(tracking_geometry());
    let config = TrackerConfig::default();
    let start = helix_state(&geometry, 0, 39, TRACK_A);
    let mut store = ClusterStore::new(&geometry);
    helix_clusters(&geometry, &config, &start, true, None, &mut store);

    let tracker = Tracker::new(geometry.clone(), config);
    let (tracks, stats) = tracker.reconstruct(&mut store);

    assert_eq!(stats.seeds, 3);
    assert_eq!(stats.arbitration.dropped_shared, 2);
    assert_eq!(stats.refit_failures, 0);
    assert_eq!(tracks.len(), 1);

    let track = &tracks[0];
    assert_eq!(track.n_clusters(), 40);
    assert!(track.chi2 < 1e-4, "chi2 {}", track.chi2);
    // refit runs back to the first cluster
    assert_eq!(track.row, 39);
    assert!(track.y().approx_eq_eps(TRACK_A[0], 1e-6));
    assert!(track.z().approx_eq_eps(TRACK_A[1], 1e-4));
    assert!(track.curvature().approx_eq_eps(TRACK_A[4], 1e-6));
    assert!(store.iter().all(|(_, c)| c.usage() == 1));
}

#[test]
fn test_tracking_is_deterministic() {
    let geometry = Arc::new(tracking_geometry());
    let base = TrackerConfig::default();
    let mut store = ClusterStore::new(&geometry);
    for (params, seed) in [(TRACK_A, 11), (TRACK_B, 12)] {
        let start = helix_state(&geometry, 0, 39, params);
        helix_clusters(&geometry, &base, &start, true, Some((0.01, seed)), &mut store);
    }

    let run = |config: TrackerConfig| {
        let mut store = store.clone();
        Tracker::new(geometry.clone(), config).reconstruct(&mut store)
    };
    let (a, stats_a) = run(base.clone());
    let (b, stats_b) = run(TrackerConfig {
        max_concurrent_tracks: 1,
        ..base.clone()
    });

    assert_eq!(stats_a, stats_b);
    assert_eq!(a, b);
    assert_eq!(a.len(), 2);
    for track in &a {
        assert!(track.n_clusters() >= 38, "{} clusters", track.n_clusters());
        assert!(track.chi2_per_ndf() < 1.0);
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_tracker_presets_are_valid() {
    TrackerConfig::default().validate();
    TrackerConfig::high_occupancy().validate();
    TrackerConfig::cosmics().validate();
}

#[test]
fn test_momentum_from_curvature() {
    let config = TrackerConfig::default();
    let c = B2C * config.magnetic_field;
    assert!(config.momentum(c, 0.0).approx_eq_eps(1.0, 1e-12));
    assert!(config.momentum(-c, 0.75).approx_eq_eps(1.25, 1e-12));
    assert_eq!(TrackerConfig::cosmics().momentum(0.01, 0.0), 10.0);
}

#[test]
fn test_tracker_config_yaml_round_trip() {
    let config = TrackerConfig {
        direction: FollowDirection::Outward,
        ..TrackerConfig::cosmics()
    };
    let text = common::serialize(&config, FileFormat::Yaml).unwrap();
    let back: TrackerConfig = common::deserialize(&text, FileFormat::Yaml).unwrap();
    assert_eq!(back, config);
}

//! Synthetic detector, calibration and event generators for tests.

use std::sync::Arc;

use nalgebra::{Matrix5, Vector5};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::calibration::{CalibrationSnapshot, ConstantDrift, ConstantShape};
use crate::cluster::{Cluster, ClusterRef, ClusterStore};
use crate::digit::DigitSample;
use crate::geometry::Geometry;
use crate::tracking::{Follower, TrackState, TrackerConfig};
use crate::transform::LocalPoint;

/// Single-hit width used by the synthetic generators (bins).
pub const HIT_SIGMA: f64 = 0.8;

/// Two sectors per side, eight rows of 48 pads at 85..92 cm, 120 time bins.
pub fn small_geometry() -> Geometry {
    Geometry::uniform(2, 8, 85.0, 48, 120)
}

/// Unit gain and noise, nominal drift, and a fixed shape model that matches
/// hits of width [`HIT_SIGMA`].
pub fn calibration(geometry: &Geometry) -> CalibrationSnapshot {
    CalibrationSnapshot::uniform(geometry, 1.0, 1.0)
        .with_drift(Arc::new(ConstantDrift::default()))
        .with_shape_model(Arc::new(ConstantShape {
            pad_variance: HIT_SIGMA * HIT_SIGMA,
            time_variance: HIT_SIGMA * HIT_SIGMA,
        }))
}

/// Gaussian hit sampled at bin centres, four bins in each direction.
/// Samples that would fall outside `[0, n_pads) × [0, n_time_bins)` are skipped.
#[allow(clippy::too_many_arguments)]
pub fn gaussian_hit(
    sector: usize,
    row: usize,
    pad: f64,
    time: f64,
    sigma: f64,
    amplitude: f64,
    n_pads: usize,
    n_time_bins: usize,
) -> Vec<DigitSample> {
    let mut digits = Vec::new();
    let (p0, t0) = (pad.round() as i32, time.round() as i32);
    for p in p0 - 4..=p0 + 4 {
        for t in t0 - 4..=t0 + 4 {
            if p < 0 || t < 0 || p as usize >= n_pads || t as usize >= n_time_bins {
                continue;
            }
            let dp = p as f64 - pad;
            let dt = t as f64 - time;
            let value = amplitude * (-(dp * dp + dt * dt) / (2.0 * sigma * sigma)).exp();
            if value >= 0.01 {
                digits.push(DigitSample::new(sector, row, p, t, value as f32));
            }
        }
    }
    digits
}

pub fn total_amplitude(digits: &[DigitSample]) -> f64 {
    digits.iter().map(|d| d.amplitude as f64).sum()
}

// ============================================================================
// Tracks
// ============================================================================

/// 18 sectors per side, 40 rows of 60 pads from 85 to 124 cm.
pub fn tracking_geometry() -> Geometry {
    Geometry::uniform(18, 40, 85.0, 60, 500)
}

/// Seed-like state at `row` of `sector` with a small diagonal covariance.
pub fn helix_state(geometry: &Geometry, sector: usize, row: usize, params: [f64; 5]) -> TrackState {
    let cov = Matrix5::from_diagonal(&Vector5::new(0.01, 0.01, 1e-4, 1e-4, 1e-6));
    TrackState::new(
        sector,
        row,
        geometry.row(row).radius,
        Vector5::from(params),
        cov,
    )
}

/// Box-Muller normal deviate.
pub fn gaussian(rng: &mut StdRng, sigma: f64) -> f64 {
    let u1: f64 = rng.random::<f64>().max(1e-12);
    let u2: f64 = rng.random::<f64>();
    sigma * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Walks `start` along its helix in the configured direction, crossing sectors
/// the way the follower does, and stores one cluster per row on the
/// trajectory (plus `noise` Gaussian smearing in y and z). With
/// `include_start` the starting row gets a cluster too.
pub fn helix_clusters(
    geometry: &Geometry,
    config: &TrackerConfig,
    start: &TrackState,
    include_start: bool,
    noise: Option<(f64, u64)>,
    store: &mut ClusterStore,
) -> Vec<ClusterRef> {
    let follower = Follower::new(geometry, config);
    let mut rng = StdRng::seed_from_u64(noise.map_or(0, |(_, seed)| seed));
    let sigma = noise.map_or(0.0, |(s, _)| s);
    let mut state = start.clone();
    let mut refs = Vec::new();

    let mut push = |state: &TrackState, rng: &mut StdRng| {
        let y = state.y() + if sigma > 0.0 { gaussian(rng, sigma) } else { 0.0 };
        let z = state.z() + if sigma > 0.0 { gaussian(rng, sigma) } else { 0.0 };
        let point = LocalPoint::new(state.x, y, z);
        refs.push(store.push(Cluster::at_position(state.sector, state.row, point, 100.0)));
    };

    if include_start {
        push(&state, &mut rng);
    }
    let step = config.direction.step();
    loop {
        let next = state.row as isize + step;
        if next < 0 || next as usize >= geometry.n_rows() {
            break;
        }
        if !follower.step_to_row(&mut state, next as usize) {
            break;
        }
        push(&state, &mut rng);
    }
    refs
}

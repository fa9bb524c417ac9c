//! Track seeds from cluster triplets.
//!
//! For each anchor row `r` the seeder combines clusters in rows `r`,
//! `r + g·s` and `r + 2g·s` (`s` the follow step), fits a circle through
//! their (x, y) positions and derives the five track parameters at the
//! anchor cluster. Seeds come out ordered by sector, anchor row, and
//! anchor cluster index.

use std::collections::HashSet;

use nalgebra::{Matrix5, Vector5};

use super::config::TrackerConfig;
use super::state::TrackState;
use crate::cluster::{Cluster, ClusterRef, ClusterStore};
use crate::geometry::Geometry;
use crate::transform::LocalPoint;

/// Anchor rows in seeding order; anchors whose triplet would leave the
/// chamber are skipped.
pub fn anchor_rows(geometry: &Geometry, config: &TrackerConfig) -> Vec<usize> {
    let n_rows = geometry.n_rows() as isize;
    let step = config.direction.step();
    let span = 2 * config.seed_gap as isize * step;
    let start = if step < 0 { n_rows - 1 } else { 0 };

    (0..config.seed_anchor_rows as isize)
        .map(|k| start - step * k * config.seed_anchor_step as isize)
        .filter(|&r| r >= 0 && r < n_rows && r + span >= 0 && r + span < n_rows)
        .map(|r| r as usize)
        .collect()
}

pub fn find_seeds(
    store: &ClusterStore,
    geometry: &Geometry,
    config: &TrackerConfig,
) -> Vec<TrackState> {
    let anchors = anchor_rows(geometry, config);
    let mut seeds = Vec::new();

    for sector in 0..geometry.n_sectors() {
        let mut taken: HashSet<ClusterRef> = HashSet::new();
        for &anchor in &anchors {
            seed_sector_row(store, geometry, config, sector, anchor, &mut taken, &mut seeds);
        }
    }

    tracing::debug!("Found {} seeds from {} anchor rows", seeds.len(), anchors.len());
    seeds
}

fn seed_sector_row(
    store: &ClusterStore,
    geometry: &Geometry,
    config: &TrackerConfig,
    sector: usize,
    anchor: usize,
    taken: &mut HashSet<ClusterRef>,
    seeds: &mut Vec<TrackState>,
) {
    let gap = config.seed_gap as isize * config.direction.step();
    let row_b = (anchor as isize + gap) as usize;
    let row_c = (anchor as isize + 2 * gap) as usize;
    let x_b = geometry.row(row_b).radius;

    for (ia, a) in store.row(sector, anchor).iter().enumerate() {
        let ref_a = ClusterRef::new(sector, anchor, ia);
        if taken.contains(&ref_a) {
            continue;
        }

        for (ic, c) in store.row(sector, row_c).iter().enumerate() {
            let ref_c = ClusterRef::new(sector, row_c, ic);
            if taken.contains(&ref_c) {
                continue;
            }
            let (pa, pc) = (a.position, c.position);
            let dx = pc.x - pa.x;
            if dx.abs() < 1e-6 || ((pc.z - pa.z) / dx).abs() > config.seed_max_dzdx {
                continue;
            }

            // middle cluster near the straight line through the outer two
            let t = (x_b - pa.x) / dx;
            let y_mid = pa.y + t * (pc.y - pa.y);
            let z_mid = pa.z + t * (pc.z - pa.z);
            let middle = store
                .row(sector, row_b)
                .iter()
                .enumerate()
                .filter(|(ib, _)| !taken.contains(&ClusterRef::new(sector, row_b, *ib)))
                .filter_map(|(ib, b)| {
                    let dy = (b.position.y - y_mid) / config.seed_road_y;
                    let dz = (b.position.z - z_mid) / config.seed_road_z;
                    (dy.abs() < 1.0 && dz.abs() < 1.0).then_some((ib, b, dy * dy + dz * dz))
                })
                .min_by(|x, y| x.2.total_cmp(&y.2));
            let Some((ib, b, _)) = middle else {
                continue;
            };

            let Some(mut state) = triplet_state(geometry, config, sector, anchor, a, b, c) else {
                continue;
            };
            state.add_hit(ref_a, 0.0);
            taken.insert(ref_a);
            taken.insert(ClusterRef::new(sector, row_b, ib));
            taken.insert(ref_c);
            seeds.push(state);
            break;
        }
    }
}

/// Signed curvature of the circle through three points ordered by x
/// (positive when turning counter-clockwise with increasing x).
pub fn circle_curvature(p0: &LocalPoint, p1: &LocalPoint, p2: &LocalPoint) -> f64 {
    let d01 = (p1.x - p0.x).hypot(p1.y - p0.y);
    let d12 = (p2.x - p1.x).hypot(p2.y - p1.y);
    let d02 = (p2.x - p0.x).hypot(p2.y - p0.y);
    let cross = (p1.x - p0.x) * (p2.y - p1.y) - (p1.y - p0.y) * (p2.x - p1.x);
    let denom = d01 * d12 * d02;
    if denom <= 0.0 {
        return 0.0;
    }
    2.0 * cross / denom
}

/// Parameters and initial covariance at the anchor cluster `a`.
fn triplet_state(
    geometry: &Geometry,
    config: &TrackerConfig,
    sector: usize,
    anchor: usize,
    a: &Cluster,
    b: &Cluster,
    c: &Cluster,
) -> Option<TrackState> {
    let anchor_is_outer = a.position.x > c.position.x;
    let (p0, p2) = if anchor_is_outer {
        (&c.position, &a.position)
    } else {
        (&a.position, &c.position)
    };

    let curvature = circle_curvature(p0, &b.position, p2);
    if curvature.abs() > config.seed_max_curvature {
        return None;
    }

    let chord = (p2.x - p0.x).hypot(p2.y - p0.y);
    let chord_angle = (p2.y - p0.y).atan2(p2.x - p0.x);
    let half_turn = (0.5 * curvature * chord).clamp(-1.0, 1.0).asin();
    let phi = if anchor_is_outer {
        chord_angle + half_turn
    } else {
        chord_angle - half_turn
    };
    let snp = phi.sin();
    if snp.abs() >= config.max_snp || phi.cos() <= 0.0 {
        return None;
    }

    let arc = if (curvature * chord).abs() > 1e-9 {
        2.0 * half_turn / curvature
    } else {
        chord
    };
    let tgl = (p2.z - p0.z) / arc;

    let pad_row = geometry.row(anchor);
    let (ey2, ez2) = config
        .cluster_errors
        .variances(a, pad_row, geometry.z_width());
    let lever2 = chord * chord;
    let s2 = config.seed_error_scale * config.seed_error_scale;
    let cov = Matrix5::from_diagonal(&Vector5::new(
        ey2,
        ez2,
        s2 * 36.0 * ey2 / lever2,
        s2 * 4.0 * ez2 / lever2,
        s2 * 144.0 * ey2 / (lever2 * lever2),
    ));

    let params = Vector5::new(a.position.y, a.position.z, snp, tgl, curvature);
    Some(TrackState::new(sector, anchor, pad_row.radius, params, cov))
}

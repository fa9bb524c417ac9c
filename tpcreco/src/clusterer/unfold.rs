//! Overlap correction for clusters wider than a single hit.
//!
//! Each side of the peak is compared with a Gaussian of the expected width
//! through one-dimensional projections that reach one bin past the 5×5
//! window. A side whose falloff is too slow, or that rises again, is scaled
//! down so that it keeps only the share a lone hit would leave there.

use super::builder::{HALF, SIZE, Window, window_sum};
use crate::signal_grid::SignalGrid;

/// Projection half width: the window plus one bin on each side.
const REACH: usize = 3;
const PROJ: usize = 2 * REACH + 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnfoldParams {
    /// Sides whose first neighbour is below this charge are left alone.
    pub min_side_charge: f64,
    /// Tolerated excess of the outer bin over the expected falloff.
    pub slow_falloff: f64,
}

#[derive(Debug, Clone)]
pub struct UnfoldResult {
    /// Corrected window; its sum is the cluster charge.
    pub matrix: Window,
    /// Estimated share of the window that belongs to neighbours, 0..=100.
    pub overlap: u8,
    pub pad_ratios: [f64; SIZE],
    pub time_ratios: [f64; SIZE],
}

/// Charge summed across ±1 bin in time, for pads `pad-3..=pad+3`.
fn pad_projection(grid: &SignalGrid, pad: usize, time: usize) -> [f64; PROJ] {
    let mut proj = [0.0; PROJ];
    for (k, value) in proj.iter_mut().enumerate() {
        let p = pad as isize + k as isize - REACH as isize;
        *value = (-1..=1)
            .map(|dt| grid.at(p, time as isize + dt) as f64)
            .sum();
    }
    proj
}

/// Charge summed across ±1 pad, for time bins `time-3..=time+3`.
fn time_projection(grid: &SignalGrid, pad: usize, time: usize) -> [f64; PROJ] {
    let mut proj = [0.0; PROJ];
    for (k, value) in proj.iter_mut().enumerate() {
        let t = time as isize + k as isize - REACH as isize;
        *value = (-1..=1)
            .map(|dp| grid.at(pad as isize + dp, t) as f64)
            .sum();
    }
    proj
}

/// Per-offset keep ratios for one direction, indexed `offset + 2`.
pub(crate) fn side_ratios(proj: &[f64; PROJ], variance: f64, params: &UnfoldParams) -> [f64; SIZE] {
    let center = proj[REACH];
    let mut ratios = [1.0; SIZE];
    if center <= 0.0 {
        return ratios;
    }

    // Gaussian falloff from the centre to offset 1 and 2, and from 1 to 2
    let f1 = (-1.0 / (2.0 * variance)).exp();
    let f2 = (-4.0 / (2.0 * variance)).exp();
    let f21 = (-3.0 / (2.0 * variance)).exp();

    for dir in [-1isize, 1] {
        let at = |offset: isize| proj[(REACH as isize + dir * offset) as usize];
        let (p1, p2, p3) = (at(1), at(2), at(3));
        if p1 < params.min_side_charge {
            continue;
        }

        let rising = p2 >= p1;
        let slow = p2 > params.slow_falloff * f21 * p1;
        let tail = p3 - p2 > params.min_side_charge;
        if !(rising || slow || tail) {
            continue;
        }

        let r1 = (center * f1 / p1).clamp(0.0, 1.0);
        let r2 = if p2 > 0.0 {
            (center * f2 / p2).clamp(0.0, 1.0)
        } else {
            1.0
        };
        ratios[(HALF + dir) as usize] = r1;
        ratios[(HALF + 2 * dir) as usize] = r2;
    }
    ratios
}

/// Corrects `window` (the cluster's 5×5 amplitudes, virtual charge included)
/// for the contribution of neighbouring hits.
///
/// When neither direction looks contaminated the matrix is returned as is,
/// with zero overlap.
pub fn unfold(
    grid: &SignalGrid,
    pad: usize,
    time: usize,
    window: &Window,
    expected: (f64, f64),
    params: &UnfoldParams,
) -> UnfoldResult {
    let pad_ratios = side_ratios(&pad_projection(grid, pad, time), expected.0, params);
    let time_ratios = side_ratios(&time_projection(grid, pad, time), expected.1, params);

    let mut matrix = *window;
    let mut kept_pad = 0.0;
    let mut kept_time = 0.0;
    for i in 0..SIZE {
        for j in 0..SIZE {
            let v = window[i][j];
            kept_pad += v * pad_ratios[i];
            kept_time += v * time_ratios[j];
            matrix[i][j] = v * pad_ratios[i] * time_ratios[j];
        }
    }

    let full = window_sum(window);
    let overlap = if full > 0.0 {
        let share = (1.0 - kept_pad / full).max(1.0 - kept_time / full);
        (100.0 * share).round().clamp(0.0, 100.0) as u8
    } else {
        0
    };

    UnfoldResult {
        matrix,
        overlap,
        pad_ratios,
        time_ratios,
    }
}

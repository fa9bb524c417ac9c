//! Charge-weighted moments of the 5×5 window around a peak.

use super::peak::Peak;
use super::unfold::{UnfoldParams, unfold};
use super::ClustererConfig;
use crate::calibration::ShapeModel;
use crate::cluster::{Cluster, ClusterKind, ShapeInfo};
use crate::geometry::PadRow;
use crate::signal_grid::SignalGrid;
use crate::transform::CoordinateTransform;

/// Window half size in bins.
pub const HALF: isize = 2;
pub const SIZE: usize = 5;

/// Window amplitudes indexed `[pad offset + 2][time offset + 2]`.
pub type Window = [[f64; SIZE]; SIZE];

/// Smallest expected variance used when judging shapes (bin²).
const MIN_EXPECTED_VARIANCE: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
    pub charge: f64,
    /// Offset of the centroid from the window centre.
    pub mean_pad: f64,
    pub mean_time: f64,
    pub var_pad: f64,
    pub var_time: f64,
}

/// First and second moments. `None` for an empty window.
pub fn window_moments(window: &Window) -> Option<Moments> {
    let mut sum = 0.0;
    let mut sum_p = 0.0;
    let mut sum_p2 = 0.0;
    let mut sum_t = 0.0;
    let mut sum_t2 = 0.0;

    for (i, column) in window.iter().enumerate() {
        let dp = i as f64 - HALF as f64;
        for (j, &amp) in column.iter().enumerate() {
            if amp <= 0.0 {
                continue;
            }
            let dt = j as f64 - HALF as f64;
            sum += amp;
            sum_p += dp * amp;
            sum_p2 += dp * dp * amp;
            sum_t += dt * amp;
            sum_t2 += dt * dt * amp;
        }
    }

    if sum <= 0.0 {
        return None;
    }

    let mean_pad = sum_p / sum;
    let mean_time = sum_t / sum;
    Some(Moments {
        charge: sum,
        mean_pad,
        mean_time,
        var_pad: (sum_p2 / sum - mean_pad * mean_pad).max(0.0),
        var_time: (sum_t2 / sum - mean_time * mean_time).max(0.0),
    })
}

pub fn window_sum(window: &Window) -> f64 {
    window.iter().flatten().sum()
}

/// Copy of the 5×5 neighbourhood; guard cells read as 0.
pub fn extract_window(grid: &SignalGrid, pad: usize, time: usize) -> Window {
    let mut window = [[0.0; SIZE]; SIZE];
    for (i, column) in window.iter_mut().enumerate() {
        let p = pad as isize + i as isize - HALF;
        for (j, cell) in column.iter_mut().enumerate() {
            let t = time as isize + j as isize - HALF;
            *cell = grid.at(p, t) as f64;
        }
    }
    window
}

/// Fills empty outer-ring cells that lie inside the row with the charge a
/// single hit of the expected variance would leave there, extrapolated from
/// the neighbouring inner cell and capped at `ceiling`. Returns the charge added.
pub fn add_virtual_charge(
    window: &mut Window,
    grid: &SignalGrid,
    pad: usize,
    time: usize,
    expected: (f64, f64),
    ceiling: f64,
) -> f64 {
    if ceiling <= 0.0 {
        return 0.0;
    }
    let (var_pad, var_time) = expected;
    let mut added = 0.0;

    for di in -HALF..=HALF {
        for dj in -HALF..=HALF {
            if di.abs() < HALF && dj.abs() < HALF {
                continue;
            }
            let p = pad as isize + di;
            let t = time as isize + dj;
            if !grid.contains(p as i32, t as i32) {
                continue;
            }
            let (i, j) = ((di + HALF) as usize, (dj + HALF) as usize);
            if window[i][j] > 0.0 {
                continue;
            }

            // one step towards the centre along each saturated axis
            let ii = if di.abs() == HALF { di - di.signum() } else { di };
            let jj = if dj.abs() == HALF { dj - dj.signum() } else { dj };
            let inner = window[(ii + HALF) as usize][(jj + HALF) as usize];
            if inner <= 0.0 {
                continue;
            }

            let exponent = (di * di - ii * ii) as f64 / (2.0 * var_pad)
                + (dj * dj - jj * jj) as f64 / (2.0 * var_time);
            let value = (inner * (-exponent).exp()).min(ceiling);
            window[i][j] = value;
            added += value;
        }
    }
    added
}

/// Turns accepted peaks of one row into clusters.
pub struct ClusterBuilder<'a> {
    pub grid: &'a SignalGrid,
    pub row: &'a PadRow,
    pub z_width: f64,
    pub transform: &'a CoordinateTransform,
    pub shape: &'a dyn ShapeModel,
    pub config: &'a ClustererConfig,
}

impl ClusterBuilder<'_> {
    /// Expected single-hit variance at the peak, assuming a track from the
    /// origin for the local inclinations.
    fn expected_variance(&self, peak: &Peak) -> (f64, f64) {
        let sector = self.grid.sector();
        let point = self.transform.transform(
            sector,
            self.grid.row(),
            peak.pad as f64,
            peak.time as f64,
        );
        let drift_length = self.transform.drift_length(sector, point.z);
        let tan_phi = point.y / point.x;
        let tan_theta = point.z / point.x;
        let (var_pad, var_time) =
            self.shape
                .expected_variance(self.row, self.z_width, drift_length, tan_phi, tan_theta);
        (
            var_pad.max(MIN_EXPECTED_VARIANCE),
            var_time.max(MIN_EXPECTED_VARIANCE),
        )
    }

    /// Build the cluster for one peak. `None` when the window carries no
    /// charge or the cluster is noise and noise clusters are not kept.
    pub fn build(&self, peak: &Peak) -> Option<Cluster> {
        let config = self.config;
        let expected = self.expected_variance(peak);

        let mut window = extract_window(self.grid, peak.pad, peak.time);
        let virtual_charge = if config.virtual_charge {
            add_virtual_charge(
                &mut window,
                self.grid,
                peak.pad,
                peak.time,
                expected,
                config.zero_suppression as f64,
            )
        } else {
            0.0
        };

        let plain = window_moments(&window)?;
        let pad_ratio = plain.var_pad / expected.0;
        let time_ratio = plain.var_time / expected.1;

        let wide = pad_ratio > config.wide_ratio || time_ratio > config.wide_ratio;
        let narrow = pad_ratio < config.narrow_ratio && time_ratio < config.narrow_ratio;

        let (moments, kind) = if wide && config.unfold {
            let params = UnfoldParams {
                min_side_charge: config.unfold_min_side_charge,
                slow_falloff: config.unfold_slow_falloff,
            };
            let unfolded = unfold(self.grid, peak.pad, peak.time, &window, expected, &params);
            let moments = window_moments(&unfolded.matrix)?;
            debug_assert!(
                (moments.charge - window_sum(&unfolded.matrix)).abs()
                    <= 1e-9 * moments.charge.max(1.0)
            );
            (
                moments,
                ClusterKind::Unfolded {
                    overlap: unfolded.overlap,
                },
            )
        } else if narrow {
            if !config.keep_noise_clusters {
                tracing::trace!(
                    "Rejecting narrow cluster at pad {} time {} (ratios {:.2}, {:.2})",
                    peak.pad,
                    peak.time,
                    pad_ratio,
                    time_ratio
                );
                return None;
            }
            (plain, ClusterKind::NoiseRejected)
        } else {
            (plain, ClusterKind::Simple)
        };

        let pad = peak.pad as f64 + moments.mean_pad;
        let time = peak.time as f64 + moments.mean_time;

        let mut cluster = Cluster::new(
            self.grid.sector(),
            self.grid.row(),
            pad,
            time,
            moments.charge,
            peak.amplitude as f64,
            moments.var_pad,
            moments.var_time,
            kind,
        );
        cluster.edge = is_edge(pad, self.grid.n_pads()) || is_edge(time, self.grid.n_time_bins());
        cluster.shape = ShapeInfo {
            pad_ratio,
            time_ratio,
            expected_pad_variance: expected.0,
            expected_time_variance: expected.1,
            virtual_charge,
        };
        cluster.position = self
            .transform
            .transform(self.grid.sector(), self.grid.row(), pad, time);
        Some(cluster)
    }
}

/// Within one bin of the first or last valid index.
#[inline]
pub fn is_edge(coordinate: f64, n_bins: usize) -> bool {
    coordinate < 1.0 || coordinate > n_bins as f64 - 2.0
}

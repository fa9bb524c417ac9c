//! Seed search: local maxima of a row's signal that pass the amplitude gates.

use super::ClustererConfig;
use crate::signal_grid::SignalGrid;

/// Candidate cluster centre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub pad: usize,
    pub time: usize,
    pub amplitude: f32,
}

/// Scan a row for peaks, in pad-major order.
///
/// A sample is a peak when it is a maximum of its cross neighbourhood and
/// passes the absolute, left-right (pad) and up-down (time) gates, each
/// checked both as an absolute amplitude and as a multiple of pad noise.
/// Pads with noise above `max_noise` are skipped entirely.
pub fn find_peaks(grid: &SignalGrid, noise: &[f32], config: &ClustererConfig) -> Vec<Peak> {
    debug_assert_eq!(noise.len(), grid.n_pads());

    let mut peaks = Vec::new();
    let mut noisy_pads = 0usize;

    for (pad, &pad_noise) in noise.iter().enumerate() {
        if pad_noise > config.max_noise {
            noisy_pads += 1;
            continue;
        }

        let max_cut = config.min_max_cut_abs.max(config.min_max_cut_sigma * pad_noise);
        let lr_cut = config
            .min_left_right_cut_abs
            .max(config.min_left_right_cut_sigma * pad_noise);
        let ud_cut = config
            .min_up_down_cut_abs
            .max(config.min_up_down_cut_sigma * pad_noise);

        for (time, &value) in grid.pad_samples(pad).iter().enumerate() {
            if value <= max_cut {
                continue;
            }

            let p = pad as isize;
            let t = time as isize;
            if !is_cross_maximum(grid, p, t, value) {
                continue;
            }

            let left_right = grid.at(p - 1, t) + value + grid.at(p + 1, t);
            if left_right <= lr_cut {
                continue;
            }

            let up_down = grid.at(p, t - 1) + value + grid.at(p, t + 1);
            if up_down <= ud_cut {
                continue;
            }

            peaks.push(Peak {
                pad,
                time,
                amplitude: value,
            });
        }
    }

    if noisy_pads > 0 {
        tracing::trace!(
            "Sector {} row {}: {} pads above noise limit excluded from peak search",
            grid.sector(),
            grid.row(),
            noisy_pads
        );
    }

    peaks
}

/// Maximum of the four direct neighbours. On a tie the earlier coordinate
/// (lower pad, then lower time bin) wins, so a flat top yields one peak.
#[inline]
pub(crate) fn is_cross_maximum(grid: &SignalGrid, pad: isize, time: isize, value: f32) -> bool {
    value > grid.at(pad - 1, time)
        && value > grid.at(pad, time - 1)
        && value >= grid.at(pad + 1, time)
        && value >= grid.at(pad, time + 1)
}

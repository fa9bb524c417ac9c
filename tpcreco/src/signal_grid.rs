//! Dense per-row sample buffer with zero guard cells.

use common::buffer2::Buffer2;

use crate::digit::DigitSample;

/// Guard cells on every edge. The unfolding projection reaches three bins
/// from a peak, so windows around any valid peak stay inside the buffer.
pub const GUARD: usize = 3;

/// Amplitudes of one (sector, row) indexed by (pad, time bin).
///
/// Each pad's time samples are contiguous. Coordinates passed to [`Self::at`]
/// are physical indices and may reach `GUARD` cells past either edge.
#[derive(Debug, Clone)]
pub struct SignalGrid {
    sector: usize,
    row: usize,
    n_pads: usize,
    n_time_bins: usize,
    samples: Buffer2<f32>,
}

impl SignalGrid {
    pub fn new(sector: usize, row: usize, n_pads: usize, n_time_bins: usize) -> Self {
        Self {
            sector,
            row,
            n_pads,
            n_time_bins,
            samples: Buffer2::new_default(n_time_bins + 2 * GUARD, n_pads + 2 * GUARD),
        }
    }

    /// Builds the grid for one row from its digits.
    ///
    /// Amplitudes are divided by the pad gain and summed when a (pad, time)
    /// appears twice. Afterwards values at or below `zero_suppression` become 0.
    /// Digits outside the row or on a zero-gain pad are dropped and counted.
    pub fn from_digits<'a, I>(
        sector: usize,
        row: usize,
        n_pads: usize,
        n_time_bins: usize,
        digits: I,
        gain: &[f32],
        zero_suppression: f32,
    ) -> (Self, usize)
    where
        I: IntoIterator<Item = &'a DigitSample>,
    {
        debug_assert_eq!(gain.len(), n_pads);
        let mut grid = Self::new(sector, row, n_pads, n_time_bins);
        let mut dropped = 0;

        for digit in digits {
            if !grid.contains(digit.pad, digit.time) {
                tracing::warn!(
                    "Dropping digit outside row range: sector {} row {} pad {} time {}",
                    digit.sector,
                    digit.row,
                    digit.pad,
                    digit.time
                );
                dropped += 1;
                continue;
            }
            let g = gain[digit.pad as usize];
            if g <= 0.0 || !digit.amplitude.is_finite() {
                tracing::trace!(
                    "Dropping digit on dead pad or with invalid amplitude: pad {} time {}",
                    digit.pad,
                    digit.time
                );
                dropped += 1;
                continue;
            }
            *grid.cell_mut(digit.pad as usize, digit.time as usize) += digit.amplitude / g;
        }

        grid.zero_suppress(zero_suppression);
        (grid, dropped)
    }

    #[inline]
    pub fn sector(&self) -> usize {
        self.sector
    }

    #[inline]
    pub fn row(&self) -> usize {
        self.row
    }

    #[inline]
    pub fn n_pads(&self) -> usize {
        self.n_pads
    }

    #[inline]
    pub fn n_time_bins(&self) -> usize {
        self.n_time_bins
    }

    #[inline]
    pub fn contains(&self, pad: i32, time: i32) -> bool {
        pad >= 0 && time >= 0 && (pad as usize) < self.n_pads && (time as usize) < self.n_time_bins
    }

    /// Amplitude at a physical coordinate; guard cells read as 0.
    #[inline]
    pub fn at(&self, pad: isize, time: isize) -> f32 {
        debug_assert!(
            pad >= -(GUARD as isize)
                && time >= -(GUARD as isize)
                && pad < (self.n_pads + GUARD) as isize
                && time < (self.n_time_bins + GUARD) as isize,
            "({}, {}) outside guarded grid",
            pad,
            time
        );
        self.samples[(
            (time + GUARD as isize) as usize,
            (pad + GUARD as isize) as usize,
        )]
    }

    #[inline]
    pub fn cell_mut(&mut self, pad: usize, time: usize) -> &mut f32 {
        debug_assert!(pad < self.n_pads && time < self.n_time_bins);
        &mut self.samples[(time + GUARD, pad + GUARD)]
    }

    /// Time samples of one pad, without guards.
    #[inline]
    pub fn pad_samples(&self, pad: usize) -> &[f32] {
        &self.samples.row(pad + GUARD)[GUARD..GUARD + self.n_time_bins]
    }

    pub fn zero_suppress(&mut self, threshold: f32) {
        for v in self.samples.values_mut() {
            if *v <= threshold || !v.is_finite() {
                *v = 0.0;
            }
        }
    }

    pub fn total_charge(&self) -> f64 {
        self.samples.values().iter().map(|&v| v as f64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.values().iter().all(|&v| v == 0.0)
    }
}

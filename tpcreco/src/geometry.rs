//! Detector geometry descriptor.
//!
//! A sector is one angular segment of the chamber on one side of the central
//! membrane. All sectors share the same pad-row table; rows are numbered from
//! the innermost (0) outward.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

/// Side of the central membrane. A-side drifts towards +z, C-side towards -z.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize)]
pub enum Side {
    A,
    C,
}

impl Side {
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Side::A => 1.0,
            Side::C => -1.0,
        }
    }
}

/// One radial ring of pads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PadRow {
    /// Radius of the pad-row centre in the sector frame (cm).
    pub radius: f64,
    pub n_pads: usize,
    /// Pad width along the row (cm).
    pub pad_pitch: f64,
    /// Pad extent along the radius (cm).
    pub pad_length: f64,
}

impl PadRow {
    /// Physical extent of the row along the local y axis (cm), centre to edge.
    #[inline]
    pub fn half_width(&self) -> f64 {
        0.5 * self.n_pads as f64 * self.pad_pitch
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Geometry {
    pub sectors_per_side: usize,
    pub rows: Vec<PadRow>,
    pub n_time_bins: usize,
    /// Sampling period (µs).
    pub sampling_period: f64,
    /// Nominal drift velocity (cm/µs) before calibration corrections.
    pub drift_velocity: f64,
    /// Trigger latency in time bins subtracted before converting to drift length.
    pub l1_delay: f64,
    /// Distance from the central membrane to the readout plane (cm).
    pub z_length: f64,
    /// Fixed z offset of the readout plane (cm).
    pub z_offset: f64,
}

impl Default for Geometry {
    fn default() -> Self {
        let sectors_per_side = 18;
        let half_angle = PI / sectors_per_side as f64;
        // dead band at each sector edge where no pads are mounted
        let edge_margin = 1.3;
        let mut rows = Vec::with_capacity(159);

        let mut push_region = |first_radius: f64, count: usize, pitch: f64, length: f64| {
            for i in 0..count {
                let radius = first_radius + i as f64 * length;
                let half = radius * half_angle.tan() - edge_margin;
                let n_pads = 2 * (half / pitch).floor() as usize;
                rows.push(PadRow {
                    radius,
                    n_pads,
                    pad_pitch: pitch,
                    pad_length: length,
                });
            }
        };
        push_region(85.225, 63, 0.4, 0.75);
        push_region(135.1, 64, 0.6, 1.0);
        push_region(199.35, 32, 0.6, 1.5);

        Self {
            sectors_per_side,
            rows,
            n_time_bins: 1000,
            sampling_period: 0.1,
            drift_velocity: 2.65,
            l1_delay: 3.0,
            z_length: 250.0,
            z_offset: 0.0,
        }
    }
}

impl Geometry {
    /// Small uniform geometry: `n_rows` rows of `n_pads` pads, 1 cm apart
    /// starting at `first_radius`.
    pub fn uniform(
        sectors_per_side: usize,
        n_rows: usize,
        first_radius: f64,
        n_pads: usize,
        n_time_bins: usize,
    ) -> Self {
        let rows = (0..n_rows)
            .map(|i| PadRow {
                radius: first_radius + i as f64,
                n_pads,
                pad_pitch: 0.5,
                pad_length: 1.0,
            })
            .collect();
        Self {
            sectors_per_side,
            rows,
            n_time_bins,
            ..Self::default()
        }
    }

    pub fn validate(&self) {
        assert!(
            self.sectors_per_side >= 1,
            "sectors_per_side must be at least 1, got {}",
            self.sectors_per_side
        );
        assert!(!self.rows.is_empty(), "geometry must have at least one pad row");
        for (i, row) in self.rows.iter().enumerate() {
            assert!(row.n_pads >= 1, "row {} has no pads", i);
            assert!(
                row.pad_pitch > 0.0 && row.pad_length > 0.0,
                "row {} pad dimensions must be positive",
                i
            );
            if i > 0 {
                assert!(
                    row.radius > self.rows[i - 1].radius,
                    "row radii must increase, row {} at {} <= {}",
                    i,
                    row.radius,
                    self.rows[i - 1].radius
                );
            }
        }
        assert!(self.n_time_bins >= 1, "n_time_bins must be at least 1");
        assert!(
            self.sampling_period > 0.0,
            "sampling_period must be positive, got {}",
            self.sampling_period
        );
        assert!(
            self.drift_velocity > 0.0,
            "drift_velocity must be positive, got {}",
            self.drift_velocity
        );
        assert!(
            self.z_length > 0.0,
            "z_length must be positive, got {}",
            self.z_length
        );
    }

    #[inline]
    pub fn n_sectors(&self) -> usize {
        2 * self.sectors_per_side
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn row(&self, row: usize) -> &PadRow {
        &self.rows[row]
    }

    #[inline]
    pub fn sector_angle(&self) -> f64 {
        2.0 * PI / self.sectors_per_side as f64
    }

    #[inline]
    pub fn side(&self, sector: usize) -> Side {
        if sector < self.sectors_per_side {
            Side::A
        } else {
            Side::C
        }
    }

    /// Rotation angle of the sector's local frame around the beam axis.
    #[inline]
    pub fn alpha(&self, sector: usize) -> f64 {
        ((sector % self.sectors_per_side) as f64 + 0.5) * self.sector_angle()
    }

    /// Sector on the same side whose frame is rotated by `steps` sector angles.
    #[inline]
    pub fn neighbour_sector(&self, sector: usize, steps: isize) -> usize {
        let n = self.sectors_per_side as isize;
        let base = (sector / self.sectors_per_side) * self.sectors_per_side;
        let local = (sector % self.sectors_per_side) as isize;
        base + (local + steps).rem_euclid(n) as usize
    }

    /// Local |y| of the sector boundary at radius `x`.
    #[inline]
    pub fn sector_edge(&self, x: f64) -> f64 {
        x * (0.5 * self.sector_angle()).tan()
    }

    /// Nominal drift length covered by one time bin (cm).
    #[inline]
    pub fn z_width(&self) -> f64 {
        self.sampling_period * self.drift_velocity
    }

    /// Arena index of a (sector, row) pair.
    #[inline]
    pub fn row_index(&self, sector: usize, row: usize) -> usize {
        debug_assert!(sector < self.n_sectors() && row < self.n_rows());
        sector * self.n_rows() + row
    }

    #[inline]
    pub fn n_row_slots(&self) -> usize {
        self.n_sectors() * self.n_rows()
    }

    /// Row whose radius is closest to `x`, if `x` lies within half a pad length of one.
    pub fn row_at_radius(&self, x: f64) -> Option<usize> {
        let idx = self.rows.partition_point(|r| r.radius < x);
        let candidates = [idx.checked_sub(1), (idx < self.rows.len()).then_some(idx)];
        candidates
            .into_iter()
            .flatten()
            .min_by(|&a, &b| {
                let da = (self.rows[a].radius - x).abs();
                let db = (self.rows[b].radius - x).abs();
                da.total_cmp(&db)
            })
            .filter(|&r| (self.rows[r].radius - x).abs() <= 0.5 * self.rows[r].pad_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn default_layout_has_three_regions() {
        let geo = Geometry::default();
        geo.validate();
        assert_eq!(geo.n_rows(), 159);
        assert_eq!(geo.n_sectors(), 36);
        assert_eq!(geo.row(0).n_pads % 2, 0);
        assert!(geo.row(0).n_pads < geo.row(62).n_pads);
        assert_eq!(geo.row(63).pad_pitch, 0.6);
        assert_eq!(geo.row(158).pad_length, 1.5);
        // pads always fit inside the sector
        for row in &geo.rows {
            assert!(row.half_width() < geo.sector_edge(row.radius));
        }
    }

    #[test]
    fn sides_and_signs() {
        let geo = Geometry::default();
        assert_eq!(geo.side(0), Side::A);
        assert_eq!(geo.side(17), Side::A);
        assert_eq!(geo.side(18), Side::C);
        let signs: Vec<f64> = Side::iter().map(Side::sign).collect();
        assert_eq!(signs, vec![1.0, -1.0]);
    }

    #[test]
    fn neighbour_sector_wraps_within_side() {
        let geo = Geometry::default();
        assert_eq!(geo.neighbour_sector(0, -1), 17);
        assert_eq!(geo.neighbour_sector(17, 1), 0);
        assert_eq!(geo.neighbour_sector(18, -1), 35);
        assert_eq!(geo.neighbour_sector(20, 1), 21);
    }

    #[test]
    fn alpha_is_sector_centre() {
        let geo = Geometry::default();
        let step = geo.sector_angle();
        assert!((geo.alpha(0) - 0.5 * step).abs() < 1e-12);
        assert!((geo.alpha(19) - 1.5 * step).abs() < 1e-12);
    }

    #[test]
    fn row_lookup_by_radius() {
        let geo = Geometry::uniform(18, 10, 100.0, 40, 200);
        assert_eq!(geo.row_at_radius(100.0), Some(0));
        assert_eq!(geo.row_at_radius(104.4), Some(4));
        assert_eq!(geo.row_at_radius(90.0), None);
        assert_eq!(geo.row_at_radius(109.4), Some(9));
        assert_eq!(geo.row_at_radius(109.6), None);
    }
}

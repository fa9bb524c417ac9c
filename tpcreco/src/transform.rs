//! Cluster (row, pad, time-bin) → sector-local 3-D position.
//!
//! Composition order is fixed: pad-row mapping, drift velocity / time zero,
//! distortion map, time of flight. Each correction is defined relative to the
//! output of the previous one.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::calibration::{CalibrationSnapshot, DistortionMap, DriftCalibration};
use crate::error::RecoError;
use crate::geometry::Geometry;

/// Speed of light in cm/µs.
pub const SPEED_OF_LIGHT: f64 = 29_979.245_8;

/// Position in a sector's rotated frame: x along the sector axis (pad-row
/// radius), y along the pad rows, z along the beam.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LocalPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl LocalPoint {
    #[inline]
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Rotate into the global frame of a sector at angle `alpha`.
    pub fn to_global(&self, alpha: f64) -> [f64; 3] {
        let (sa, ca) = alpha.sin_cos();
        [self.x * ca - self.y * sa, self.x * sa + self.y * ca, self.z]
    }
}

/// Pure mapping from readout coordinates to local space. Holds read-only
/// calibration handles only, so it can be shared across row tasks.
#[derive(Clone)]
pub struct CoordinateTransform {
    geometry: Arc<Geometry>,
    drift: Arc<dyn DriftCalibration>,
    distortion: Option<Arc<dyn DistortionMap>>,
    time_of_flight: bool,
}

impl std::fmt::Debug for CoordinateTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinateTransform")
            .field("has_distortion", &self.distortion.is_some())
            .field("time_of_flight", &self.time_of_flight)
            .finish()
    }
}

impl CoordinateTransform {
    /// Fails when the snapshot carries no drift calibration.
    pub fn new(
        geometry: Arc<Geometry>,
        calibration: &CalibrationSnapshot,
        time_of_flight: bool,
    ) -> Result<Self, RecoError> {
        let drift = calibration
            .drift()
            .cloned()
            .ok_or(RecoError::MissingDriftCalibration)?;
        Ok(Self {
            geometry,
            drift,
            distortion: calibration.distortion().cloned(),
            time_of_flight,
        })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Local y of a (fractional) pad coordinate. Pad `i` spans `[i, i + 1)`
    /// in pad units, so its centre sits at `i + 0.5`.
    #[inline]
    pub fn pad_to_y(&self, sector: usize, row: usize, pad: f64) -> f64 {
        let pad_row = self.geometry.row(row);
        let y = (pad + 0.5 - 0.5 * pad_row.n_pads as f64) * pad_row.pad_pitch;
        self.geometry.side(sector).sign() * y
    }

    #[inline]
    pub fn y_to_pad(&self, sector: usize, row: usize, y: f64) -> f64 {
        let pad_row = self.geometry.row(row);
        let y = self.geometry.side(sector).sign() * y;
        y / pad_row.pad_pitch + 0.5 * pad_row.n_pads as f64 - 0.5
    }

    pub fn transform(&self, sector: usize, row: usize, pad: f64, time: f64) -> LocalPoint {
        let geo = &*self.geometry;
        let sign = geo.side(sector).sign();

        // pad-row mapping, z from nominal drift
        let x = geo.row(row).radius;
        let y = self.pad_to_y(sector, row, pad);
        let nominal_drift = (time - geo.l1_delay) * geo.z_width();
        let nominal = LocalPoint::new(x, y, sign * (geo.z_length - nominal_drift - geo.z_offset));

        // drift velocity and time zero
        let factor = self.drift.drift_velocity_factor(sector, row, &nominal);
        let t0 = self.drift.time0_offset(sector, row, &nominal);
        let drift_length = (time - geo.l1_delay - t0) * geo.z_width() * factor;
        let mut point = LocalPoint::new(x, y, sign * (geo.z_length - drift_length - geo.z_offset));

        if let Some(map) = &self.distortion {
            let d = map.correction(sector, row, &point);
            point.x += d.x;
            point.y += d.y;
            point.z += d.z;
        }

        if self.time_of_flight {
            // measured time includes the flight from the vertex
            let flight = point.norm() / SPEED_OF_LIGHT;
            let velocity = geo.drift_velocity * factor;
            point.z += sign * flight * velocity;
        }

        point
    }

    /// Time-bin coordinate that the base mapping plus drift calibration sends
    /// to `z`. Distortion and time-of-flight corrections are not inverted.
    pub fn z_to_time(&self, sector: usize, row: usize, y: f64, z: f64) -> f64 {
        let geo = &*self.geometry;
        let sign = geo.side(sector).sign();
        let point = LocalPoint::new(geo.row(row).radius, y, z);
        let factor = self.drift.drift_velocity_factor(sector, row, &point);
        let t0 = self.drift.time0_offset(sector, row, &point);
        let drift_length = geo.z_length - geo.z_offset - sign * z;
        drift_length / (geo.z_width() * factor) + geo.l1_delay + t0
    }

    /// Distance drifted by charge arriving at local `z` (cm).
    #[inline]
    pub fn drift_length(&self, sector: usize, z: f64) -> f64 {
        let geo = &*self.geometry;
        (geo.z_length - geo.z_offset - geo.side(sector).sign() * z).max(0.0)
    }
}

//! Read-only calibration inputs.
//!
//! Everything that depends on calibration receives a [`CalibrationSnapshot`]
//! at construction. Snapshots are immutable once built; a
//! [`CalibrationCache`] hands them out by run number.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::RecoError;
use crate::geometry::{Geometry, PadRow};
use crate::transform::LocalPoint;

// ============================================================================
// Collaborator interfaces
// ============================================================================

/// Drift velocity and time-zero corrections as functions of position.
pub trait DriftCalibration: Send + Sync {
    /// Multiplicative correction to the nominal drift velocity.
    fn drift_velocity_factor(&self, sector: usize, row: usize, point: &LocalPoint) -> f64;

    /// Additive time-zero shift in time bins.
    fn time0_offset(&self, sector: usize, row: usize, point: &LocalPoint) -> f64;
}

/// Higher-order field/alignment distortion. Returns an additive correction.
pub trait DistortionMap: Send + Sync {
    fn correction(&self, sector: usize, row: usize, point: &LocalPoint) -> LocalPoint;
}

/// Expected variance of a single-particle cluster.
pub trait ShapeModel: Send + Sync {
    /// Returns `(pad variance, time variance)` in bin² units.
    ///
    /// `tan_phi` and `tan_theta` are the local track inclinations in the
    /// pad-row plane and along the drift direction.
    fn expected_variance(
        &self,
        row: &PadRow,
        z_width: f64,
        drift_length: f64,
        tan_phi: f64,
        tan_theta: f64,
    ) -> (f64, f64);
}

// ============================================================================
// Stock implementations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantDrift {
    pub velocity_factor: f64,
    /// Time-zero shift in time bins.
    pub time0: f64,
}

impl Default for ConstantDrift {
    fn default() -> Self {
        Self {
            velocity_factor: 1.0,
            time0: 0.0,
        }
    }
}

impl DriftCalibration for ConstantDrift {
    fn drift_velocity_factor(&self, _sector: usize, _row: usize, _point: &LocalPoint) -> f64 {
        self.velocity_factor
    }

    fn time0_offset(&self, _sector: usize, _row: usize, _point: &LocalPoint) -> f64 {
        self.time0
    }
}

/// Pad response + diffusion + track inclination across the pad length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffusionShapeModel {
    /// Pad response function sigma (cm).
    pub pad_response: f64,
    /// Shaper time response sigma expressed as a length (cm).
    pub time_response: f64,
    /// Transverse diffusion coefficient (cm/√cm).
    pub diffusion_t: f64,
    /// Longitudinal diffusion coefficient (cm/√cm).
    pub diffusion_l: f64,
}

impl Default for DiffusionShapeModel {
    fn default() -> Self {
        Self {
            pad_response: 0.2,
            time_response: 0.2,
            diffusion_t: 0.022,
            diffusion_l: 0.022,
        }
    }
}

impl ShapeModel for DiffusionShapeModel {
    fn expected_variance(
        &self,
        row: &PadRow,
        z_width: f64,
        drift_length: f64,
        tan_phi: f64,
        tan_theta: f64,
    ) -> (f64, f64) {
        let drift = drift_length.max(0.0);
        let len2 = row.pad_length * row.pad_length / 12.0;
        let pad = self.pad_response * self.pad_response
            + self.diffusion_t * self.diffusion_t * drift
            + tan_phi * tan_phi * len2;
        let time = self.time_response * self.time_response
            + self.diffusion_l * self.diffusion_l * drift
            + tan_theta * tan_theta * len2;
        (
            pad / (row.pad_pitch * row.pad_pitch),
            time / (z_width * z_width),
        )
    }
}

/// Fixed variances independent of position, in bin² units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantShape {
    pub pad_variance: f64,
    pub time_variance: f64,
}

impl ShapeModel for ConstantShape {
    fn expected_variance(&self, _: &PadRow, _: f64, _: f64, _: f64, _: f64) -> (f64, f64) {
        (self.pad_variance, self.time_variance)
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Per-pad gain and noise for every (sector, row, pad), plus the correction
/// functions. Pad tables are flat arrays; `offsets[slot]` is the first pad of
/// the arena slot `sector * n_rows + row`.
#[derive(Clone)]
pub struct CalibrationSnapshot {
    n_rows: usize,
    offsets: Vec<usize>,
    gain: Vec<f32>,
    noise: Vec<f32>,
    drift: Option<Arc<dyn DriftCalibration>>,
    distortion: Option<Arc<dyn DistortionMap>>,
    shape: Arc<dyn ShapeModel>,
}

impl std::fmt::Debug for CalibrationSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalibrationSnapshot")
            .field("n_pads", &self.gain.len())
            .field("has_drift", &self.drift.is_some())
            .field("has_distortion", &self.distortion.is_some())
            .finish()
    }
}

fn pad_offsets(geometry: &Geometry) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(geometry.n_row_slots() + 1);
    let mut total = 0;
    for _ in 0..geometry.n_sectors() {
        for row in &geometry.rows {
            offsets.push(total);
            total += row.n_pads;
        }
    }
    offsets.push(total);
    offsets
}

impl CalibrationSnapshot {
    /// Same gain and noise on every pad; no drift calibration attached.
    pub fn uniform(geometry: &Geometry, gain: f32, noise: f32) -> Self {
        let offsets = pad_offsets(geometry);
        let total = *offsets.last().unwrap_or(&0);
        Self {
            n_rows: geometry.n_rows(),
            offsets,
            gain: vec![gain; total],
            noise: vec![noise; total],
            drift: None,
            distortion: None,
            shape: Arc::new(DiffusionShapeModel::default()),
        }
    }

    /// Tables ordered by sector, then row, then pad.
    pub fn from_tables(
        geometry: &Geometry,
        gain: Vec<f32>,
        noise: Vec<f32>,
    ) -> Result<Self, RecoError> {
        let offsets = pad_offsets(geometry);
        let expected = *offsets.last().unwrap_or(&0);
        if gain.len() != expected {
            return Err(RecoError::CalibrationShape {
                table: "gain",
                expected,
                actual: gain.len(),
            });
        }
        if noise.len() != expected {
            return Err(RecoError::CalibrationShape {
                table: "noise",
                expected,
                actual: noise.len(),
            });
        }
        Ok(Self {
            n_rows: geometry.n_rows(),
            offsets,
            gain,
            noise,
            drift: None,
            distortion: None,
            shape: Arc::new(DiffusionShapeModel::default()),
        })
    }

    /// Fails unless the pad tables were laid out for `geometry`.
    pub fn check_geometry(&self, geometry: &Geometry) -> Result<(), RecoError> {
        let offsets = pad_offsets(geometry);
        if offsets != self.offsets {
            return Err(RecoError::CalibrationShape {
                table: "pad layout",
                expected: *offsets.last().unwrap_or(&0),
                actual: self.gain.len(),
            });
        }
        Ok(())
    }

    pub fn with_drift(mut self, drift: Arc<dyn DriftCalibration>) -> Self {
        self.drift = Some(drift);
        self
    }

    pub fn with_distortion(mut self, distortion: Arc<dyn DistortionMap>) -> Self {
        self.distortion = Some(distortion);
        self
    }

    pub fn with_shape_model(mut self, shape: Arc<dyn ShapeModel>) -> Self {
        self.shape = shape;
        self
    }

    /// Override one pad, e.g. to mark it noisy or dead.
    pub fn set_pad(&mut self, sector: usize, row: usize, pad: usize, gain: f32, noise: f32) {
        let idx = self.pad_index(sector, row, pad);
        self.gain[idx] = gain;
        self.noise[idx] = noise;
    }

    #[inline]
    fn pad_index(&self, sector: usize, row: usize, pad: usize) -> usize {
        let slot = sector * self.n_rows + row;
        let idx = self.offsets[slot] + pad;
        debug_assert!(idx < self.offsets[slot + 1], "pad {} out of row range", pad);
        idx
    }

    #[inline]
    fn slot_range(&self, sector: usize, row: usize) -> std::ops::Range<usize> {
        let slot = sector * self.n_rows + row;
        self.offsets[slot]..self.offsets[slot + 1]
    }

    #[inline]
    pub fn gain(&self, sector: usize, row: usize, pad: usize) -> f32 {
        self.gain[self.pad_index(sector, row, pad)]
    }

    #[inline]
    pub fn noise(&self, sector: usize, row: usize, pad: usize) -> f32 {
        self.noise[self.pad_index(sector, row, pad)]
    }

    /// Noise of every pad in a row, indexed by pad.
    #[inline]
    pub fn row_noise(&self, sector: usize, row: usize) -> &[f32] {
        &self.noise[self.slot_range(sector, row)]
    }

    #[inline]
    pub fn row_gain(&self, sector: usize, row: usize) -> &[f32] {
        &self.gain[self.slot_range(sector, row)]
    }

    pub fn drift(&self) -> Option<&Arc<dyn DriftCalibration>> {
        self.drift.as_ref()
    }

    pub fn distortion(&self) -> Option<&Arc<dyn DistortionMap>> {
        self.distortion.as_ref()
    }

    pub fn shape(&self) -> &Arc<dyn ShapeModel> {
        &self.shape
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Snapshots keyed by run number.
///
/// Populate every run an event batch needs before starting parallel work;
/// afterwards lookups only take the read lock.
#[derive(Default)]
pub struct CalibrationCache {
    entries: RwLock<HashMap<u32, Arc<CalibrationSnapshot>>>,
}

impl CalibrationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, run: u32) -> Option<Arc<CalibrationSnapshot>> {
        self.entries.read().get(&run).cloned()
    }

    /// Returns the cached snapshot for `run`, calling `load` on a miss.
    pub fn get_or_load<F>(&self, run: u32, load: F) -> Result<Arc<CalibrationSnapshot>, RecoError>
    where
        F: FnOnce(u32) -> Result<CalibrationSnapshot, RecoError>,
    {
        if let Some(snapshot) = self.get(run) {
            return Ok(snapshot);
        }

        let mut entries = self.entries.write();
        // another caller may have loaded it between the two locks
        if let Some(snapshot) = entries.get(&run) {
            return Ok(Arc::clone(snapshot));
        }
        let snapshot = Arc::new(load(run)?);
        tracing::debug!("Loaded calibration snapshot for run {}", run);
        entries.insert(run, Arc::clone(&snapshot));
        Ok(snapshot)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

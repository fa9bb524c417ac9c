//! Local track parameters and the Kalman steps that move them row by row.
//!
//! Parameters are `(y, z, sin φ, tan λ, C)` at radius `x` of the sector frame
//! rotated by `alpha`, with `C` the signed curvature in cm⁻¹ (d sin φ / dx).

use std::f64::consts::PI;

use nalgebra::{Matrix2, Matrix2x5, Matrix5, Vector2, Vector5};
use strum_macros::Display;

use crate::cluster::ClusterRef;

/// Why a track stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum StopReason {
    /// No further row in the follow direction.
    EndOfRows,
    /// Too many consecutive foundable rows without a cluster.
    MissingRows,
    /// The bend would take |sin φ| past the configured limit.
    BendLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TrackStatus {
    Seeded,
    Propagating,
    Stopped(StopReason),
}

/// Cluster attached to a track and its χ² contribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackHit {
    pub cluster: ClusterRef,
    pub chi2: f64,
}

/// Outcome of testing one cluster against the prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateOutcome {
    Accepted { chi2: f64 },
    /// χ² above the gate.
    Gated { chi2: f64 },
    /// Innovation covariance not positive definite.
    Singular,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackState {
    pub params: Vector5<f64>,
    pub cov: Matrix5<f64>,
    pub x: f64,
    pub sector: usize,
    /// Row at which the parameters were last evaluated.
    pub row: usize,
    pub status: TrackStatus,
    pub n_foundable: usize,
    pub chi2: f64,
    /// Consecutive foundable rows without a cluster.
    pub missing_run: usize,
    pub hits: Vec<TrackHit>,
}

impl TrackState {
    pub fn new(sector: usize, row: usize, x: f64, params: Vector5<f64>, cov: Matrix5<f64>) -> Self {
        Self {
            params,
            cov,
            x,
            sector,
            row,
            status: TrackStatus::Seeded,
            n_foundable: 0,
            chi2: 0.0,
            missing_run: 0,
            hits: Vec::new(),
        }
    }

    #[inline]
    pub fn y(&self) -> f64 {
        self.params[0]
    }

    #[inline]
    pub fn z(&self) -> f64 {
        self.params[1]
    }

    #[inline]
    pub fn snp(&self) -> f64 {
        self.params[2]
    }

    #[inline]
    pub fn tgl(&self) -> f64 {
        self.params[3]
    }

    #[inline]
    pub fn curvature(&self) -> f64 {
        self.params[4]
    }

    #[inline]
    pub fn n_clusters(&self) -> usize {
        self.hits.len()
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        matches!(self.status, TrackStatus::Stopped(_))
    }

    pub fn stop(&mut self, reason: StopReason) {
        if !self.is_stopped() {
            tracing::trace!(
                "Track stopped at row {} ({}), {} clusters",
                self.row,
                reason,
                self.n_clusters()
            );
            self.status = TrackStatus::Stopped(reason);
        }
    }

    /// Degrees of freedom of the accumulated χ².
    pub fn ndf(&self) -> usize {
        (2 * self.n_clusters()).saturating_sub(5)
    }

    pub fn chi2_per_ndf(&self) -> f64 {
        match self.ndf() {
            0 => 0.0,
            n => self.chi2 / n as f64,
        }
    }

    /// Found / foundable clusters.
    pub fn found_ratio(&self) -> f64 {
        if self.n_foundable == 0 {
            0.0
        } else {
            self.n_clusters() as f64 / self.n_foundable as f64
        }
    }

    /// Attach a cluster and count the row as foundable.
    pub fn add_hit(&mut self, cluster: ClusterRef, chi2: f64) {
        self.hits.push(TrackHit { cluster, chi2 });
        self.chi2 += chi2;
        self.n_foundable += 1;
        self.missing_run = 0;
    }

    /// A foundable row without an accepted cluster.
    pub fn add_miss(&mut self) {
        self.n_foundable += 1;
        self.missing_run += 1;
    }

    /// Move the parameters along the helix to radius `x2`.
    ///
    /// Returns `false`, leaving the state untouched, when |sin φ| would reach
    /// `max_snp` on the way.
    pub fn propagate_to(&mut self, x2: f64, max_snp: f64) -> bool {
        if self.is_stopped() {
            return false;
        }
        let dx = x2 - self.x;
        let c = self.curvature();
        let tgl = self.tgl();
        let f1 = self.snp();
        let f2 = f1 + c * dx;
        if f1.abs() >= max_snp || f2.abs() >= max_snp {
            return false;
        }

        let r1 = ((1.0 - f1) * (1.0 + f1)).sqrt();
        let r2 = ((1.0 - f2) * (1.0 + f2)).sqrt();
        let dy2dx = (f1 + f2) / (r1 + r2);

        let dz = if (c * dx).abs() < 0.05 {
            dx * (r2 + f2 * dy2dx) * tgl
        } else {
            // exact arc; large turns need the branch outside asin's range
            let mut rot = (r1 * f2 - r2 * f1).asin();
            if f1 * f1 + f2 * f2 > 1.0 && f1 * f2 < 0.0 {
                rot = if f2 > 0.0 { PI - rot } else { -PI - rot };
            }
            tgl / c * rot
        };

        let r13 = r1 * r1 * r1;
        let mut f = Matrix5::identity();
        f[(0, 2)] = dx / r13;
        f[(0, 4)] = 0.5 * dx * dx / r13;
        f[(1, 2)] = dx * tgl * f1 / r13;
        f[(1, 3)] = dx / r1;
        f[(1, 4)] = 0.5 * dx * dx * tgl * f1 / r13;
        f[(2, 4)] = dx;

        self.params[0] += dx * dy2dx;
        self.params[1] += dz;
        self.params[2] = f2;
        self.x = x2;
        self.cov = symmetrized(f * self.cov * f.transpose());
        true
    }

    /// Process noise for multiple scattering over a step `dx` in x.
    ///
    /// `momentum` in GeV/c, `mass` in GeV/c², `radiation_length` in cm.
    pub fn add_multiple_scattering(
        &mut self,
        dx: f64,
        momentum: f64,
        mass: f64,
        radiation_length: f64,
    ) {
        let snp = self.snp();
        let tgl = self.tgl();
        let c = self.curvature();
        let cos2 = (1.0 - snp) * (1.0 + snp);
        if cos2 <= 0.0 || momentum <= 0.0 {
            return;
        }
        let tgl2 = 1.0 + tgl * tgl;
        let path = dx.abs() * (tgl2 / cos2).sqrt();
        let p2 = momentum * momentum;
        let beta2 = p2 / (p2 + mass * mass);
        let theta2 = 0.0136 * 0.0136 / (beta2 * p2) * path / radiation_length;

        self.cov[(2, 2)] += theta2 * cos2 * tgl2;
        self.cov[(3, 3)] += theta2 * tgl2 * tgl2;
        let c43 = theta2 * tgl * c * tgl2;
        self.cov[(4, 3)] += c43;
        self.cov[(3, 4)] += c43;
        self.cov[(4, 4)] += theta2 * tgl * tgl * c * c;
    }

    /// Rotate into the frame turned by `dalpha` around the beam axis.
    ///
    /// Returns `false`, leaving the state untouched, if the new sin φ reaches
    /// `max_snp` or the track would point backwards in the new frame.
    pub fn rotate(&mut self, dalpha: f64, max_snp: f64) -> bool {
        let (sa, ca) = dalpha.sin_cos();
        let sf = self.snp();
        let cf = ((1.0 - sf) * (1.0 + sf)).sqrt();
        let new_snp = sf * ca - cf * sa;
        if new_snp.abs() >= max_snp || cf * ca + sf * sa <= 0.0 {
            return false;
        }

        let x = self.x;
        let y = self.y();
        let rr = ca + sf / cf * sa;
        let j = Matrix5::from_diagonal(&Vector5::new(ca, 1.0, rr, 1.0, 1.0));

        self.x = x * ca + y * sa;
        self.params[0] = -x * sa + y * ca;
        self.params[2] = new_snp;
        self.cov = symmetrized(j * self.cov * j.transpose());
        true
    }

    /// Predicted χ² of a measurement `(y, z)` with variances `(err_y2, err_z2)`.
    /// `None` when the innovation covariance cannot be inverted.
    pub fn predicted_chi2(&self, y: f64, z: f64, err_y2: f64, err_z2: f64) -> Option<f64> {
        let (residual, s_inv) = self.innovation(y, z, err_y2, err_z2)?;
        Some((residual.transpose() * s_inv * residual)[(0, 0)])
    }

    fn innovation(
        &self,
        y: f64,
        z: f64,
        err_y2: f64,
        err_z2: f64,
    ) -> Option<(Vector2<f64>, Matrix2<f64>)> {
        let s = Matrix2::new(
            self.cov[(0, 0)] + err_y2,
            self.cov[(0, 1)],
            self.cov[(1, 0)],
            self.cov[(1, 1)] + err_z2,
        );
        if !(s[(0, 0)] > 0.0 && s[(1, 1)] > 0.0 && s.determinant() > 0.0) {
            return None;
        }
        let s_inv = s.try_inverse()?;
        let residual = Vector2::new(y - self.y(), z - self.z());
        Some((residual, s_inv))
    }

    /// Gate the measurement at `max_chi2` and, if it passes, apply the Kalman
    /// update. Counters are left to the caller.
    pub fn update(
        &mut self,
        y: f64,
        z: f64,
        err_y2: f64,
        err_z2: f64,
        max_chi2: f64,
        max_snp: f64,
    ) -> UpdateOutcome {
        let Some((residual, s_inv)) = self.innovation(y, z, err_y2, err_z2) else {
            return UpdateOutcome::Singular;
        };
        let chi2 = (residual.transpose() * s_inv * residual)[(0, 0)];
        if chi2.is_nan() || chi2 > max_chi2 {
            return UpdateOutcome::Gated { chi2 };
        }

        let h = Matrix2x5::new(
            1.0, 0.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, 0.0,
        );
        let r = Matrix2::new(err_y2, 0.0, 0.0, err_z2);
        let k = self.cov * h.transpose() * s_inv;
        let params = self.params + k * residual;
        if params[2].abs() >= max_snp {
            return UpdateOutcome::Gated { chi2 };
        }

        // Joseph form keeps the covariance positive semi-definite
        let i_kh = Matrix5::identity() - k * h;
        let cov = i_kh * self.cov * i_kh.transpose() + k * r * k.transpose();

        self.params = params;
        self.cov = symmetrized(cov);
        UpdateOutcome::Accepted { chi2 }
    }
}

#[inline]
fn symmetrized(m: Matrix5<f64>) -> Matrix5<f64> {
    (m + m.transpose()) * 0.5
}

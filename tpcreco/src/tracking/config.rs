//! Track follower configuration.
//!
//! Lengths are in cm, curvature in cm⁻¹, magnetic field in kG and momenta
//! in GeV/c.

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::cluster::{Cluster, ClusterKind};
use crate::geometry::PadRow;

/// Which way along the pad rows a track is followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
pub enum FollowDirection {
    /// Outer rows towards the inner rows.
    #[default]
    Inward,
    Outward,
}

impl FollowDirection {
    /// Row index increment per step.
    #[inline]
    pub fn step(self) -> isize {
        match self {
            FollowDirection::Inward => -1,
            FollowDirection::Outward => 1,
        }
    }
}

/// Measurement variance of a cluster from its shape.
///
/// `σ²_y = y_floor + y_scale · σ²_pad · pitch²`, and the same for z with the
/// time-bin width. Unfolded clusters are inflated by their overlap, edge
/// clusters by `edge_scale`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterErrorConfig {
    pub y_floor: f64,
    pub z_floor: f64,
    pub y_scale: f64,
    pub z_scale: f64,
    /// Variance multiplier per unit of overlap fraction.
    pub overlap_scale: f64,
    pub edge_scale: f64,
}

impl Default for ClusterErrorConfig {
    fn default() -> Self {
        Self {
            y_floor: 0.0025,
            z_floor: 0.0025,
            y_scale: 0.1,
            z_scale: 0.1,
            overlap_scale: 1.0,
            edge_scale: 4.0,
        }
    }
}

impl ClusterErrorConfig {
    /// `(σ²_y, σ²_z)` in cm².
    pub fn variances(&self, cluster: &Cluster, row: &PadRow, z_width: f64) -> (f64, f64) {
        let mut y2 =
            self.y_floor + self.y_scale * cluster.sigma_pad2 * row.pad_pitch * row.pad_pitch;
        let mut z2 = self.z_floor + self.z_scale * cluster.sigma_time2 * z_width * z_width;
        if let ClusterKind::Unfolded { overlap } = cluster.kind {
            let factor = 1.0 + self.overlap_scale * overlap as f64 / 100.0;
            y2 *= factor;
            z2 *= factor;
        }
        if cluster.edge {
            y2 *= self.edge_scale;
            z2 *= self.edge_scale;
        }
        (y2, z2)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    // -- Field and material --
    /// Solenoid field along z (kG).
    pub magnetic_field: f64,
    /// Add multiple-scattering noise while propagating.
    pub multiple_scattering: bool,
    /// Radiation length of the drift gas (cm).
    pub radiation_length: f64,
    /// Mass hypothesis for scattering (GeV/c²).
    pub particle_mass: f64,
    /// Momentum assumed when the curvature carries no information
    /// (field off or straight track).
    pub default_momentum: f64,

    // -- Propagation --
    pub direction: FollowDirection,
    /// Largest |sin φ| a track may reach before it is stopped.
    pub max_snp: f64,

    // -- Cluster search --
    /// Road half width in units of the combined track and cluster error.
    pub road_sigmas: f64,
    pub max_road_y: f64,
    pub max_road_z: f64,
    /// χ² cut (2 degrees of freedom) for attaching a cluster.
    pub max_chi2: f64,
    /// Consecutive foundable rows without a cluster before the track stops.
    pub max_missing_rows: usize,
    /// Band at each sector edge where rows do not count as foundable.
    pub dead_zone: f64,
    pub cluster_errors: ClusterErrorConfig,

    // -- Seeding --
    /// Row distance between the three clusters of a seed.
    pub seed_gap: usize,
    /// Number of anchor rows, starting at the first row in the follow direction.
    pub seed_anchor_rows: usize,
    /// Row distance between consecutive anchor rows.
    pub seed_anchor_step: usize,
    /// Largest |curvature| accepted for a seed.
    pub seed_max_curvature: f64,
    /// Largest |dz/dx| between the outer seed clusters.
    pub seed_max_dzdx: f64,
    /// Window for the middle cluster around the straight line through the
    /// outer two.
    pub seed_road_y: f64,
    pub seed_road_z: f64,
    /// Scale of the initial angular and curvature errors.
    pub seed_error_scale: f64,

    // -- Arbitration --
    /// Tracks sharing more than this fraction of clusters with better
    /// tracks are dropped.
    pub max_shared_fraction: f64,
    pub min_clusters: usize,
    /// Refit surviving tracks through their own clusters.
    pub refit: bool,

    // -- Scheduling --
    /// Tracks followed concurrently. 0 = one per rayon worker.
    pub max_concurrent_tracks: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            // Field and material
            magnetic_field: 5.0,
            multiple_scattering: true,
            radiation_length: 28_000.0,
            particle_mass: 0.139_57,
            default_momentum: 1.0,

            // Propagation
            direction: FollowDirection::Inward,
            max_snp: 0.85,

            // Cluster search
            road_sigmas: 5.0,
            max_road_y: 2.0,
            max_road_z: 2.0,
            max_chi2: 30.0,
            max_missing_rows: 5,
            dead_zone: 0.5,
            cluster_errors: ClusterErrorConfig::default(),

            // Seeding
            seed_gap: 4,
            seed_anchor_rows: 3,
            seed_anchor_step: 10,
            seed_max_curvature: 0.02,
            seed_max_dzdx: 2.0,
            seed_road_y: 1.0,
            seed_road_z: 1.0,
            seed_error_scale: 2.0,

            // Arbitration
            max_shared_fraction: 0.5,
            min_clusters: 10,
            refit: true,

            // Scheduling
            max_concurrent_tracks: 0,
        }
    }
}

impl TrackerConfig {
    /// Validate the configuration, panicking if invalid.
    pub fn validate(&self) {
        assert!(
            self.max_snp > 0.0 && self.max_snp < 1.0,
            "max_snp must be in (0, 1), got {}",
            self.max_snp
        );
        assert!(
            self.radiation_length > 0.0,
            "radiation_length must be positive, got {}",
            self.radiation_length
        );
        assert!(
            self.particle_mass >= 0.0 && self.default_momentum > 0.0,
            "particle_mass must be non-negative and default_momentum positive"
        );
        assert!(
            self.road_sigmas > 0.0 && self.max_road_y > 0.0 && self.max_road_z > 0.0,
            "road parameters must be positive"
        );
        assert!(
            self.max_chi2 > 0.0,
            "max_chi2 must be positive, got {}",
            self.max_chi2
        );
        assert!(
            self.dead_zone >= 0.0,
            "dead_zone must be non-negative, got {}",
            self.dead_zone
        );
        assert!(self.seed_gap >= 1, "seed_gap must be at least 1");
        assert!(
            self.seed_anchor_step >= 1,
            "seed_anchor_step must be at least 1"
        );
        assert!(
            self.seed_max_curvature > 0.0 && self.seed_max_dzdx > 0.0,
            "seed limits must be positive"
        );
        assert!(
            self.seed_road_y > 0.0 && self.seed_road_z > 0.0,
            "seed roads must be positive"
        );
        assert!(
            self.seed_error_scale > 0.0,
            "seed_error_scale must be positive, got {}",
            self.seed_error_scale
        );
        assert!(
            (0.0..=1.0).contains(&self.max_shared_fraction),
            "max_shared_fraction must be in [0, 1], got {}",
            self.max_shared_fraction
        );
        let e = &self.cluster_errors;
        assert!(
            e.y_floor > 0.0 && e.z_floor > 0.0,
            "cluster error floors must be positive"
        );
        assert!(
            e.y_scale >= 0.0 && e.z_scale >= 0.0 && e.overlap_scale >= 0.0 && e.edge_scale >= 1.0,
            "cluster error scales must be non-negative and edge_scale >= 1"
        );
    }

    // =========================================================================
    // Preset Constructors
    // =========================================================================

    /// Busy events: tighter roads and stricter sharing.
    pub fn high_occupancy() -> Self {
        Self {
            road_sigmas: 4.0,
            max_road_y: 1.0,
            max_road_z: 1.0,
            max_chi2: 20.0,
            max_shared_fraction: 0.25,
            ..Self::default()
        }
    }

    /// Cosmic muons crossing the whole chamber: long gaps tolerated, long
    /// tracks required, no field-dependent curvature cut.
    pub fn cosmics() -> Self {
        Self {
            magnetic_field: 0.0,
            default_momentum: 10.0,
            particle_mass: 0.105_66,
            max_missing_rows: 12,
            min_clusters: 30,
            seed_max_curvature: 0.005,
            ..Self::default()
        }
    }

    /// Momentum (GeV/c) for a track of curvature `c` and dip `tgl`.
    pub fn momentum(&self, curvature: f64, tgl: f64) -> f64 {
        let b = self.magnetic_field.abs();
        let pt = if b < 1e-6 || curvature.abs() < 1e-9 {
            self.default_momentum
        } else {
            (B2C * b / curvature.abs()).min(100.0)
        };
        pt * (1.0 + tgl * tgl).sqrt()
    }
}

/// Curvature (cm⁻¹) of a 1 GeV/c track in a 1 kG field.
pub const B2C: f64 = 0.299_792_458e-3;

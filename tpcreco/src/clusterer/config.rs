//! Cluster finder configuration.
//!
//! Amplitude thresholds are in gain-equalized ADC counts; `*_sigma` cuts are
//! multiples of the pad's noise.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClustererConfig {
    // -- Zero suppression --
    /// Samples at or below this value are treated as empty.
    pub zero_suppression: f32,

    // -- Peak search --
    /// Minimum peak amplitude.
    pub min_max_cut_abs: f32,
    /// Minimum peak amplitude in units of pad noise.
    pub min_max_cut_sigma: f32,
    /// Minimum sum of the peak and its two pad neighbours.
    pub min_left_right_cut_abs: f32,
    pub min_left_right_cut_sigma: f32,
    /// Minimum sum of the peak and its two time neighbours.
    pub min_up_down_cut_abs: f32,
    pub min_up_down_cut_sigma: f32,
    /// Pads noisier than this never seed a cluster.
    pub max_noise: f32,

    // -- Cluster shape --
    /// Substitute expected tail charge for sub-threshold window cells.
    pub virtual_charge: bool,
    /// Measured/expected variance ratio below which a direction is "too narrow".
    pub narrow_ratio: f64,
    /// Measured/expected variance ratio above which unfolding is attempted.
    pub wide_ratio: f64,
    /// Keep clusters narrower than `narrow_ratio` in both directions, tagged
    /// as noise. When off they are dropped.
    pub keep_noise_clusters: bool,

    // -- Unfolding --
    pub unfold: bool,
    /// Projected charge a side needs before it is examined for overlap.
    pub unfold_min_side_charge: f64,
    /// A side whose distance-2/distance-1 ratio exceeds the single-hit
    /// expectation by this factor is considered contaminated.
    pub unfold_slow_falloff: f64,

    // -- Coordinates --
    /// Remove the particle's flight time from the measured drift time.
    pub time_of_flight: bool,

    // -- Scheduling --
    /// Rows processed concurrently. 0 = one per rayon worker.
    pub max_concurrent_rows: usize,
}

impl Default for ClustererConfig {
    fn default() -> Self {
        Self {
            // Zero suppression
            zero_suppression: 2.0,

            // Peak search
            min_max_cut_abs: 4.0,
            min_max_cut_sigma: 4.0,
            min_left_right_cut_abs: 6.0,
            min_left_right_cut_sigma: 7.0,
            min_up_down_cut_abs: 6.0,
            min_up_down_cut_sigma: 8.0,
            max_noise: 5.0,

            // Cluster shape
            virtual_charge: true,
            narrow_ratio: 0.6,
            wide_ratio: 1.2,
            keep_noise_clusters: true,

            // Unfolding
            unfold: true,
            unfold_min_side_charge: 3.0,
            unfold_slow_falloff: 3.0,

            // Coordinates
            time_of_flight: false,

            // Scheduling
            max_concurrent_rows: 0,
        }
    }
}

impl ClustererConfig {
    /// Validate the configuration, panicking if invalid.
    pub fn validate(&self) {
        assert!(
            self.zero_suppression >= 0.0,
            "zero_suppression must be non-negative, got {}",
            self.zero_suppression
        );
        for (name, value) in [
            ("min_max_cut_abs", self.min_max_cut_abs),
            ("min_max_cut_sigma", self.min_max_cut_sigma),
            ("min_left_right_cut_abs", self.min_left_right_cut_abs),
            ("min_left_right_cut_sigma", self.min_left_right_cut_sigma),
            ("min_up_down_cut_abs", self.min_up_down_cut_abs),
            ("min_up_down_cut_sigma", self.min_up_down_cut_sigma),
        ] {
            assert!(value >= 0.0, "{} must be non-negative, got {}", name, value);
        }
        assert!(
            self.max_noise > 0.0,
            "max_noise must be positive, got {}",
            self.max_noise
        );
        assert!(
            self.narrow_ratio > 0.0 && self.narrow_ratio < self.wide_ratio,
            "need 0 < narrow_ratio ({}) < wide_ratio ({})",
            self.narrow_ratio,
            self.wide_ratio
        );
        assert!(
            self.unfold_min_side_charge >= 0.0,
            "unfold_min_side_charge must be non-negative, got {}",
            self.unfold_min_side_charge
        );
        assert!(
            self.unfold_slow_falloff >= 1.0,
            "unfold_slow_falloff must be >= 1.0, got {}",
            self.unfold_slow_falloff
        );
    }

    // =========================================================================
    // Preset Constructors
    // =========================================================================

    /// Dense events (central heavy-ion collisions): unfold earlier and keep
    /// the seed thresholds slightly higher to limit noise peaks on busy rows.
    pub fn high_occupancy() -> Self {
        Self {
            min_max_cut_abs: 5.0,
            min_left_right_cut_abs: 8.0,
            min_up_down_cut_abs: 8.0,
            wide_ratio: 1.1,
            unfold_slow_falloff: 2.0,
            ..Self::default()
        }
    }

    /// Sparse, quiet events (cosmics, laser): lower thresholds, no unfolding.
    pub fn low_occupancy() -> Self {
        Self {
            min_max_cut_abs: 3.0,
            min_left_right_cut_abs: 5.0,
            min_up_down_cut_abs: 5.0,
            unfold: false,
            ..Self::default()
        }
    }
}

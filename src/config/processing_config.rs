// src/config/processing_config.rs
//! Per-stage configuration structures for the decomposition engine

use serde::{Deserialize, Serialize};

use crate::config::constants::{duplicates, editing, extension, quality, separation, spikes, whitening};

/// Time-delay embedding parameters
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ExtensionConfig {
    pub surface_target_channels: usize,
    pub intramuscular_target_channels: usize,
    pub max_factor: usize,
}

/// Whitening parameters
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct WhiteningConfig {
    pub relative_eigen_threshold: f64,
}

/// Fixed-point source extraction parameters
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SeparationConfig {
    /// Number of extraction attempts per grid
    pub iterations: usize,
    pub max_fixed_point_iterations: usize,
    pub tolerance: f64,
    pub contrast: Contrast,
    /// Minimum SIL for an extracted source to be kept as a motor unit
    pub sil_threshold: f64,
    /// Reject sources whose inter-spike intervals vary more than `cov_threshold`
    pub cov_filter: bool,
    pub cov_threshold: f64,
    pub peel_off: bool,
    pub peel_off_window_s: f64,
    pub refine_cov_isi: bool,
    pub max_cov_isi_iterations: usize,
    /// Equal segments of the recording, each decomposed with its own whitening
    pub windows: usize,
    /// Outlier removal and a whole-signal filter update on every accepted unit
    pub refine_units: bool,
    pub seed: u64,
}

/// Spike detection and classification parameters
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SpikeConfig {
    pub refractory_s: f64,
    pub normalization_top_n: usize,
    pub outlier_sigma: f64,
}

/// Silhouette scoring parameters
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct QualityConfig {
    pub min_discharges: usize,
    pub continuous_window_s: f64,
    pub continuous_step_s: f64,
}

/// Duplicate resolution parameters
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct DuplicateConfig {
    pub coincidence_tolerance_s: f64,
    /// Fraction of the smaller unit's discharges that must coincide
    pub duplicate_threshold: f64,
    /// Remove units duplicated across grids at the end of a decomposition
    pub resolve_between_grids: bool,
}

/// Editing session parameters
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct EditingConfig {
    pub undo_depth: usize,
    pub rate_cov_threshold: f64,
    pub max_outlier_iterations: usize,
}

/// Contrast function used by the fixed-point iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Contrast {
    /// G(a) = a³/3
    #[default]
    Skew,
    /// G(a) = a⁴/4
    Kurtosis,
    /// G(a) = log cosh a
    LogCosh,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            surface_target_channels: extension::SURFACE_TARGET_EXTENDED_CHANNELS,
            intramuscular_target_channels: extension::INTRAMUSCULAR_TARGET_EXTENDED_CHANNELS,
            max_factor: extension::MAX_EXTENSION_FACTOR,
        }
    }
}

impl Default for WhiteningConfig {
    fn default() -> Self {
        Self {
            relative_eigen_threshold: whitening::DEFAULT_RELATIVE_EIGEN_THRESHOLD,
        }
    }
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            iterations: separation::DEFAULT_ITERATIONS,
            max_fixed_point_iterations: separation::DEFAULT_MAX_FIXED_POINT_ITERATIONS,
            tolerance: separation::DEFAULT_CONVERGENCE_TOLERANCE,
            contrast: Contrast::default(),
            sil_threshold: separation::DEFAULT_SIL_THRESHOLD,
            cov_filter: true,
            cov_threshold: separation::DEFAULT_COV_THRESHOLD,
            peel_off: true,
            peel_off_window_s: separation::DEFAULT_PEEL_OFF_WINDOW_S,
            refine_cov_isi: true,
            max_cov_isi_iterations: separation::DEFAULT_MAX_COV_ISI_ITERATIONS,
            windows: separation::DEFAULT_WINDOWS,
            refine_units: false,
            seed: separation::DEFAULT_SEED,
        }
    }
}

impl Default for SpikeConfig {
    fn default() -> Self {
        Self {
            refractory_s: spikes::DEFAULT_REFRACTORY_S,
            normalization_top_n: spikes::DEFAULT_NORMALIZATION_TOP_N,
            outlier_sigma: spikes::DEFAULT_OUTLIER_SIGMA,
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_discharges: quality::MIN_DISCHARGES_FOR_SIL,
            continuous_window_s: quality::DEFAULT_CONTINUOUS_WINDOW_S,
            continuous_step_s: quality::DEFAULT_CONTINUOUS_STEP_S,
        }
    }
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            coincidence_tolerance_s: duplicates::DEFAULT_COINCIDENCE_TOLERANCE_S,
            duplicate_threshold: duplicates::DEFAULT_DUPLICATE_THRESHOLD,
            resolve_between_grids: true,
        }
    }
}

impl Default for EditingConfig {
    fn default() -> Self {
        Self {
            undo_depth: editing::DEFAULT_UNDO_DEPTH,
            rate_cov_threshold: editing::DEFAULT_RATE_COV_THRESHOLD,
            max_outlier_iterations: editing::DEFAULT_MAX_OUTLIER_ITERATIONS,
        }
    }
}

/// Convert a duration in seconds to a sample count, never below one sample
pub fn seconds_to_samples(seconds: f64, sampling_rate: f64) -> usize {
    ((seconds * sampling_rate).round() as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_to_samples() {
        assert_eq!(seconds_to_samples(0.005, 2000.0), 10);
        assert_eq!(seconds_to_samples(1.0 / 40.0, 2048.0), 51);
        assert_eq!(seconds_to_samples(0.0, 2000.0), 1);
    }

    #[test]
    fn test_contrast_serialization() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            contrast: Contrast,
        }

        let toml_str = toml::to_string(&Wrapper { contrast: Contrast::LogCosh }).unwrap();
        assert!(toml_str.contains("logcosh"));
        let parsed: Wrapper = toml::from_str("contrast = \"kurtosis\"").unwrap();
        assert_eq!(parsed.contrast, Contrast::Kurtosis);
    }

    #[test]
    fn test_default_contrast_is_skew() {
        assert_eq!(Contrast::default(), Contrast::Skew);
        assert_eq!(SeparationConfig::default().contrast, Contrast::Skew);
    }

    #[test]
    fn test_partial_section_uses_defaults() {
        let parsed: SpikeConfig = toml::from_str("refractory_s = 0.01").unwrap();
        assert_eq!(parsed.refractory_s, 0.01);
        assert_eq!(parsed.normalization_top_n, spikes::DEFAULT_NORMALIZATION_TOP_N);
    }
}

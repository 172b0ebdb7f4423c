// src/config/mod.rs
//! Engine configuration: typed sections, defaults and TOML loading

pub mod constants;
pub mod loader;
pub mod processing_config;

pub use loader::{ConfigError, ConfigLoader};
pub use processing_config::*;

use serde::{Deserialize, Serialize};

use crate::config::constants::editing::MAX_UNDO_DEPTH;
use crate::config::constants::quality::MIN_DISCHARGES_FOR_SIL;
use crate::model::SignalType;

/// Complete engine configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub extension: ExtensionConfig,

    #[serde(default)]
    pub whitening: WhiteningConfig,

    #[serde(default)]
    pub separation: SeparationConfig,

    #[serde(default)]
    pub spikes: SpikeConfig,

    #[serde(default)]
    pub quality: QualityConfig,

    #[serde(default)]
    pub duplicates: DuplicateConfig,

    #[serde(default)]
    pub editing: EditingConfig,
}

impl EngineConfig {
    /// Validate configuration consistency, collecting every violation
    pub fn validate_consistency(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.extension.max_factor == 0 {
            errors.push("Maximum extension factor must be at least 1".to_string());
        }
        if self.extension.surface_target_channels == 0 || self.extension.intramuscular_target_channels == 0 {
            errors.push("Target extended channel counts must be positive".to_string());
        }

        let threshold = self.whitening.relative_eigen_threshold;
        if !(threshold > 0.0 && threshold < 1.0) {
            errors.push(format!("Relative eigenvalue threshold ({}) must be in (0, 1)", threshold));
        }

        if self.separation.max_fixed_point_iterations == 0 {
            errors.push("Fixed-point iteration cap must be at least 1".to_string());
        }
        if self.separation.tolerance <= 0.0 {
            errors.push(format!("Convergence tolerance ({}) must be positive", self.separation.tolerance));
        }
        if !(0.0..=1.0).contains(&self.separation.sil_threshold) {
            errors.push(format!("SIL threshold ({}) must be in [0, 1]", self.separation.sil_threshold));
        }
        if self.separation.cov_threshold <= 0.0 {
            errors.push(format!("CoV threshold ({}) must be positive", self.separation.cov_threshold));
        }
        if self.separation.windows == 0 {
            errors.push("Decomposition needs at least one window".to_string());
        }
        if self.separation.peel_off_window_s <= 0.0 {
            errors.push("Peel-off window must be positive".to_string());
        }

        if self.spikes.refractory_s <= 0.0 {
            errors.push(format!("Refractory period ({} s) must be positive", self.spikes.refractory_s));
        }
        if self.spikes.normalization_top_n == 0 {
            errors.push("Normalization must use at least one discharge".to_string());
        }
        if self.spikes.outlier_sigma <= 0.0 {
            errors.push("Outlier sigma must be positive".to_string());
        }

        if self.quality.min_discharges < MIN_DISCHARGES_FOR_SIL {
            errors.push(format!(
                "SIL needs at least {} discharges, got {}",
                MIN_DISCHARGES_FOR_SIL, self.quality.min_discharges
            ));
        }
        if self.quality.continuous_window_s <= 0.0 || self.quality.continuous_step_s <= 0.0 {
            errors.push("Continuous SIL window and step must be positive".to_string());
        }
        if self.quality.continuous_step_s > self.quality.continuous_window_s {
            errors.push(format!(
                "Continuous SIL step ({} s) larger than its window ({} s) leaves gaps",
                self.quality.continuous_step_s, self.quality.continuous_window_s
            ));
        }

        if self.duplicates.coincidence_tolerance_s < 0.0 {
            errors.push("Coincidence tolerance cannot be negative".to_string());
        }
        if !(0.0..=1.0).contains(&self.duplicates.duplicate_threshold) {
            errors.push(format!(
                "Duplicate threshold ({}) must be in [0, 1]",
                self.duplicates.duplicate_threshold
            ));
        }

        if self.editing.undo_depth == 0 || self.editing.undo_depth > MAX_UNDO_DEPTH {
            errors.push(format!(
                "Undo depth ({}) must be between 1 and {}",
                self.editing.undo_depth, MAX_UNDO_DEPTH
            ));
        }
        if self.editing.rate_cov_threshold <= 0.0 {
            errors.push("Discharge-rate CoV threshold must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Target number of extended channels for a grid's signal type
    pub fn target_extended_channels(&self, signal_type: SignalType) -> usize {
        match signal_type {
            SignalType::Surface => self.extension.surface_target_channels,
            SignalType::Intramuscular => self.extension.intramuscular_target_channels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::constants::*;

    #[test]
    fn test_default_config_creation() {
        let config = EngineConfig::default();
        assert_eq!(config.duplicates.duplicate_threshold, duplicates::DEFAULT_DUPLICATE_THRESHOLD);
        assert_eq!(config.spikes.refractory_s, spikes::DEFAULT_REFRACTORY_S);
        assert_eq!(config.editing.undo_depth, 1);
        assert!(config.validate_consistency().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: EngineConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_empty_document_is_default() {
        let parsed: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(parsed, EngineConfig::default());
    }

    #[test]
    fn test_config_validation_collects_all_errors() {
        let mut config = EngineConfig::default();
        config.spikes.refractory_s = 0.0;
        config.duplicates.duplicate_threshold = 1.5;
        config.editing.undo_depth = 0;

        let errors = config.validate_consistency().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_min_discharges_below_sil_floor_is_rejected() {
        let mut config = EngineConfig::default();
        config.quality.min_discharges = 2;
        let errors = config.validate_consistency().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("at least 3"));
    }

    #[test]
    fn test_window_count_and_cov_threshold_are_validated() {
        let mut config = EngineConfig::default();
        config.separation.windows = 0;
        config.separation.cov_threshold = 0.0;
        assert_eq!(config.validate_consistency().unwrap_err().len(), 2);
    }

    #[test]
    fn test_target_channels_by_signal_type() {
        let config = EngineConfig::default();
        assert_eq!(config.target_extended_channels(SignalType::Surface), 1000);
        assert_eq!(config.target_extended_channels(SignalType::Intramuscular), 3000);
    }
}

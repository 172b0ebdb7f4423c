// src/config/constants.rs
//! Engine-wide default parameters
//!
//! Defaults observed in the reference decomposition workflow. Every value is
//! exposed through [`crate::config::EngineConfig`] so it can be overridden.

/// Time-delay embedding constants
pub mod extension {
    /// Target number of extended channels for surface grids
    pub const SURFACE_TARGET_EXTENDED_CHANNELS: usize = 1000;
    /// Target number of extended channels for intramuscular arrays
    pub const INTRAMUSCULAR_TARGET_EXTENDED_CHANNELS: usize = 3000;
    pub const MAX_EXTENSION_FACTOR: usize = 25;
    pub const MIN_EXTENSION_FACTOR: usize = 1;
}

/// Whitening constants
pub mod whitening {
    /// Eigenvalues below this fraction of the largest one are discarded
    pub const DEFAULT_RELATIVE_EIGEN_THRESHOLD: f64 = 1e-10;
}

/// Fixed-point separation constants
pub mod separation {
    pub const DEFAULT_ITERATIONS: usize = 30;
    pub const DEFAULT_MAX_FIXED_POINT_ITERATIONS: usize = 500;
    pub const DEFAULT_CONVERGENCE_TOLERANCE: f64 = 1e-4;
    pub const DEFAULT_SIL_THRESHOLD: f64 = 0.9;
    pub const DEFAULT_PEEL_OFF_WINDOW_S: f64 = 0.025;
    pub const DEFAULT_MAX_COV_ISI_ITERATIONS: usize = 50;
    /// Units need this many discharges before CoV-ISI refinement is attempted
    pub const MIN_DISCHARGES_FOR_REFINEMENT: usize = 10;
    pub const DEFAULT_SEED: u64 = 42;
    /// Largest CoV of the inter-spike intervals for an accepted unit
    pub const DEFAULT_COV_THRESHOLD: f64 = 0.5;
    /// Segments of the recording decomposed independently
    pub const DEFAULT_WINDOWS: usize = 1;
}

/// Spike detection constants
pub mod spikes {
    pub const DEFAULT_REFRACTORY_S: f64 = 0.005;
    pub const DEFAULT_NORMALIZATION_TOP_N: usize = 10;
    pub const DEFAULT_OUTLIER_SIGMA: f64 = 3.0;
    pub const MAX_CLUSTER_ITERATIONS: usize = 100;
}

/// Quality scoring constants
pub mod quality {
    pub const MIN_DISCHARGES_FOR_SIL: usize = 3;
    pub const DEFAULT_CONTINUOUS_WINDOW_S: f64 = 0.5;
    pub const DEFAULT_CONTINUOUS_STEP_S: f64 = 0.25;
}

/// Duplicate resolution constants
pub mod duplicates {
    /// Coincidence tolerance, fs/40 samples
    pub const DEFAULT_COINCIDENCE_TOLERANCE_S: f64 = 1.0 / 40.0;
    pub const DEFAULT_DUPLICATE_THRESHOLD: f64 = 0.3;
}

/// Editing session constants
pub mod editing {
    pub const DEFAULT_UNDO_DEPTH: usize = 1;
    pub const MAX_UNDO_DEPTH: usize = 64;
    /// Coefficient of variation of the discharge rate tolerated before outlier removal
    pub const DEFAULT_RATE_COV_THRESHOLD: f64 = 0.3;
    pub const DEFAULT_MAX_OUTLIER_ITERATIONS: usize = 30;
}

/// Configuration file discovery
pub mod paths {
    pub const DEFAULT_CONFIG_FILE: &str = "hdemg.toml";
    pub const ENV_PREFIX: &str = "HDEMG_";
}

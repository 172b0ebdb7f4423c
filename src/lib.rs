//! HDEMG-Core: high-density EMG decomposition and motor unit editing engine
//!
//! This library decomposes multi-channel surface or intramuscular EMG into
//! the discharge times of individual motor units and provides the editing
//! engine used to refine the result. It features:
//!
//! - Time-delay extension and whitening of electrode grids
//! - Fixed-point source separation with deflation, peel-off and CoV-ISI refinement
//! - Deterministic spike classification and silhouette (SIL) scoring
//! - Duplicate resolution within and between grids
//! - Windowed filter re-estimation with full-signal extension
//! - An editing session with undo, spike lock and deletion flags
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use hdemg_core::config::EngineConfig;
//! use hdemg_core::editing::EditingSession;
//! use hdemg_core::model::{Recording, UnitId};
//! use hdemg_core::processing::Decomposer;
//! use hdemg_core::utils::{CancellationToken, NoProgress};
//! use ndarray::Array2;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let data = Array2::<f64>::zeros((64, 20_000));
//!     let recording = Recording::single_grid(data, 2048.0)?;
//!
//!     let decomposer = Decomposer::new(EngineConfig::default())?;
//!     let output = decomposer.decompose(&recording, &CancellationToken::new(), &mut NoProgress)?;
//!
//!     let mut session = EditingSession::from_output(EngineConfig::default(), output)?;
//!     session.attach_recording(&recording)?;
//!     if !session.units(0)?.is_empty() {
//!         session.update_filter(UnitId::new(0, 0), &(0..4096))?;
//!     }
//!     let _payload = serde_json::to_string(&session.export())?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub mod config;
pub mod editing;
pub mod error;
pub mod model;
pub mod processing;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::{ConfigLoader, EngineConfig};
pub use editing::{EditingSession, SelectionRegion};
pub use error::{DecompError, DecompResult};
pub use model::{GridLayout, MotorUnit, Recording, SignalType, UnitId, UnitState};
pub use processing::{Decomposer, DecompositionOutput};
pub use utils::{BatchReport, CancellationToken, NoProgress, ProgressEvent, ProgressReporter};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get library information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: "High-density EMG decomposition and motor unit editing engine".to_string(),
        features: vec![
            "Convolutive blind source separation".to_string(),
            "Silhouette quality scoring".to_string(),
            "Duplicate motor unit resolution".to_string(),
            "Windowed filter refinement".to_string(),
            "Undoable editing session".to_string(),
        ],
    }
}

/// Library version information
#[derive(Debug, Clone)]
pub struct VersionInfo {
    /// Library name
    pub name: String,
    /// Version string
    pub version: String,
    /// Description
    pub description: String,
    /// List of features
    pub features: Vec<String>,
}

// src/processing/mod.rs
//! Decomposition stages, leaf first
//!
//! extension → whitening → separation → spikes → quality, with duplicate
//! resolution and filter refinement operating on the results.

pub mod decomposition;
pub mod duplicates;
pub mod extension;
pub mod observation;
pub mod quality;
pub mod refinement;
pub mod separation;
pub mod spikes;
pub mod whitening;

pub use decomposition::{Decomposer, DecompositionOutput, GridDecomposition};
pub use duplicates::{coincidence_count, coincidence_ratio, DuplicateResolver};
pub use extension::{demean, extend, extension_factor};
pub use observation::GridObservation;
pub use quality::{cov_isi, mean_discharge_rate, QualityScore, QualityScorer};
pub use refinement::{plan_extension, ExtensionReport, FilterRefiner, WindowUpdate};
pub use separation::{ExtractionStatus, Separator, SourceEstimate};
pub use spikes::{remove_rate_outliers, Classification, SpikeClassifier};
pub use whitening::{Whitener, Whitening};

// src/utils/mod.rs
//! Common utilities for the decomposition engine
//!
//! - Cooperative cancellation for batch loops
//! - Progress events and batch reports
//! - Descriptive statistics
//! - Discharge-set and window validation

pub mod cancel;
pub mod progress;
pub mod stats;
pub mod validation;

pub use cancel::CancellationToken;
pub use progress::{BatchReport, NoProgress, ProgressEvent, ProgressReporter};
pub use validation::{normalize_discharge_times, validate_discharge_times, validate_window};

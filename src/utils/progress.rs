// src/utils/progress.rs
//! Progress events and batch outcome reporting

use std::ops::Range;

use serde::Serialize;

use crate::error::DecompError;
use crate::model::UnitId;

/// Scalar progress and quality events for live display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ProgressEvent {
    /// One separation attempt on a grid finished
    Iteration {
        grid: usize,
        iteration: usize,
        total: usize,
        sil: f64,
        cov_isi: Option<f64>,
        accepted: bool,
    },
    /// A grid was skipped because its covariance was degenerate
    GridSkipped { grid: usize, reason: String },
    /// One window of a filter extension was processed
    WindowStep {
        unit: UnitId,
        step: usize,
        total: usize,
        window: Range<usize>,
        sil: f64,
    },
    /// A batch operation finished one unit
    BatchStep { unit: UnitId, completed: usize, total: usize },
    /// Decomposition of every grid finished
    Completed { units: usize },
}

/// Receiver of progress events
///
/// Implemented for any `FnMut(ProgressEvent)` closure.
pub trait ProgressReporter {
    fn report(&mut self, event: ProgressEvent);
}

impl<F> ProgressReporter for F
where
    F: FnMut(ProgressEvent),
{
    fn report(&mut self, event: ProgressEvent) {
        self(event)
    }
}

/// Reporter that discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&mut self, _event: ProgressEvent) {}
}

/// Outcome of a batch operation over many motor units
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Units processed successfully
    pub processed: usize,
    /// Units left unchanged, e.g. too few discharges
    pub skipped: usize,
    pub failures: Vec<(UnitId, DecompError)>,
    /// The batch stopped early on request; processed units keep their changes
    pub cancelled: bool,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failures.is_empty()
    }
}

// src/editing/selection.rs
//! Rectangular region edits on a pulse train or discharge-rate trace

use std::ops::Range;

use ndarray::{s, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::processing::spikes::{discharge_rates, find_peaks};

/// Sample range × value range drawn by the operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionRegion {
    pub samples: Range<usize>,
    pub min: f64,
    pub max: f64,
}

impl SelectionRegion {
    /// Region with its value bounds put in order
    pub fn new(samples: Range<usize>, a: f64, b: f64) -> Self {
        Self {
            samples,
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Region from a time span in seconds
    pub fn from_seconds(start_s: f64, end_s: f64, a: f64, b: f64, sampling_rate: f64) -> Self {
        let (start_s, end_s) = (start_s.min(end_s).max(0.0), start_s.max(end_s).max(0.0));
        let start = (start_s * sampling_rate).round() as usize;
        let end = (end_s * sampling_rate).round() as usize;
        Self::new(start..end, a, b)
    }

    pub fn contains(&self, sample: usize, value: f64) -> bool {
        self.samples.contains(&sample) && value >= self.min && value <= self.max
    }

    fn clipped(&self, len: usize) -> Range<usize> {
        self.samples.start.min(len)..self.samples.end.min(len)
    }
}

/// Discharges plus every pulse-train peak inside the region
pub fn add_spikes(
    pulse_train: ArrayView1<f64>,
    discharge_times: &[usize],
    region: &SelectionRegion,
    min_distance: usize,
) -> Vec<usize> {
    let range = region.clipped(pulse_train.len());
    let mut times = discharge_times.to_vec();
    if range.is_empty() {
        return times;
    }

    let segment = pulse_train.slice(s![range.start..range.end]);
    times.extend(
        find_peaks(segment, min_distance)
            .into_iter()
            .map(|p| p + range.start)
            .filter(|&t| region.contains(t, pulse_train[t])),
    );
    times.sort_unstable();
    times.dedup();
    times
}

/// Discharges outside the region
pub fn delete_spikes(pulse_train: ArrayView1<f64>, discharge_times: &[usize], region: &SelectionRegion) -> Vec<usize> {
    discharge_times
        .iter()
        .copied()
        .filter(|&t| t >= pulse_train.len() || !region.contains(t, pulse_train[t]))
        .collect()
}

/// Drop discharges whose instantaneous rate (to the previous discharge) lies in the region
pub fn delete_discharge_rates(discharge_times: &[usize], sampling_rate: f64, region: &SelectionRegion) -> Vec<usize> {
    let rates = discharge_rates(discharge_times, sampling_rate);
    let mut kept = Vec::with_capacity(discharge_times.len());
    kept.extend(discharge_times.first().copied());
    for (&t, &rate) in discharge_times.iter().skip(1).zip(rates.iter()) {
        if !region.contains(t, rate) {
            kept.push(t);
        }
    }
    kept
}

// src/utils/validation.rs
//! Validation helpers for discharge sets and sample windows

use std::ops::Range;

use crate::error::{DecompError, DecompResult};

/// Sort, deduplicate and range-restrict discharge times
///
/// Returns the cleaned set and how many entries were dropped.
pub fn normalize_discharge_times(mut times: Vec<usize>, len: usize) -> (Vec<usize>, usize) {
    let original = times.len();
    times.retain(|&t| t < len);
    times.sort_unstable();
    times.dedup();
    let dropped = original - times.len();
    (times, dropped)
}

/// Check that discharge times are strictly increasing and inside `[0, len)`
pub fn validate_discharge_times(times: &[usize], len: usize) -> DecompResult<()> {
    if let Some(&last) = times.last() {
        if last >= len {
            return Err(DecompError::invalid_shape(
                "discharge times",
                format!("index {} outside a pulse train of {} samples", last, len),
            ));
        }
    }
    if let Some(pair) = times.windows(2).find(|pair| pair[0] >= pair[1]) {
        return Err(DecompError::invalid_shape(
            "discharge times",
            format!("{} followed by {} is not strictly increasing", pair[0], pair[1]),
        ));
    }
    Ok(())
}

/// Check that a sample window is non-empty and inside `[0, len)`
pub fn validate_window(window: &Range<usize>, len: usize) -> DecompResult<()> {
    if window.start >= window.end || window.end > len {
        return Err(DecompError::InvalidWindow {
            start: window.start,
            end: window.end,
            len,
        });
    }
    Ok(())
}

/// Check a sampling rate before converting durations to samples
pub fn validate_sampling_rate(sampling_rate: f64) -> DecompResult<()> {
    if sampling_rate.is_finite() && sampling_rate > 0.0 {
        Ok(())
    } else {
        Err(DecompError::Configuration(format!(
            "Sampling rate must be positive, got {}",
            sampling_rate
        )))
    }
}

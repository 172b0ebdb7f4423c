// src/model/signal.rs
//! Recording and grid layout types supplied by the import collaborators

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{DecompError, DecompResult};
use crate::utils::validation::validate_sampling_rate;

/// Electrode signal type of a grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    #[default]
    Surface,
    Intramuscular,
}

/// One electrode grid: channel indices into the recording plus its rejection mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridLayout {
    pub name: String,
    pub channels: Vec<usize>,
    /// `true` marks a channel excluded from computation
    pub rejected: Vec<bool>,
    pub signal_type: SignalType,
}

impl GridLayout {
    /// Grid over `channels` with no rejected channel
    pub fn new(name: &str, channels: Vec<usize>, signal_type: SignalType) -> Self {
        let rejected = vec![false; channels.len()];
        Self {
            name: name.to_string(),
            channels,
            rejected,
            signal_type,
        }
    }

    /// Replace the rejection mask
    pub fn with_rejected(mut self, rejected: Vec<bool>) -> Self {
        self.rejected = rejected;
        self
    }

    /// Recording rows used for computation
    pub fn active_channels(&self) -> Vec<usize> {
        self.channels
            .iter()
            .zip(self.rejected.iter())
            .filter(|(_, &rejected)| !rejected)
            .map(|(&channel, _)| channel)
            .collect()
    }
}

/// Parsed multi-grid recording
#[derive(Debug, Clone)]
pub struct Recording {
    /// Channels × samples
    pub data: Array2<f64>,
    pub sampling_rate: f64,
    pub grids: Vec<GridLayout>,
}

impl Recording {
    /// Build a recording, checking the grid layout against the channel matrix
    pub fn new(data: Array2<f64>, sampling_rate: f64, grids: Vec<GridLayout>) -> DecompResult<Self> {
        let (channel_count, sample_count) = data.dim();
        if channel_count == 0 || sample_count == 0 {
            return Err(DecompError::invalid_shape(
                "recording",
                format!("{} channels x {} samples", channel_count, sample_count),
            ));
        }
        validate_sampling_rate(sampling_rate)?;

        for (index, grid) in grids.iter().enumerate() {
            if grid.rejected.len() != grid.channels.len() {
                return Err(DecompError::invalid_shape(
                    "grid layout",
                    format!(
                        "grid {} has {} channels but a rejection mask of {}",
                        index,
                        grid.channels.len(),
                        grid.rejected.len()
                    ),
                ));
            }
            if let Some(&channel) = grid.channels.iter().find(|&&c| c >= channel_count) {
                return Err(DecompError::invalid_shape(
                    "grid layout",
                    format!("grid {} references channel {} of {}", index, channel, channel_count),
                ));
            }
        }

        Ok(Self {
            data,
            sampling_rate,
            grids,
        })
    }

    /// Single-grid recording over every channel
    pub fn single_grid(data: Array2<f64>, sampling_rate: f64) -> DecompResult<Self> {
        let grid = GridLayout::new("grid-1", (0..data.nrows()).collect(), SignalType::Surface);
        Self::new(data, sampling_rate, vec![grid])
    }

    pub fn sample_count(&self) -> usize {
        self.data.ncols()
    }

    pub fn grid_count(&self) -> usize {
        self.grids.len()
    }

    /// Non-rejected channels of one grid
    pub fn grid_channels(&self, grid: usize) -> DecompResult<Array2<f64>> {
        let layout = self.grids.get(grid).ok_or(DecompError::GridNotFound(grid))?;
        let active = layout.active_channels();
        if active.is_empty() {
            return Err(DecompError::invalid_shape(
                "grid channels",
                format!("every channel of grid {} is rejected", grid),
            ));
        }
        Ok(self.data.select(Axis(0), &active))
    }

    /// Shared time vector in seconds
    pub fn time_vector(&self) -> Vec<f64> {
        (0..self.sample_count())
            .map(|i| i as f64 / self.sampling_rate)
            .collect()
    }
}

// src/processing/observation.rs
//! Extended and whitened observation of one grid
//!
//! Built once per grid and shared by source extraction and filter
//! refinement, so both work in the same whitened coordinates.

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};
use tracing::debug;

use crate::config::WhiteningConfig;
use crate::error::DecompResult;
use crate::processing::extension::{demean, extend};
use crate::processing::whitening::{Whitener, Whitening};

/// Extended observation of a grid with its whitening transform
#[derive(Debug, Clone)]
pub struct GridObservation {
    /// Demeaned, extended channels (`C·R × N+R−1`)
    pub extended: Array2<f64>,
    pub whitening: Whitening,
    pub extension_factor: usize,
    /// Samples in the original recording
    pub sample_count: usize,
}

impl GridObservation {
    /// Demean, extend and whiten the non-rejected channels of a grid
    pub fn prepare(
        channels: ArrayView2<f64>,
        extension_factor: usize,
        config: &WhiteningConfig,
    ) -> DecompResult<Self> {
        let centered = demean(channels);
        let extended = extend(centered.view(), extension_factor)?;
        let whitening = Whitener::new(config).whiten(extended.view())?;
        debug!(
            channels = channels.nrows(),
            extension_factor,
            components = whitening.component_count(),
            "grid observation prepared"
        );

        Ok(Self {
            extended,
            whitening,
            extension_factor,
            sample_count: channels.ncols(),
        })
    }

    /// Number of whitened components
    pub fn dimension(&self) -> usize {
        self.whitening.component_count()
    }

    pub fn whitened(&self) -> ArrayView2<f64> {
        self.whitening.whitened.view()
    }

    /// Activation `wᵗ·Z` restricted to the recording's samples
    pub fn activation(&self, weights: ArrayView1<f64>) -> Array1<f64> {
        weights
            .dot(&self.whitening.whitened)
            .slice(s![..self.sample_count])
            .to_owned()
    }

    /// Sum of whitened columns at the given samples (matched filter)
    pub fn triggered_sum(&self, samples: &[usize]) -> Array1<f64> {
        let whitened = &self.whitening.whitened;
        let mut filter = Array1::zeros(whitened.nrows());
        for &t in samples.iter().filter(|&&t| t < whitened.ncols()) {
            filter += &whitened.column(t);
        }
        filter
    }

    /// Separation weights mapped back to the extended channel space, `Wᵗ·w`
    pub fn extended_filter(&self, weights: ArrayView1<f64>) -> Array1<f64> {
        self.whitening.whitening.t().dot(&weights)
    }

    /// Activation of an extended-space filter over this observation's samples
    pub fn project_extended(&self, filter: ArrayView1<f64>) -> Array1<f64> {
        filter
            .dot(&self.extended)
            .slice(s![..self.sample_count])
            .to_owned()
    }

    /// Recompute the whitened signal after `extended` was modified in place
    pub fn reproject(&mut self) {
        self.whitening.whitened = self.whitening.whitening.dot(&self.extended);
    }
}

// src/processing/whitening.rs
//! Spatial whitening of an extended observation

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, ArrayView2};
use tracing::debug;

use crate::config::WhiteningConfig;
use crate::error::{DecompError, DecompResult};

/// Whitened signal together with its transform pair
#[derive(Debug, Clone)]
pub struct Whitening {
    /// `W·X`, one row per retained component
    pub whitened: Array2<f64>,
    /// `W = D^(-1/2)·Eᵗ`
    pub whitening: Array2<f64>,
    /// `E·D^(1/2)`
    pub dewhitening: Array2<f64>,
    /// Retained eigenvalues, descending
    pub eigenvalues: Array1<f64>,
}

impl Whitening {
    pub fn component_count(&self) -> usize {
        self.eigenvalues.len()
    }

    /// Map whitened data back into the extended observation space
    pub fn dewhiten(&self, whitened: ArrayView2<f64>) -> Array2<f64> {
        self.dewhitening.dot(&whitened)
    }
}

/// Computes whitening transforms from second-order statistics
#[derive(Debug, Clone)]
pub struct Whitener {
    relative_threshold: f64,
}

impl Whitener {
    pub fn new(config: &WhiteningConfig) -> Self {
        Self {
            relative_threshold: config.relative_eigen_threshold,
        }
    }

    /// Whiten `x` (rows = extended channels, columns = samples)
    pub fn whiten(&self, x: ArrayView2<f64>) -> DecompResult<Whitening> {
        let (rows, cols) = x.dim();
        if rows == 0 || cols == 0 {
            return Err(DecompError::invalid_shape(
                "extended observation",
                format!("{} rows x {} columns", rows, cols),
            ));
        }

        let cov = covariance(x);
        let eigen = SymmetricEigen::new(DMatrix::from_fn(rows, rows, |i, j| cov[[i, j]]));

        let largest = eigen.eigenvalues.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let threshold = (largest * self.relative_threshold).max(f64::MIN_POSITIVE);

        // Retained components in descending eigenvalue order
        let mut retained: Vec<usize> = (0..rows)
            .filter(|&i| eigen.eigenvalues[i].is_finite() && eigen.eigenvalues[i] > threshold)
            .collect();
        retained.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

        if retained.is_empty() {
            return Err(DecompError::DegenerateCovariance { retained: 0, total: rows });
        }

        let k = retained.len();
        let mut whitening = Array2::zeros((k, rows));
        let mut dewhitening = Array2::zeros((rows, k));
        let mut eigenvalues = Array1::zeros(k);
        for (component, &index) in retained.iter().enumerate() {
            let lambda = eigen.eigenvalues[index];
            let (inv_sqrt, sqrt) = (1.0 / lambda.sqrt(), lambda.sqrt());
            eigenvalues[component] = lambda;
            for channel in 0..rows {
                let e = eigen.eigenvectors[(channel, index)];
                whitening[[component, channel]] = inv_sqrt * e;
                dewhitening[[channel, component]] = sqrt * e;
            }
        }

        debug!(rows, retained = k, largest, "whitening transform computed");

        let whitened = whitening.dot(&x);
        Ok(Whitening {
            whitened,
            whitening,
            dewhitening,
            eigenvalues,
        })
    }
}

/// Second-moment matrix `X·Xᵗ / N_cols`
pub fn covariance(x: ArrayView2<f64>) -> Array2<f64> {
    let cols = x.ncols().max(1) as f64;
    x.dot(&x.t()) / cols
}

// src/processing/separation.rs
//! Fixed-point source extraction with deflation and peel-off
//!
//! Each extraction starts from an initial weight vector and runs the
//! fixed-point update `w ← E[z·g(wᵗz)] − E[g′(wᵗz)]·w` in the whitened space,
//! deflating against previously accepted sources after every step.

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use tracing::{debug, trace};

use crate::config::constants::separation::MIN_DISCHARGES_FOR_REFINEMENT;
use crate::config::{Contrast, SeparationConfig};
use crate::error::{DecompError, DecompResult};
use crate::processing::observation::GridObservation;
use crate::processing::quality::cov_isi;
use crate::processing::spikes::{Classification, SpikeClassifier};

/// Relative norm below which a deflated vector is treated as zero
const DEFLATION_RESIDUAL: f64 = 1e-9;

/// Terminal state of one fixed-point run
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExtractionStatus {
    Converged,
    /// Iteration cap reached; the weights are the last iterate
    MaxIterExceeded { delta: f64 },
}

/// Weights produced by one fixed-point run
#[derive(Debug, Clone)]
pub struct SourceEstimate {
    pub weights: Array1<f64>,
    pub iterations: usize,
    pub status: ExtractionStatus,
}

impl SourceEstimate {
    pub fn converged(&self) -> bool {
        self.status == ExtractionStatus::Converged
    }

    /// Non-fatal error describing a run that hit the iteration cap
    pub fn warning(&self) -> Option<DecompError> {
        match self.status {
            ExtractionStatus::Converged => None,
            ExtractionStatus::MaxIterExceeded { delta } => Some(DecompError::MaxIterExceeded {
                iterations: self.iterations,
                delta,
            }),
        }
    }
}

impl Contrast {
    /// `g(a)` element-wise and the mean of `g′(a)`
    pub fn evaluate(&self, a: ArrayView1<f64>) -> (Array1<f64>, f64) {
        let (g, g_prime) = match self {
            Contrast::Skew => (a.mapv(|x| x * x), a.mapv(|x| 2.0 * x)),
            Contrast::Kurtosis => (a.mapv(|x| x * x * x), a.mapv(|x| 3.0 * x * x)),
            Contrast::LogCosh => {
                let t = a.mapv(f64::tanh);
                let d = t.mapv(|v| 1.0 - v * v);
                (t, d)
            }
        };
        (g, g_prime.mean().unwrap_or(0.0))
    }
}

/// Deflation-based fixed-point separator for one grid
#[derive(Debug, Clone)]
pub struct Separator {
    config: SeparationConfig,
    /// Orthonormal weights of the sources accepted so far
    basis: Vec<Array1<f64>>,
}

impl Separator {
    pub fn new(config: &SeparationConfig) -> Self {
        Self {
            config: config.clone(),
            basis: Vec::new(),
        }
    }

    pub fn basis(&self) -> &[Array1<f64>] {
        &self.basis
    }

    /// Run the fixed-point iteration from `initial`
    ///
    /// Fails with `DegenerateCovariance` when deflation leaves no room for a
    /// new source.
    pub fn extract(&self, whitened: ArrayView2<f64>, initial: Array1<f64>) -> DecompResult<SourceEstimate> {
        let dimension = whitened.nrows();
        if initial.len() != dimension || whitened.ncols() == 0 {
            return Err(DecompError::invalid_shape(
                "separation weights",
                format!(
                    "{} weights for a {} x {} whitened signal",
                    initial.len(),
                    dimension,
                    whitened.ncols()
                ),
            ));
        }

        let exhausted = || DecompError::DegenerateCovariance {
            retained: self.basis.len(),
            total: dimension,
        };
        let samples = whitened.ncols() as f64;
        let mut w = self.deflated_unit(initial).ok_or_else(exhausted)?;
        let mut delta = f64::INFINITY;

        for iteration in 1..=self.config.max_fixed_point_iterations {
            let activation = w.dot(&whitened);
            let (g, g_prime_mean) = self.config.contrast.evaluate(activation.view());
            let update = whitened.dot(&g) / samples - &w * g_prime_mean;
            let next = self.deflated_unit(update).ok_or_else(exhausted)?;

            delta = distance(&next, &w).min(distance(&next, &-&w));
            w = next;
            trace!(iteration, delta, "fixed-point step");

            if delta < self.config.tolerance {
                return Ok(SourceEstimate {
                    weights: w,
                    iterations: iteration,
                    status: ExtractionStatus::Converged,
                });
            }
        }

        Ok(SourceEstimate {
            weights: w,
            iterations: self.config.max_fixed_point_iterations,
            status: ExtractionStatus::MaxIterExceeded { delta },
        })
    }

    /// Add a source to the deflation basis; `false` if it lies in the existing span
    pub fn accept(&mut self, weights: &Array1<f64>) -> bool {
        match self.deflated_unit(weights.clone()) {
            Some(w) => {
                self.basis.push(w);
                true
            }
            None => false,
        }
    }

    /// Gram-Schmidt projection onto the complement of the accepted sources, renormalised
    ///
    /// `None` when almost nothing of `w` is left outside the accepted span.
    fn deflated_unit(&self, mut w: Array1<f64>) -> Option<Array1<f64>> {
        let original = w.dot(&w).sqrt();
        for b in &self.basis {
            let projection = b.dot(&w);
            w.scaled_add(-projection, b);
        }
        if w.dot(&w).sqrt() <= original * DEFLATION_RESIDUAL {
            return None;
        }
        normalize(w)
    }
}

/// Unit-norm copy of `w`, `None` for a (numerically) zero vector
pub fn normalize(w: Array1<f64>) -> Option<Array1<f64>> {
    let norm = w.dot(&w).sqrt();
    if norm.is_finite() && norm > f64::EPSILON {
        Some(w / norm)
    } else {
        None
    }
}

fn distance(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    let diff = a - b;
    diff.dot(&diff).sqrt()
}

/// Random unit vector of the given dimension
pub fn random_weights<R: Rng>(dimension: usize, rng: &mut R) -> Array1<f64> {
    let candidate = Array1::from_shape_fn(dimension, |_| rng.gen_range(-1.0..1.0));
    normalize(candidate).unwrap_or_else(|| {
        let mut fallback = Array1::zeros(dimension);
        if dimension > 0 {
            fallback[0] = 1.0;
        }
        fallback
    })
}

/// Discharge-time triggered average of the whitened signal, normalised
pub fn triggered_weights(observation: &GridObservation, discharge_times: &[usize]) -> Option<Array1<f64>> {
    normalize(observation.triggered_sum(discharge_times))
}

/// Per-sample energy of the whitened signal, consumed highest first to seed extractions
#[derive(Debug, Clone)]
pub struct ActivityIndex {
    values: Array1<f64>,
}

impl ActivityIndex {
    pub fn new(whitened: ArrayView2<f64>) -> Self {
        Self {
            values: whitened.mapv(|v| v * v).sum_axis(Axis(0)),
        }
    }

    /// Whitened column at the most active unused sample
    pub fn next_seed(&mut self, whitened: ArrayView2<f64>) -> Option<Array1<f64>> {
        let (index, &peak) = self
            .values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .max_by(|a, b| a.1.total_cmp(b.1))?;
        if peak <= 0.0 || index >= whitened.ncols() {
            return None;
        }
        self.values[index] = 0.0;
        normalize(whitened.column(index).to_owned())
    }
}

/// Source after CoV-ISI refinement
#[derive(Debug, Clone)]
pub struct RefinedSource {
    pub weights: Array1<f64>,
    pub classification: Classification,
    pub cov_isi: Option<f64>,
}

/// Re-estimate the weights from their own discharges while the ISI variability drops
///
/// The lowest-CoV iterate is kept. Sources with too few discharges are
/// returned as classified.
pub fn refine_by_cov_isi(
    observation: &GridObservation,
    classifier: &SpikeClassifier,
    weights: Array1<f64>,
    max_iterations: usize,
) -> RefinedSource {
    let classification = classifier.classify(observation.activation(weights.view()).view());
    let mut best = RefinedSource {
        cov_isi: cov_isi(&classification.discharge_times),
        weights,
        classification,
    };

    for iteration in 0..max_iterations {
        let Some(best_cov) = best.cov_isi else { break };
        if best.classification.discharge_times.len() < MIN_DISCHARGES_FOR_REFINEMENT {
            break;
        }
        let Some(weights) = triggered_weights(observation, &best.classification.discharge_times) else {
            break;
        };
        let classification = classifier.classify(observation.activation(weights.view()).view());
        let candidate_cov = cov_isi(&classification.discharge_times);

        match candidate_cov {
            Some(cov) if cov < best_cov => {
                trace!(iteration, cov, "CoV-ISI improved");
                best = RefinedSource {
                    weights,
                    classification,
                    cov_isi: Some(cov),
                };
            }
            _ => break,
        }
    }

    best
}

/// Subtract the spike-triggered average waveform of a source from the extended signal
///
/// The template spans `±half_window` samples around each discharge; only
/// discharges with a full window contribute to it, every discharge has it
/// removed (clipped at the edges). Returns `false` when no template could be
/// formed.
pub fn peel_off(observation: &mut GridObservation, discharge_times: &[usize], half_window: usize) -> bool {
    let columns = observation.extended.ncols();
    let width = 2 * half_window + 1;

    let full: Vec<usize> = discharge_times
        .iter()
        .copied()
        .filter(|&t| t >= half_window && t + half_window < columns)
        .collect();
    if full.is_empty() {
        return false;
    }

    let mut template = Array2::<f64>::zeros((observation.extended.nrows(), width));
    for &t in &full {
        template += &observation.extended.slice(s![.., t - half_window..t + half_window + 1]);
    }
    template /= full.len() as f64;

    for &t in discharge_times.iter().filter(|&&t| t < columns) {
        let start = t.saturating_sub(half_window);
        let end = (t + half_window + 1).min(columns);
        let offset = start + half_window - t;
        let mut target = observation.extended.slice_mut(s![.., start..end]);
        target -= &template.slice(s![.., offset..offset + (end - start)]);
    }

    observation.reproject();
    debug!(discharges = discharge_times.len(), half_window, "peeled off source");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SpikeConfig, WhiteningConfig};
    use ndarray::{array, Array2};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Sparse positive source mixed with uniform noise on two channels
    fn mixed_sources() -> (Array2<f64>, Array1<f64>) {
        let mut rng = StdRng::seed_from_u64(5);
        let n = 4000;
        let sparse = Array1::from_shape_fn(n, |i| if i % 50 == 25 { 1.0 } else { 0.0 });
        let noise = Array1::from_shape_fn(n, |_| rng.gen_range(-1.0..1.0));

        let mut channels = Array2::zeros((2, n));
        channels.row_mut(0).assign(&(&sparse + &(&noise * 0.5)));
        channels.row_mut(1).assign(&(&sparse * 0.3 + &noise));
        (channels, sparse)
    }

    fn correlation(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        let (ma, mb) = (a.mean().unwrap_or(0.0), b.mean().unwrap_or(0.0));
        let ca = a.mapv(|v| v - ma);
        let cb = b.mapv(|v| v - mb);
        ca.dot(&cb) / (ca.dot(&ca).sqrt() * cb.dot(&cb).sqrt())
    }

    #[test]
    fn test_contrast_derivatives() {
        let a = array![-1.0, 0.0, 2.0];
        let (g, d) = Contrast::Skew.evaluate(a.view());
        assert_eq!(g, array![1.0, 0.0, 4.0]);
        assert!((d - 2.0 / 3.0).abs() < 1e-12);

        let (g, d) = Contrast::Kurtosis.evaluate(a.view());
        assert_eq!(g, array![-1.0, 0.0, 8.0]);
        assert!((d - 5.0).abs() < 1e-12);

        let (g, _) = Contrast::LogCosh.evaluate(a.view());
        assert!((g[2] - 2.0f64.tanh()).abs() < 1e-12);
    }

    #[test]
    fn test_extracts_sparse_source() {
        let (channels, sparse) = mixed_sources();
        let observation = GridObservation::prepare(channels.view(), 1, &WhiteningConfig::default()).unwrap();
        let separator = Separator::new(&SeparationConfig::default());

        let mut rng = StdRng::seed_from_u64(1);
        let initial = random_weights(observation.dimension(), &mut rng);
        let estimate = separator.extract(observation.whitened(), initial).unwrap();

        let activation = observation.activation(estimate.weights.view());
        assert!(correlation(activation.view(), sparse.view()).abs() > 0.9);
    }

    #[test]
    fn test_deflation_keeps_sources_orthogonal() {
        let (channels, _) = mixed_sources();
        let observation = GridObservation::prepare(channels.view(), 1, &WhiteningConfig::default()).unwrap();
        let mut separator = Separator::new(&SeparationConfig::default());
        let mut rng = StdRng::seed_from_u64(2);

        let first = separator
            .extract(observation.whitened(), random_weights(2, &mut rng))
            .unwrap();
        assert!(separator.accept(&first.weights));

        let second = separator
            .extract(observation.whitened(), random_weights(2, &mut rng))
            .unwrap();
        assert!(first.weights.dot(&second.weights).abs() < 1e-8);
        assert!(separator.accept(&second.weights));

        // Two-dimensional space is exhausted
        let third = separator.extract(observation.whitened(), random_weights(2, &mut rng));
        assert!(matches!(third, Err(DecompError::DegenerateCovariance { retained: 2, total: 2 })));
    }

    #[test]
    fn test_wrong_dimension_is_rejected() {
        let whitened = Array2::<f64>::ones((3, 10));
        let separator = Separator::new(&SeparationConfig::default());
        let result = separator.extract(whitened.view(), Array1::ones(2));
        assert!(matches!(result, Err(DecompError::InvalidShape { .. })));
    }

    #[test]
    fn test_iteration_cap_is_reported() {
        let (channels, _) = mixed_sources();
        let observation = GridObservation::prepare(channels.view(), 1, &WhiteningConfig::default()).unwrap();
        let config = SeparationConfig {
            max_fixed_point_iterations: 1,
            tolerance: 0.0,
            ..SeparationConfig::default()
        };
        let estimate = Separator::new(&config)
            .extract(observation.whitened(), array![1.0, 0.0])
            .unwrap();
        assert!(!estimate.converged());
        assert!(matches!(estimate.warning(), Some(DecompError::MaxIterExceeded { iterations: 1, .. })));
    }

    #[test]
    fn test_activity_index_seeds_highest_energy_first() {
        let whitened = array![[0.0, 3.0, 1.0, 0.0], [0.0, 4.0, 0.0, 0.0]];
        let mut index = ActivityIndex::new(whitened.view());

        assert_eq!(index.next_seed(whitened.view()).unwrap(), array![0.6, 0.8]);
        assert_eq!(index.next_seed(whitened.view()).unwrap(), array![1.0, 0.0]);
        assert!(index.next_seed(whitened.view()).is_none());
    }

    #[test]
    fn test_peel_off_removes_repeated_waveform() {
        let mut channel = Array2::zeros((1, 300));
        for &t in &[50usize, 150, 250] {
            channel[[0, t - 1]] = 1.0;
            channel[[0, t]] = 2.0;
            channel[[0, t + 1]] = 1.0;
        }
        let mut observation = GridObservation::prepare(channel.view(), 1, &WhiteningConfig::default()).unwrap();

        assert!(peel_off(&mut observation, &[50, 150, 250], 2));
        for &t in &[48usize, 50, 51, 152, 250] {
            assert!(observation.extended[[0, t]].abs() < 1e-12);
        }
        let reprojected = observation.whitening.whitening.dot(&observation.extended);
        assert_eq!(observation.whitened(), reprojected.view());
    }

    #[test]
    fn test_cov_isi_refinement_keeps_regular_train() {
        let (channels, _) = mixed_sources();
        let observation = GridObservation::prepare(channels.view(), 1, &WhiteningConfig::default()).unwrap();
        let classifier = SpikeClassifier::new(&SpikeConfig::default(), 2000.0);
        let separator = Separator::new(&SeparationConfig::default());
        let mut rng = StdRng::seed_from_u64(1);
        let estimate = separator
            .extract(observation.whitened(), random_weights(2, &mut rng))
            .unwrap();

        let refined = refine_by_cov_isi(&observation, &classifier, estimate.weights, 10);
        assert!(refined.classification.discharge_times.len() >= MIN_DISCHARGES_FOR_REFINEMENT);
        assert!(refined.cov_isi.unwrap_or(1.0) < 0.1);
    }
}

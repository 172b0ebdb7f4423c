// src/processing/quality.rs
//! Separation quality of a motor unit
//!
//! The silhouette index (SIL) compares how tightly the discharge peaks of a
//! pulse train cluster around their own centroid against their distance to
//! the noise peaks. A continuous SIL scores short windows of the signal so
//! that poorly separated stretches can be located.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::config::constants::quality::MIN_DISCHARGES_FOR_SIL;
use crate::config::{seconds_to_samples, QualityConfig, SpikeConfig};
use crate::model::MotorUnit;
use crate::processing::spikes::{find_peaks, split_two_clusters};
use crate::utils::stats::{coefficient_of_variation, mean};

/// Global and windowed quality of one pulse train
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub sil: f64,
    pub continuous: Vec<(usize, f64)>,
}

impl QualityScore {
    pub fn empty() -> Self {
        Self {
            sil: 0.0,
            continuous: Vec::new(),
        }
    }
}

/// Scores pulse trains against their discharge times
#[derive(Debug, Clone)]
pub struct QualityScorer {
    min_discharges: usize,
    window: usize,
    step: usize,
    refractory: usize,
}

impl QualityScorer {
    /// Scores stay zero below 3 discharges whatever `quality.min_discharges` says
    pub fn new(quality: &QualityConfig, spikes: &SpikeConfig, sampling_rate: f64) -> Self {
        Self {
            min_discharges: quality.min_discharges.max(MIN_DISCHARGES_FOR_SIL),
            window: seconds_to_samples(quality.continuous_window_s, sampling_rate),
            step: seconds_to_samples(quality.continuous_step_s, sampling_rate),
            refractory: seconds_to_samples(spikes.refractory_s, sampling_rate),
        }
    }

    /// SIL and continuous SIL; zero scores below the minimum discharge count
    pub fn score(&self, pulse_train: ArrayView1<f64>, discharge_times: &[usize]) -> QualityScore {
        if discharge_times.len() < self.min_discharges {
            return QualityScore::empty();
        }
        QualityScore {
            sil: self.silhouette(pulse_train),
            continuous: self.continuous_sil(pulse_train, discharge_times),
        }
    }

    /// Recompute and store the scores of a unit
    pub fn rescore(&self, unit: &mut MotorUnit) {
        let score = self.score(unit.pulse_train.view(), &unit.discharge_times);
        unit.sil = score.sil;
        unit.continuous_sil = score.continuous;
    }

    /// Global SIL from a two-cluster split of the pulse-train peaks
    pub fn silhouette(&self, pulse_train: ArrayView1<f64>) -> f64 {
        let peaks = find_peaks(pulse_train, self.refractory);
        if peaks.len() < self.min_discharges {
            return 0.0;
        }
        let amplitudes: Vec<f64> = peaks.iter().map(|&p| pulse_train[p]).collect();
        let split = split_two_clusters(&amplitudes);
        let high: Vec<f64> = amplitudes
            .iter()
            .zip(&split.is_high)
            .filter_map(|(&a, &h)| h.then_some(a))
            .collect();
        silhouette_index(&high, split.low_centroid)
    }

    /// Windowed SIL with the unit's discharges as the signal cluster
    ///
    /// Returns `(window-centre sample, SIL)` pairs.
    pub fn continuous_sil(&self, pulse_train: ArrayView1<f64>, discharge_times: &[usize]) -> Vec<(usize, f64)> {
        let len = pulse_train.len();
        if len == 0 {
            return Vec::new();
        }
        let peaks = find_peaks(pulse_train, self.refractory);

        window_starts(len, self.window, self.step)
            .into_iter()
            .map(|start| {
                let end = (start + self.window).min(len);
                let centre = start + (end - start) / 2;
                let in_window = |t: &&usize| (start..end).contains(*t);

                let high: Vec<f64> = discharge_times.iter().filter(in_window).map(|&t| pulse_train[t]).collect();
                if high.len() < self.min_discharges {
                    return (centre, 0.0);
                }
                let noise: Vec<f64> = peaks
                    .iter()
                    .filter(in_window)
                    .filter(|t| discharge_times.binary_search(*t).is_err())
                    .map(|&t| pulse_train[t])
                    .collect();
                (centre, silhouette_index(&high, mean(&noise)))
            })
            .collect()
    }
}

fn window_starts(len: usize, window: usize, step: usize) -> Vec<usize> {
    if window >= len {
        return vec![0];
    }
    (0..=len - window).step_by(step.max(1)).collect()
}

/// `(inter − intra) / max(inter, intra)` clamped to `[0, 1]`
///
/// `intra` is the mean squared distance of the signal cluster to its own
/// centroid, `inter` its mean squared distance to the noise centroid (zero
/// without a noise cluster).
pub fn silhouette_index(signal: &[f64], noise_centroid: Option<f64>) -> f64 {
    let Some(centroid) = mean(signal) else {
        return 0.0;
    };
    let intra = signal.iter().map(|&v| (v - centroid).powi(2)).sum::<f64>() / signal.len() as f64;
    let inter = noise_centroid
        .map(|n| signal.iter().map(|&v| (v - n).powi(2)).sum::<f64>() / signal.len() as f64)
        .unwrap_or(0.0);

    let denominator = inter.max(intra);
    if !(denominator > 0.0) || !denominator.is_finite() {
        return 0.0;
    }
    let sil = (inter - intra) / denominator;
    if sil.is_finite() {
        sil.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Coefficient of variation of the inter-spike intervals
pub fn cov_isi(discharge_times: &[usize]) -> Option<f64> {
    if discharge_times.len() < 3 {
        return None;
    }
    let intervals: Vec<f64> = discharge_times.windows(2).map(|w| (w[1] - w[0]) as f64).collect();
    coefficient_of_variation(&intervals)
}

/// Mean discharge rate in Hz over the span of the discharges
pub fn mean_discharge_rate(discharge_times: &[usize], sampling_rate: f64) -> f64 {
    match (discharge_times.first(), discharge_times.last()) {
        (Some(&first), Some(&last)) if last > first => {
            (discharge_times.len() - 1) as f64 * sampling_rate / (last - first) as f64
        }
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    fn scorer() -> QualityScorer {
        QualityScorer::new(&QualityConfig::default(), &SpikeConfig::default(), 2000.0)
    }

    /// 10 s at 2 kHz, unit discharges at 1.0 every 200 samples, noise peaks at 0.1
    fn clean_unit() -> (Array1<f64>, Vec<usize>) {
        let mut pulse = Array1::zeros(20_000);
        let discharges: Vec<usize> = (1..100).map(|i| i * 200).collect();
        for &t in &discharges {
            pulse[t] = 1.0;
        }
        for t in (1..100).map(|i| i * 200 + 100) {
            pulse[t] = 0.1;
        }
        (pulse, discharges)
    }

    #[test]
    fn test_two_discharges_score_zero_with_lowered_minimum() {
        let quality = QualityConfig {
            min_discharges: 2,
            ..QualityConfig::default()
        };
        let scorer = QualityScorer::new(&quality, &SpikeConfig::default(), 2000.0);
        let mut pulse = Array1::zeros(1000);
        pulse[100] = 1.0;
        pulse[300] = 1.0;
        pulse[500] = 0.1;

        let score = scorer.score(pulse.view(), &[100, 300]);
        assert_eq!(score.sil, 0.0);
        assert!(score.continuous.is_empty());
    }

    #[test]
    fn test_clean_unit_scores_high() {
        let (pulse, discharges) = clean_unit();
        let score = scorer().score(pulse.view(), &discharges);
        assert!((score.sil - 1.0).abs() < 1e-12);
        assert!(!score.continuous.is_empty());
        assert!(score.continuous.iter().all(|&(_, s)| (0.0..=1.0).contains(&s)));
    }

    #[test]
    fn test_too_few_discharges() {
        let (pulse, _) = clean_unit();
        let score = scorer().score(pulse.view(), &[200, 400]);
        assert_eq!(score, QualityScore::empty());
    }

    #[test]
    fn test_continuous_windows() {
        let (pulse, discharges) = clean_unit();
        let continuous = scorer().continuous_sil(pulse.view(), &discharges);
        // 0.5 s windows, 0.25 s step over 10 s
        assert_eq!(continuous.len(), 39);
        assert_eq!(continuous[0].0, 500);
        assert_eq!(continuous[1].0, 1000);
    }

    #[test]
    fn test_sparse_window_scores_zero() {
        let (pulse, _) = clean_unit();
        let continuous = scorer().continuous_sil(pulse.view(), &[200, 400, 600, 10_000]);
        assert!(continuous[0].1 > 0.9);
        assert!(continuous.last().map(|&(_, s)| s == 0.0).unwrap_or(false));
    }

    #[test]
    fn test_silhouette_index_bounds() {
        assert_eq!(silhouette_index(&[], Some(0.0)), 0.0);
        assert_eq!(silhouette_index(&[1.0, 1.0], None), 0.0);
        // Noise centroid inside the signal cluster
        assert_eq!(silhouette_index(&[0.0, 2.0], Some(1.0)), 0.0);
        let sil = silhouette_index(&[0.9, 1.0, 1.1], Some(0.1));
        assert!(sil > 0.9 && sil < 1.0);
    }

    #[test]
    fn test_cov_isi_and_rate() {
        assert_eq!(cov_isi(&[0, 100, 200, 300]), Some(0.0));
        assert_eq!(cov_isi(&[0, 100]), None);
        assert!(cov_isi(&[0, 100, 300]).unwrap() > 0.3);

        assert_eq!(mean_discharge_rate(&[0, 200, 400], 2000.0), 10.0);
        assert_eq!(mean_discharge_rate(&[5], 2000.0), 0.0);
    }
}

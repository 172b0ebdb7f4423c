// src/processing/spikes.rs
//! Spike detection and discharge classification
//!
//! A source's activation trace is sharpened, its local maxima are split into
//! a discharge cluster and a noise cluster, the trace is normalised by its
//! largest discharges and amplitude outliers are dropped. Cluster assignment
//! is a deterministic one-dimensional two-means split, so classification is
//! reproducible run to run.

use ndarray::{Array1, ArrayView1};

use crate::config::constants::spikes::MAX_CLUSTER_ITERATIONS;
use crate::config::{seconds_to_samples, SpikeConfig};
use crate::utils::stats::{coefficient_of_variation, mean, mean_of_top, std_dev};

/// Result of classifying one activation trace
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Sharpened and normalised trace
    pub pulse_train: Array1<f64>,
    pub discharge_times: Vec<usize>,
    /// Local maxima assigned to the noise cluster
    pub noise_peaks: Vec<usize>,
}

/// Two-cluster split of peak amplitudes
#[derive(Debug, Clone, PartialEq)]
pub struct TwoClusterSplit {
    pub threshold: f64,
    pub high_centroid: f64,
    /// `None` when every value landed in the high cluster
    pub low_centroid: Option<f64>,
    /// `true` for members of the high cluster, in input order
    pub is_high: Vec<bool>,
}

/// Classifies activation traces into discharges
#[derive(Debug, Clone)]
pub struct SpikeClassifier {
    config: SpikeConfig,
    sampling_rate: f64,
}

impl SpikeClassifier {
    pub fn new(config: &SpikeConfig, sampling_rate: f64) -> Self {
        Self {
            config: config.clone(),
            sampling_rate,
        }
    }

    /// Minimum distance between two peaks, in samples
    pub fn refractory_samples(&self) -> usize {
        seconds_to_samples(self.config.refractory_s, self.sampling_rate)
    }

    /// Run the full classification on a raw activation trace
    pub fn classify(&self, activation: ArrayView1<f64>) -> Classification {
        // Stage 1: sharpen peaks
        let mut pulse_train = sharpen(activation);

        // Stage 2: local maxima with refractory separation
        let peaks = find_peaks(pulse_train.view(), self.refractory_samples());
        if peaks.is_empty() {
            return Classification {
                pulse_train,
                discharge_times: Vec::new(),
                noise_peaks: Vec::new(),
            };
        }

        // Stage 3: split peak amplitudes
        let amplitudes: Vec<f64> = peaks.iter().map(|&p| pulse_train[p]).collect();
        let split = split_two_clusters(&amplitudes);
        let mut discharge_times = Vec::new();
        let mut noise_peaks = Vec::new();
        for (&peak, &high) in peaks.iter().zip(split.is_high.iter()) {
            if high {
                discharge_times.push(peak);
            } else {
                noise_peaks.push(peak);
            }
        }

        // Stage 4: normalise by the largest discharges
        normalize_by_discharges(&mut pulse_train, &discharge_times, self.config.normalization_top_n);

        // Stage 5: drop amplitude outliers
        discharge_times = reject_amplitude_outliers(pulse_train.view(), &discharge_times, self.config.outlier_sigma);

        Classification {
            pulse_train,
            discharge_times,
            noise_peaks,
        }
    }

    /// Sharpen and normalise a trace against a fixed discharge set
    ///
    /// Used when discharge times are locked and only the pulse-train shape may change.
    pub fn reshape(&self, activation: ArrayView1<f64>, discharge_times: &[usize]) -> Array1<f64> {
        let mut pulse_train = sharpen(activation);
        normalize_by_discharges(&mut pulse_train, discharge_times, self.config.normalization_top_n);
        pulse_train
    }
}

/// Square the trace while keeping its sign
pub fn sharpen(trace: ArrayView1<f64>) -> Array1<f64> {
    trace.mapv(|x| x * x.abs())
}

/// Local maxima separated by at least `min_distance` samples
///
/// Flat peaks resolve to their middle sample. When two maxima are closer than
/// `min_distance` the higher one wins (ties go to the earlier sample).
pub fn find_peaks(trace: ArrayView1<f64>, min_distance: usize) -> Vec<usize> {
    let n = trace.len();
    let mut peaks = Vec::new();
    if n < 3 {
        return peaks;
    }

    let mut i = 1;
    while i < n - 1 {
        if trace[i - 1] < trace[i] {
            let mut ahead = i + 1;
            while ahead < n - 1 && trace[ahead] == trace[i] {
                ahead += 1;
            }
            if trace[ahead] < trace[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
                continue;
            }
        }
        i += 1;
    }

    if min_distance <= 1 || peaks.len() < 2 {
        return peaks;
    }

    let mut priority: Vec<usize> = (0..peaks.len()).collect();
    priority.sort_by(|&a, &b| trace[peaks[b]].total_cmp(&trace[peaks[a]]).then(a.cmp(&b)));

    let mut keep = vec![true; peaks.len()];
    for &index in &priority {
        if !keep[index] {
            continue;
        }
        let peak = peaks[index];
        let mut left = index;
        while left > 0 && peak - peaks[left - 1] < min_distance {
            left -= 1;
            keep[left] = false;
        }
        let mut right = index + 1;
        while right < peaks.len() && peaks[right] - peak < min_distance {
            keep[right] = false;
            right += 1;
        }
    }

    peaks
        .into_iter()
        .zip(keep)
        .filter_map(|(peak, kept)| kept.then_some(peak))
        .collect()
}

/// Deterministic one-dimensional two-means split
///
/// The threshold starts at the midpoint of the value range and moves to the
/// midpoint of the two cluster means until assignments stop changing. When all
/// values are equal every value is in the high cluster.
pub fn split_two_clusters(values: &[f64]) -> TwoClusterSplit {
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    if values.is_empty() || !(max - min > f64::EPSILON * max.abs().max(1.0)) {
        return TwoClusterSplit {
            threshold: min,
            high_centroid: mean(values).unwrap_or(0.0),
            low_centroid: None,
            is_high: vec![true; values.len()],
        };
    }

    let mut threshold = 0.5 * (min + max);
    let mut is_high: Vec<bool> = values.iter().map(|&v| v > threshold).collect();
    let (mut high_centroid, mut low_centroid) = cluster_means(values, &is_high);

    for _ in 0..MAX_CLUSTER_ITERATIONS {
        threshold = 0.5 * (high_centroid + low_centroid);
        let next: Vec<bool> = values.iter().map(|&v| v > threshold).collect();
        if next == is_high {
            break;
        }
        is_high = next;
        (high_centroid, low_centroid) = cluster_means(values, &is_high);
    }

    TwoClusterSplit {
        threshold,
        high_centroid,
        low_centroid: Some(low_centroid),
        is_high,
    }
}

fn cluster_means(values: &[f64], is_high: &[bool]) -> (f64, f64) {
    let (mut high_sum, mut high_count, mut low_sum, mut low_count) = (0.0, 0usize, 0.0, 0usize);
    for (&v, &high) in values.iter().zip(is_high) {
        if high {
            high_sum += v;
            high_count += 1;
        } else {
            low_sum += v;
            low_count += 1;
        }
    }
    // Both clusters are non-empty: the maximum is always above and the minimum always below the threshold
    (high_sum / high_count.max(1) as f64, low_sum / low_count.max(1) as f64)
}

/// Divide the trace by the mean of its `top_n` largest discharge amplitudes
pub fn normalize_by_discharges(pulse_train: &mut Array1<f64>, discharge_times: &[usize], top_n: usize) {
    let amplitudes: Vec<f64> = discharge_times
        .iter()
        .filter(|&&t| t < pulse_train.len())
        .map(|&t| pulse_train[t])
        .collect();
    if let Some(scale) = mean_of_top(&amplitudes, top_n) {
        if scale > 0.0 && scale.is_finite() {
            pulse_train.mapv_inplace(|v| v / scale);
        }
    }
}

/// Drop discharges whose amplitude exceeds mean + `sigma`·std of the discharge cluster
pub fn reject_amplitude_outliers(pulse_train: ArrayView1<f64>, discharge_times: &[usize], sigma: f64) -> Vec<usize> {
    let amplitudes: Vec<f64> = discharge_times.iter().map(|&t| pulse_train[t]).collect();
    match (mean(&amplitudes), std_dev(&amplitudes)) {
        (Some(m), Some(s)) => {
            let limit = m + sigma * s;
            discharge_times
                .iter()
                .zip(amplitudes.iter())
                .filter(|(_, &a)| a <= limit)
                .map(|(&t, _)| t)
                .collect()
        }
        _ => discharge_times.to_vec(),
    }
}

/// Instantaneous discharge rates (Hz) between consecutive discharges
pub fn discharge_rates(discharge_times: &[usize], sampling_rate: f64) -> Vec<f64> {
    discharge_times
        .windows(2)
        .map(|pair| sampling_rate / (pair[1] - pair[0]) as f64)
        .collect()
}

/// Remove discharges that produce implausibly high instantaneous rates
///
/// While the coefficient of variation of the discharge rate exceeds
/// `cov_threshold`, every interval faster than mean + `sigma`·std loses the
/// lower-amplitude discharge of its pair.
pub fn remove_rate_outliers(
    pulse_train: ArrayView1<f64>,
    discharge_times: &[usize],
    sampling_rate: f64,
    cov_threshold: f64,
    sigma: f64,
    max_iterations: usize,
) -> Vec<usize> {
    let mut times = discharge_times.to_vec();

    for _ in 0..max_iterations {
        if times.len() < 3 {
            break;
        }
        let rates = discharge_rates(&times, sampling_rate);
        let (Some(cov), Some(m), Some(s)) = (coefficient_of_variation(&rates), mean(&rates), std_dev(&rates)) else {
            break;
        };
        if cov <= cov_threshold {
            break;
        }

        let limit = m + sigma * s;
        let mut remove = vec![false; times.len()];
        for (i, &rate) in rates.iter().enumerate() {
            if rate > limit {
                let weaker = if pulse_train[times[i]] < pulse_train[times[i + 1]] { i } else { i + 1 };
                remove[weaker] = true;
            }
        }
        if !remove.iter().any(|&r| r) {
            break;
        }

        times = times
            .into_iter()
            .zip(remove)
            .filter_map(|(t, r)| (!r).then_some(t))
            .collect();
    }

    times
}

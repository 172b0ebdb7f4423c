// src/processing/decomposition.rs
//! Full decomposition of a recording into motor units
//!
//! Each grid is demeaned, extended and whitened once. Sources are then
//! extracted one at a time, classified into discharges, scored, and the
//! accepted ones are peeled off the working signal before the next attempt.
//! Optional stages refine the accepted units against the whole signal and
//! remove units duplicated across grids.

use std::ops::Range;

use ndarray::s;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{seconds_to_samples, EngineConfig};
use crate::error::{DecompError, DecompResult};
use crate::model::{MotorUnit, Recording};
use crate::processing::duplicates::DuplicateResolver;
use crate::processing::extension::extension_factor;
use crate::processing::observation::GridObservation;
use crate::processing::quality::{cov_isi, QualityScorer};
use crate::processing::refinement::FilterRefiner;
use crate::processing::separation::{
    peel_off, random_weights, refine_by_cov_isi, ActivityIndex, RefinedSource, Separator,
};
use crate::processing::spikes::{remove_rate_outliers, SpikeClassifier};
use crate::utils::cancel::CancellationToken;
use crate::utils::progress::{ProgressEvent, ProgressReporter};
use crate::utils::validation::validate_sampling_rate;

/// Decomposition result handed to persistence and display collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionOutput {
    pub sampling_rate: f64,
    pub sample_count: usize,
    /// Motor units per grid, in extraction order
    pub grids: Vec<Vec<MotorUnit>>,
    /// Grids whose covariance was degenerate
    pub skipped_grids: Vec<usize>,
    pub cancelled: bool,
}

impl DecompositionOutput {
    pub fn unit_count(&self) -> usize {
        self.grids.iter().map(Vec::len).sum()
    }
}

/// Motor units extracted from one grid
#[derive(Debug, Clone)]
pub struct GridDecomposition {
    pub units: Vec<MotorUnit>,
    pub extension_factor: usize,
    /// Extraction attempts made before the loop ended
    pub attempts: usize,
    pub cancelled: bool,
}

/// Runs the decomposition pipeline with one engine configuration
#[derive(Debug, Clone)]
pub struct Decomposer {
    config: EngineConfig,
}

impl Decomposer {
    /// Create a decomposer, rejecting inconsistent configurations
    pub fn new(config: EngineConfig) -> DecompResult<Self> {
        config
            .validate_consistency()
            .map_err(|errors| DecompError::Configuration(errors.join("; ")))?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Extension factor used for one grid of a recording
    pub fn grid_extension_factor(&self, recording: &Recording, grid: usize) -> DecompResult<usize> {
        let layout = recording.grids.get(grid).ok_or(DecompError::GridNotFound(grid))?;
        Ok(extension_factor(
            layout.active_channels().len(),
            self.config.target_extended_channels(layout.signal_type),
            self.config.extension.max_factor,
        ))
    }

    /// Demeaned, extended and whitened observation of one grid
    pub fn prepare_grid(&self, recording: &Recording, grid: usize) -> DecompResult<GridObservation> {
        let channels = recording.grid_channels(grid)?;
        let factor = self.grid_extension_factor(recording, grid)?;
        GridObservation::prepare(channels.view(), factor, &self.config.whitening)
    }

    /// Decompose one grid
    ///
    /// With `separation.windows > 1` the recording is cut into equal segments
    /// that are whitened and separated independently; every accepted filter
    /// is then applied to the whole grid signal.
    pub fn decompose_grid(
        &self,
        recording: &Recording,
        grid: usize,
        cancel: &CancellationToken,
        progress: &mut dyn ProgressReporter,
    ) -> DecompResult<GridDecomposition> {
        let sampling_rate = recording.sampling_rate;
        let separation = &self.config.separation;
        let channels = recording.grid_channels(grid)?;
        let factor = self.grid_extension_factor(recording, grid)?;
        let full = GridObservation::prepare(channels.view(), factor, &self.config.whitening)?;
        let segments = segment_ranges(full.sample_count, separation.windows, factor)?;

        info!(
            grid,
            extension_factor = factor,
            components = full.dimension(),
            iterations = separation.iterations,
            windows = segments.len(),
            "decomposing grid"
        );

        let mut run = ExtractionRun {
            grid,
            rng: StdRng::seed_from_u64(separation.seed.wrapping_add(grid as u64)),
            total: separation.iterations * segments.len(),
            attempts: 0,
            units: Vec::new(),
            cancelled: false,
        };

        let full = if segments.len() == 1 {
            let mut working = full;
            self.extract_sources(&mut working, None, sampling_rate, &mut run, cancel, progress)?;
            if separation.refine_units && !run.units.is_empty() {
                // Peel-off changed the working signal
                Some(GridObservation::prepare(channels.view(), factor, &self.config.whitening)?)
            } else {
                None
            }
        } else {
            for (window, range) in segments.iter().enumerate() {
                if run.cancelled {
                    break;
                }
                let segment = channels.slice(s![.., range.clone()]);
                let mut working = match GridObservation::prepare(segment, factor, &self.config.whitening) {
                    Ok(working) => working,
                    Err(e @ DecompError::DegenerateCovariance { .. }) => {
                        warn!(grid, window, error = %e, "skipping decomposition window");
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                debug!(grid, window, start = range.start, end = range.end, "decomposing window");
                self.extract_sources(&mut working, Some(&full), sampling_rate, &mut run, cancel, progress)?;
            }
            Some(full)
        };

        if separation.refine_units && !run.cancelled {
            if let Some(observation) = &full {
                self.refine_units(observation, &mut run.units, sampling_rate);
            }
        }

        let resolver = DuplicateResolver::new(&self.config.duplicates, sampling_rate);
        let kept = resolver.resolve_within(&run.units);
        let extracted = run.units.len();
        let units = retain_positions(run.units, &kept);

        info!(grid, extracted, kept = units.len(), attempts = run.attempts, "grid decomposed");
        Ok(GridDecomposition {
            units,
            extension_factor: factor,
            attempts: run.attempts,
            cancelled: run.cancelled,
        })
    }

    /// Extraction loop over one whitened working signal
    ///
    /// Accepted sources are peeled off `working`. When `full` is given the
    /// accepted filters are re-applied to it so units span the whole grid signal.
    fn extract_sources(
        &self,
        working: &mut GridObservation,
        full: Option<&GridObservation>,
        sampling_rate: f64,
        run: &mut ExtractionRun,
        cancel: &CancellationToken,
        progress: &mut dyn ProgressReporter,
    ) -> DecompResult<()> {
        let separation = &self.config.separation;
        let grid = run.grid;
        let classifier = SpikeClassifier::new(&self.config.spikes, sampling_rate);
        let scorer = QualityScorer::new(&self.config.quality, &self.config.spikes, sampling_rate);
        let mut separator = Separator::new(separation);
        let mut activity = ActivityIndex::new(working.whitened());
        let half_window = seconds_to_samples(separation.peel_off_window_s, sampling_rate);

        for _ in 0..separation.iterations {
            if cancel.is_cancelled() {
                info!(grid, iteration = run.attempts + 1, "decomposition cancelled");
                run.cancelled = true;
                break;
            }
            run.attempts += 1;
            let iteration = run.attempts;

            let initial = activity
                .next_seed(working.whitened())
                .unwrap_or_else(|| random_weights(working.dimension(), &mut run.rng));
            let estimate = match separator.extract(working.whitened(), initial) {
                Ok(estimate) => estimate,
                Err(DecompError::DegenerateCovariance { retained, total }) => {
                    debug!(grid, retained, total, "separation space exhausted");
                    break;
                }
                Err(e) => return Err(e),
            };
            if let Some(warning) = estimate.warning() {
                warn!(grid, iteration, %warning, "keeping last iterate");
            }

            let source = if separation.refine_cov_isi {
                refine_by_cov_isi(working, &classifier, estimate.weights.clone(), separation.max_cov_isi_iterations)
            } else {
                let classification = classifier.classify(working.activation(estimate.weights.view()).view());
                RefinedSource {
                    cov_isi: cov_isi(&classification.discharge_times),
                    weights: estimate.weights.clone(),
                    classification,
                }
            };
            separator.accept(&estimate.weights);

            let classification = &source.classification;
            let score = scorer.score(classification.pulse_train.view(), &classification.discharge_times);
            let regular = !separation.cov_filter
                || cov_isi(&classification.discharge_times).is_some_and(|cov| cov <= separation.cov_threshold);
            let accepted = score.sil >= separation.sil_threshold
                && classification.discharge_times.len() >= self.config.quality.min_discharges
                && regular;

            debug!(
                grid,
                iteration,
                fixed_point_iterations = estimate.iterations,
                discharges = classification.discharge_times.len(),
                sil = score.sil,
                cov_isi = source.cov_isi,
                accepted,
                "source extracted"
            );
            progress.report(ProgressEvent::Iteration {
                grid,
                iteration,
                total: run.total,
                sil: score.sil,
                cov_isi: source.cov_isi,
                accepted,
            });

            if !accepted {
                continue;
            }
            if separation.peel_off {
                peel_off(working, &classification.discharge_times, half_window);
            }

            let unit = match full {
                Some(full) => {
                    let filter = working.extended_filter(source.weights.view());
                    let whole = classifier.classify(full.project_extended(filter.view()).view());
                    let mut unit = MotorUnit::new(whole.pulse_train, whole.discharge_times);
                    scorer.rescore(&mut unit);
                    unit
                }
                None => {
                    let classification = source.classification;
                    let mut unit = MotorUnit::new(classification.pulse_train, classification.discharge_times);
                    unit.sil = score.sil;
                    unit.continuous_sil = score.continuous;
                    unit
                }
            };
            run.units.push(unit);
        }
        Ok(())
    }

    /// Rate-outlier removal followed by a whole-signal filter update of every unit
    fn refine_units(&self, observation: &GridObservation, units: &mut [MotorUnit], sampling_rate: f64) {
        let refiner = FilterRefiner::new(&self.config, sampling_rate);
        let editing = &self.config.editing;
        let window = 0..observation.sample_count;

        for (index, unit) in units.iter_mut().enumerate() {
            let kept = remove_rate_outliers(
                unit.pulse_train.view(),
                &unit.discharge_times,
                sampling_rate,
                editing.rate_cov_threshold,
                self.config.spikes.outlier_sigma,
                editing.max_outlier_iterations,
            );
            unit.set_discharge_times(kept);
            match refiner.update_window(observation, unit, &window, false) {
                Ok(update) => update.apply(unit),
                Err(e) => debug!(unit = index, error = %e, "unit kept unrefined"),
            }
        }
        debug!(units = units.len(), "accepted units refined");
    }

    /// Decompose every grid of a recording
    ///
    /// Grids with a degenerate covariance are skipped and reported; other
    /// errors abort the call.
    pub fn decompose(
        &self,
        recording: &Recording,
        cancel: &CancellationToken,
        progress: &mut dyn ProgressReporter,
    ) -> DecompResult<DecompositionOutput> {
        validate_sampling_rate(recording.sampling_rate)?;

        let mut output = DecompositionOutput {
            sampling_rate: recording.sampling_rate,
            sample_count: recording.sample_count(),
            grids: Vec::with_capacity(recording.grid_count()),
            skipped_grids: Vec::new(),
            cancelled: false,
        };

        for grid in 0..recording.grid_count() {
            if output.cancelled {
                output.grids.push(Vec::new());
                continue;
            }
            match self.decompose_grid(recording, grid, cancel, progress) {
                Ok(result) => {
                    output.cancelled = result.cancelled;
                    output.grids.push(result.units);
                }
                Err(e @ DecompError::DegenerateCovariance { .. }) => {
                    warn!(grid, error = %e, "skipping grid");
                    progress.report(ProgressEvent::GridSkipped {
                        grid,
                        reason: e.to_string(),
                    });
                    output.skipped_grids.push(grid);
                    output.grids.push(Vec::new());
                }
                Err(e) => return Err(e),
            }
        }

        if self.config.duplicates.resolve_between_grids && output.grids.len() > 1 {
            let removed = self.resolve_between_grids(&mut output.grids, recording.sampling_rate);
            debug!(removed, "duplicates removed between grids");
        }

        progress.report(ProgressEvent::Completed {
            units: output.unit_count(),
        });
        info!(
            grids = output.grids.len(),
            units = output.unit_count(),
            skipped = output.skipped_grids.len(),
            "decomposition completed"
        );
        Ok(output)
    }

    /// Keep the best unit of every group duplicated across grids, returning how many were removed
    fn resolve_between_grids(&self, grids: &mut Vec<Vec<MotorUnit>>, sampling_rate: f64) -> usize {
        let resolver = DuplicateResolver::new(&self.config.duplicates, sampling_rate);
        let tagged: Vec<(usize, &MotorUnit)> = grids
            .iter()
            .enumerate()
            .flat_map(|(grid, units)| units.iter().map(move |unit| (grid, unit)))
            .collect();
        let total = tagged.len();
        let kept = resolver.resolve_between(&tagged);

        let mut survivors: Vec<Vec<usize>> = vec![Vec::new(); grids.len()];
        let mut offsets = Vec::with_capacity(grids.len());
        let mut offset = 0;
        for units in grids.iter() {
            offsets.push(offset);
            offset += units.len();
        }
        for position in &kept {
            let grid = offsets.partition_point(|&start| start <= *position) - 1;
            survivors[grid].push(position - offsets[grid]);
        }

        let owned = std::mem::take(grids);
        *grids = owned
            .into_iter()
            .zip(survivors.iter())
            .map(|(units, kept)| retain_positions(units, kept))
            .collect();
        total - kept.len()
    }
}

/// Shared state of the extraction loops of one grid
struct ExtractionRun {
    grid: usize,
    rng: StdRng,
    /// Attempts planned over every window
    total: usize,
    attempts: usize,
    units: Vec<MotorUnit>,
    cancelled: bool,
}

/// Equal, contiguous segments covering `[0, len)`; the last one takes the remainder
fn segment_ranges(len: usize, windows: usize, extension_factor: usize) -> DecompResult<Vec<Range<usize>>> {
    let windows = windows.max(1);
    let width = len / windows;
    if width < extension_factor.max(2) {
        return Err(DecompError::invalid_shape(
            "decomposition window",
            format!(
                "{} windows leave {} samples each, below the extension factor {}",
                windows, width, extension_factor
            ),
        ));
    }
    Ok((0..windows)
        .map(|w| {
            let end = if w + 1 == windows { len } else { (w + 1) * width };
            w * width..end
        })
        .collect())
}

/// Elements at the sorted positions in `kept`
fn retain_positions(units: Vec<MotorUnit>, kept: &[usize]) -> Vec<MotorUnit> {
    units
        .into_iter()
        .enumerate()
        .filter(|(index, _)| kept.binary_search(index).is_ok())
        .map(|(_, unit)| unit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GridLayout, SignalType};
    use crate::processing::duplicates::coincidence_ratio;
    use crate::utils::progress::NoProgress;
    use ndarray::Array2;
    use rand::Rng;

    /// Four channels with one motor unit firing at ~20 Hz over light noise
    fn single_unit_channels(samples: usize, seed: u64) -> (Array2<f64>, Vec<usize>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let shape = [0.3, 1.0, 0.5, -0.4, -0.2];
        let gains = [1.0, -0.6, 0.8, 0.4];

        let mut firings = Vec::new();
        let mut t = 40;
        while t + shape.len() < samples {
            firings.push(t);
            t += 95 + rng.gen_range(0..10);
        }

        let mut channels = Array2::from_shape_fn((4, samples), |_| rng.gen_range(-0.02..0.02));
        for &f in &firings {
            for (c, gain) in gains.iter().enumerate() {
                for (k, v) in shape.iter().enumerate() {
                    channels[[c, f + k]] += gain * v;
                }
            }
        }
        (channels, firings)
    }

    fn small_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.separation.iterations = 4;
        config.extension.max_factor = 8;
        config
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.separation.tolerance = 0.0;
        assert!(matches!(Decomposer::new(config), Err(DecompError::Configuration(_))));
    }

    #[test]
    fn test_finds_planted_unit() {
        let (channels, firings) = single_unit_channels(4000, 3);
        let recording = Recording::single_grid(channels, 2000.0).unwrap();
        let decomposer = Decomposer::new(small_config()).unwrap();

        let mut events = Vec::new();
        let mut reporter = |event: ProgressEvent| events.push(event);
        let output = decomposer
            .decompose(&recording, &CancellationToken::new(), &mut reporter)
            .unwrap();

        assert_eq!(output.grids.len(), 1);
        assert!(!output.grids[0].is_empty());
        let best = &output.grids[0][0];
        assert_eq!(best.len(), 4000);
        assert!(coincidence_ratio(&best.discharge_times, &firings, 50) > 0.8);
        assert!(matches!(events.last(), Some(ProgressEvent::Completed { .. })));
    }

    #[test]
    fn test_degenerate_grid_is_skipped() {
        let (mut channels, _) = single_unit_channels(3000, 4);
        let silent = Array2::<f64>::zeros((4, 3000));
        channels = ndarray::concatenate(ndarray::Axis(0), &[channels.view(), silent.view()]).unwrap();

        let grids = vec![
            GridLayout::new("active", vec![0, 1, 2, 3], SignalType::Surface),
            GridLayout::new("silent", vec![4, 5, 6, 7], SignalType::Surface),
        ];
        let recording = Recording::new(channels, 2000.0, grids).unwrap();

        let mut skipped = Vec::new();
        let mut reporter = |event: ProgressEvent| {
            if let ProgressEvent::GridSkipped { grid, .. } = event {
                skipped.push(grid);
            }
        };
        let output = Decomposer::new(small_config())
            .unwrap()
            .decompose(&recording, &CancellationToken::new(), &mut reporter)
            .unwrap();

        assert_eq!(output.skipped_grids, vec![1]);
        assert_eq!(skipped, vec![1]);
        assert!(output.grids[1].is_empty());
    }

    #[test]
    fn test_cancelled_before_start() {
        let (channels, _) = single_unit_channels(2000, 5);
        let recording = Recording::single_grid(channels, 2000.0).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let output = Decomposer::new(small_config())
            .unwrap()
            .decompose(&recording, &cancel, &mut NoProgress)
            .unwrap();
        assert!(output.cancelled);
        assert_eq!(output.unit_count(), 0);
    }

    #[test]
    fn test_extension_factor_follows_signal_type() {
        let (channels, _) = single_unit_channels(500, 6);
        let grids = vec![
            GridLayout::new("surface", vec![0, 1], SignalType::Surface),
            GridLayout::new("needle", vec![2, 3], SignalType::Intramuscular),
        ];
        let recording = Recording::new(channels, 2000.0, grids).unwrap();
        let mut config = EngineConfig::default();
        config.extension.max_factor = 2000;
        let decomposer = Decomposer::new(config).unwrap();

        assert_eq!(decomposer.grid_extension_factor(&recording, 0).unwrap(), 500);
        assert_eq!(decomposer.grid_extension_factor(&recording, 1).unwrap(), 1500);
        assert!(matches!(
            decomposer.grid_extension_factor(&recording, 2),
            Err(DecompError::GridNotFound(2))
        ));
    }

    #[test]
    fn test_segment_ranges_cover_signal() {
        assert_eq!(segment_ranges(10, 3, 2).unwrap(), vec![0..3, 3..6, 6..10]);
        assert_eq!(segment_ranges(10, 1, 4).unwrap(), vec![0..10]);
        assert!(matches!(segment_ranges(10, 6, 2), Err(DecompError::InvalidShape { .. })));
    }

    #[test]
    fn test_cov_filter_gates_acceptance() {
        let (channels, _) = single_unit_channels(4000, 7);
        let recording = Recording::single_grid(channels, 2000.0).unwrap();
        let mut config = small_config();
        config.separation.cov_threshold = 1e-6;

        let strict = Decomposer::new(config.clone())
            .unwrap()
            .decompose(&recording, &CancellationToken::new(), &mut NoProgress)
            .unwrap();
        assert_eq!(strict.unit_count(), 0);

        config.separation.cov_filter = false;
        let lenient = Decomposer::new(config)
            .unwrap()
            .decompose(&recording, &CancellationToken::new(), &mut NoProgress)
            .unwrap();
        assert!(lenient.unit_count() > 0);
    }

    #[test]
    fn test_windowed_decomposition_spans_whole_signal() {
        let (channels, firings) = single_unit_channels(8000, 8);
        let recording = Recording::single_grid(channels, 2000.0).unwrap();
        let mut config = small_config();
        config.separation.windows = 2;

        let mut totals = Vec::new();
        let mut reporter = |event: ProgressEvent| {
            if let ProgressEvent::Iteration { total, .. } = event {
                totals.push(total);
            }
        };
        let result = Decomposer::new(config)
            .unwrap()
            .decompose_grid(&recording, 0, &CancellationToken::new(), &mut reporter)
            .unwrap();

        assert!(totals.iter().all(|&t| t == 8));
        assert!(result.attempts > 4);
        let best = result
            .units
            .iter()
            .map(|unit| coincidence_ratio(&unit.discharge_times, &firings, 50))
            .fold(0.0, f64::max);
        assert!(best > 0.8, "best coincidence {}", best);
        for unit in &result.units {
            assert_eq!(unit.len(), 8000);
        }
    }

    #[test]
    fn test_refine_pass_keeps_planted_unit() {
        let (channels, firings) = single_unit_channels(4000, 9);
        let recording = Recording::single_grid(channels, 2000.0).unwrap();
        let mut config = small_config();
        config.separation.refine_units = true;

        let output = Decomposer::new(config)
            .unwrap()
            .decompose(&recording, &CancellationToken::new(), &mut NoProgress)
            .unwrap();
        let best = output.grids[0]
            .iter()
            .map(|unit| coincidence_ratio(&unit.discharge_times, &firings, 50))
            .fold(0.0, f64::max);
        assert!(best > 0.8, "best coincidence {}", best);
    }

    #[test]
    fn test_same_unit_on_two_grids_is_kept_once() {
        let (channels, _) = single_unit_channels(4000, 10);
        let scaled = channels.mapv(|v| 0.5 * v);
        let data = ndarray::concatenate(ndarray::Axis(0), &[channels.view(), scaled.view()]).unwrap();
        let grids = vec![
            GridLayout::new("proximal", vec![0, 1, 2, 3], SignalType::Surface),
            GridLayout::new("distal", vec![4, 5, 6, 7], SignalType::Surface),
        ];
        let recording = Recording::new(data, 2000.0, grids).unwrap();

        let mut config = small_config();
        config.duplicates.resolve_between_grids = false;
        let both = Decomposer::new(config.clone())
            .unwrap()
            .decompose(&recording, &CancellationToken::new(), &mut NoProgress)
            .unwrap();
        assert!(!both.grids[0].is_empty());
        assert!(!both.grids[1].is_empty());

        config.duplicates.resolve_between_grids = true;
        let resolved = Decomposer::new(config)
            .unwrap()
            .decompose(&recording, &CancellationToken::new(), &mut NoProgress)
            .unwrap();
        assert!(resolved.unit_count() < both.unit_count());
        for a in &resolved.grids[0] {
            for b in &resolved.grids[1] {
                assert!(coincidence_ratio(&a.discharge_times, &b.discharge_times, 50) <= 0.3);
            }
        }
    }
}

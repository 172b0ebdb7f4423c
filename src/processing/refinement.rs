// src/processing/refinement.rs
//! Windowed motor unit filter re-estimation
//!
//! A unit's separation filter is rebuilt from the whitened columns at its
//! discharges inside a window and applied to the whole signal. Extension
//! slides the window forward and backward by half its width until the
//! recording is covered.

use std::ops::Range;

use ndarray::Array1;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{DecompError, DecompResult};
use crate::model::{MotorUnit, UnitId};
use crate::processing::observation::GridObservation;
use crate::processing::quality::{QualityScore, QualityScorer};
use crate::processing::spikes::SpikeClassifier;
use crate::utils::cancel::CancellationToken;
use crate::utils::progress::{ProgressEvent, ProgressReporter};
use crate::utils::validation::validate_window;

/// Result of one window update, not yet applied to the unit
#[derive(Debug, Clone)]
pub struct WindowUpdate {
    pub pulse_train: Array1<f64>,
    pub discharge_times: Vec<usize>,
    pub score: QualityScore,
}

impl WindowUpdate {
    pub fn apply(self, unit: &mut MotorUnit) {
        unit.pulse_train = self.pulse_train;
        unit.set_discharge_times(self.discharge_times);
        unit.sil = self.score.sil;
        unit.continuous_sil = self.score.continuous;
    }
}

/// Outcome of extending a filter over the whole recording
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtensionReport {
    /// Windows planned
    pub windows: usize,
    /// Windows that changed the unit
    pub updates: usize,
    /// Windows without discharges
    pub skipped: usize,
    pub cancelled: bool,
}

/// Re-estimates motor unit filters against a grid observation
#[derive(Debug, Clone)]
pub struct FilterRefiner {
    classifier: SpikeClassifier,
    scorer: QualityScorer,
}

impl FilterRefiner {
    pub fn new(config: &EngineConfig, sampling_rate: f64) -> Self {
        Self {
            classifier: SpikeClassifier::new(&config.spikes, sampling_rate),
            scorer: QualityScorer::new(&config.quality, &config.spikes, sampling_rate),
        }
    }

    pub fn scorer(&self) -> &QualityScorer {
        &self.scorer
    }

    /// Rebuild the filter from the discharges in `window`
    ///
    /// With `locked` set only the pulse-train shape changes; the discharge
    /// times are kept as they are.
    pub fn update_window(
        &self,
        observation: &GridObservation,
        unit: &MotorUnit,
        window: &Range<usize>,
        locked: bool,
    ) -> DecompResult<WindowUpdate> {
        if observation.sample_count != unit.len() {
            return Err(DecompError::invalid_shape(
                "motor unit",
                format!(
                    "pulse train of {} samples against a {}-sample observation",
                    unit.len(),
                    observation.sample_count
                ),
            ));
        }
        validate_window(window, unit.len())?;

        let in_window: Vec<usize> = unit
            .discharge_times
            .iter()
            .copied()
            .filter(|t| window.contains(t))
            .collect();
        if in_window.is_empty() {
            return Err(DecompError::EmptyDischargeSet { count: 0, required: 1 });
        }

        let filter = observation.triggered_sum(&in_window);
        let activation = observation.activation(filter.view());

        let (pulse_train, discharge_times) = if locked {
            let pulse = self.classifier.reshape(activation.view(), &unit.discharge_times);
            (pulse, unit.discharge_times.clone())
        } else {
            let classification = self.classifier.classify(activation.view());
            (classification.pulse_train, classification.discharge_times)
        };

        let score = self.scorer.score(pulse_train.view(), &discharge_times);
        debug!(
            start = window.start,
            end = window.end,
            triggers = in_window.len(),
            discharges = discharge_times.len(),
            sil = score.sil,
            locked,
            "filter window updated"
        );

        Ok(WindowUpdate {
            pulse_train,
            discharge_times,
            score,
        })
    }

    /// Slide the window over the whole recording, updating the unit at every step
    ///
    /// Windows without discharges are skipped. Cancellation is checked between
    /// windows; updates already applied are kept.
    pub fn extend_to_full_signal(
        &self,
        observation: &GridObservation,
        id: UnitId,
        unit: &mut MotorUnit,
        window: &Range<usize>,
        cancel: &CancellationToken,
        progress: &mut dyn ProgressReporter,
    ) -> DecompResult<ExtensionReport> {
        let plan = plan_extension(window, unit.len())?;
        let mut report = ExtensionReport {
            windows: plan.len(),
            ..ExtensionReport::default()
        };

        for (step, current) in plan.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(unit = %id, step, total = plan.len(), "filter extension cancelled");
                report.cancelled = true;
                break;
            }

            match self.update_window(observation, unit, current, false) {
                Ok(update) => {
                    update.apply(unit);
                    report.updates += 1;
                }
                Err(DecompError::EmptyDischargeSet { .. }) => {
                    debug!(unit = %id, start = current.start, end = current.end, "no discharges in window");
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }

            progress.report(ProgressEvent::WindowStep {
                unit: id,
                step: step + 1,
                total: plan.len(),
                window: current.clone(),
                sil: unit.sil,
            });
        }

        info!(
            unit = %id,
            updates = report.updates,
            skipped = report.skipped,
            sil = unit.sil,
            "filter extended"
        );
        Ok(report)
    }
}

/// Windows visited by a filter extension starting from `window`
///
/// The initial window comes first, then windows moved forward by half its
/// width, then windows moved backward, all clipped to `[0, len)`.
pub fn plan_extension(window: &Range<usize>, len: usize) -> DecompResult<Vec<Range<usize>>> {
    validate_window(window, len)?;
    let step = window.len() / 2;
    if step == 0 {
        return Err(DecompError::InvalidWindow {
            start: window.start,
            end: window.end,
            len,
        });
    }

    let mut plan = vec![window.clone()];

    let last = window.end - 1;
    for j in 1..=(len - last) / step {
        let start = window.start + j * step;
        if start >= len {
            break;
        }
        plan.push(start..(window.end + j * step).min(len));
    }

    for j in 1..=window.start / step {
        plan.push(window.start - j * step..window.end - j * step);
    }

    Ok(plan)
}

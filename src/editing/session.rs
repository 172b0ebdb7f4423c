// src/editing/session.rs
//! Editing session over the motor units of a decomposition
//!
//! The session owns every unit, the shared time vector, an undo history and
//! the spike lock. Single-unit edits snapshot the unit first so they can be
//! undone; structural edits (compaction, duplicate removal) and batch
//! operations clear the history.

use std::ops::Range;

use tracing::{debug, info, warn};

use crate::config::{seconds_to_samples, EngineConfig};
use crate::editing::selection::{self, SelectionRegion};
use crate::editing::undo::UndoStack;
use crate::error::{DecompError, DecompResult};
use crate::model::{MotorUnit, Recording, UnitId};
use crate::processing::decomposition::{Decomposer, DecompositionOutput};
use crate::processing::duplicates::DuplicateResolver;
use crate::processing::observation::GridObservation;
use crate::processing::quality::QualityScorer;
use crate::processing::refinement::{plan_extension, ExtensionReport, FilterRefiner};
use crate::processing::spikes::remove_rate_outliers;
use crate::utils::cancel::CancellationToken;
use crate::utils::progress::{BatchReport, ProgressEvent, ProgressReporter};
use crate::utils::validation::{validate_discharge_times, validate_sampling_rate};

/// Mutable state of a motor unit editing session
#[derive(Debug, Clone)]
pub struct EditingSession {
    config: EngineConfig,
    sampling_rate: f64,
    sample_count: usize,
    time: Vec<f64>,
    grids: Vec<Vec<MotorUnit>>,
    observations: Vec<Option<GridObservation>>,
    skipped_grids: Vec<usize>,
    undo: UndoStack,
    spike_lock: bool,
    scorer: QualityScorer,
    refiner: FilterRefiner,
    resolver: DuplicateResolver,
}

impl EditingSession {
    /// Open a session over previously decomposed or loaded motor units
    pub fn new(config: EngineConfig, sampling_rate: f64, grids: Vec<Vec<MotorUnit>>) -> DecompResult<Self> {
        validate_sampling_rate(sampling_rate)?;
        config
            .validate_consistency()
            .map_err(|errors| DecompError::Configuration(errors.join("; ")))?;

        let sample_count = grids.iter().flatten().map(MotorUnit::len).next().unwrap_or(0);
        if let Some((grid, unit)) = grids.iter().enumerate().find_map(|(g, units)| {
            units
                .iter()
                .position(|u| u.len() != sample_count)
                .map(|u| (g, u))
        }) {
            return Err(DecompError::invalid_shape(
                "motor unit",
                format!(
                    "grid {} unit {} has {} samples, expected {}",
                    grid,
                    unit,
                    grids[grid][unit].len(),
                    sample_count
                ),
            ));
        }

        for (grid, units) in grids.iter().enumerate() {
            for (unit, motor_unit) in units.iter().enumerate() {
                validate_discharge_times(&motor_unit.discharge_times, motor_unit.len()).map_err(|e| {
                    warn!(grid, unit, error = %e, "rejected motor unit");
                    e
                })?;
            }
        }

        let time = (0..sample_count).map(|i| i as f64 / sampling_rate).collect();
        info!(
            grids = grids.len(),
            units = grids.iter().map(Vec::len).sum::<usize>(),
            sample_count,
            "editing session opened"
        );

        Ok(Self {
            scorer: QualityScorer::new(&config.quality, &config.spikes, sampling_rate),
            refiner: FilterRefiner::new(&config, sampling_rate),
            resolver: DuplicateResolver::new(&config.duplicates, sampling_rate),
            undo: UndoStack::new(config.editing.undo_depth),
            observations: vec![None; grids.len()],
            skipped_grids: Vec::new(),
            spike_lock: false,
            config,
            sampling_rate,
            sample_count,
            time,
            grids,
        })
    }

    /// Open a session on a decomposition result
    pub fn from_output(config: EngineConfig, output: DecompositionOutput) -> DecompResult<Self> {
        let mut session = Self::new(config, output.sampling_rate, output.grids)?;
        session.skipped_grids = output.skipped_grids;
        if session.sample_count == 0 {
            session.sample_count = output.sample_count;
            session.time = (0..output.sample_count)
                .map(|i| i as f64 / output.sampling_rate)
                .collect();
        }
        Ok(session)
    }

    /// Attach the prepared observation of a grid for filter refinement
    pub fn attach_signal(&mut self, grid: usize, observation: GridObservation) -> DecompResult<()> {
        if grid >= self.grids.len() {
            return Err(DecompError::GridNotFound(grid));
        }
        if observation.sample_count != self.sample_count {
            return Err(DecompError::invalid_shape(
                "grid observation",
                format!(
                    "{} samples for a session of {} samples",
                    observation.sample_count, self.sample_count
                ),
            ));
        }
        self.observations[grid] = Some(observation);
        Ok(())
    }

    /// Prepare and attach every grid of the recording the units came from
    ///
    /// Grids with a degenerate covariance stay detached. Returns the number of
    /// grids attached.
    pub fn attach_recording(&mut self, recording: &Recording) -> DecompResult<usize> {
        let decomposer = Decomposer::new(self.config.clone())?;
        let mut attached = 0;
        for grid in 0..self.grids.len().min(recording.grid_count()) {
            match decomposer.prepare_grid(recording, grid) {
                Ok(observation) => {
                    self.attach_signal(grid, observation)?;
                    attached += 1;
                }
                Err(e @ DecompError::DegenerateCovariance { .. }) => {
                    warn!(grid, error = %e, "grid left without signal");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(attached)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Shared time vector, `t[i] = i / fs`
    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn grid_count(&self) -> usize {
        self.grids.len()
    }

    pub fn has_signal(&self, grid: usize) -> bool {
        matches!(self.observations.get(grid), Some(Some(_)))
    }

    pub fn units(&self, grid: usize) -> DecompResult<&[MotorUnit]> {
        self.grids
            .get(grid)
            .map(Vec::as_slice)
            .ok_or(DecompError::GridNotFound(grid))
    }

    pub fn unit(&self, id: UnitId) -> DecompResult<&MotorUnit> {
        self.grids
            .get(id.grid)
            .ok_or(DecompError::GridNotFound(id.grid))?
            .get(id.unit)
            .ok_or(DecompError::UnitNotFound {
                grid: id.grid,
                unit: id.unit,
            })
    }

    fn unit_mut(&mut self, id: UnitId) -> DecompResult<&mut MotorUnit> {
        self.grids
            .get_mut(id.grid)
            .ok_or(DecompError::GridNotFound(id.grid))?
            .get_mut(id.unit)
            .ok_or(DecompError::UnitNotFound {
                grid: id.grid,
                unit: id.unit,
            })
    }

    /// Every unit id in grid order
    pub fn unit_ids(&self) -> Vec<UnitId> {
        self.grids
            .iter()
            .enumerate()
            .flat_map(|(grid, units)| (0..units.len()).map(move |unit| UnitId::new(grid, unit)))
            .collect()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    /// Snapshot a unit before editing it
    pub fn begin_edit(&mut self, id: UnitId) -> DecompResult<()> {
        let snapshot = self.unit(id)?.clone();
        self.undo.push(id, snapshot);
        Ok(())
    }

    /// Restore the newest snapshot of `id`; `false` when there is none
    pub fn undo(&mut self, id: UnitId) -> bool {
        if self.unit(id).is_err() {
            return false;
        }
        match self.undo.pop_for(id) {
            Some(previous) => {
                self.grids[id.grid][id.unit] = previous;
                debug!(unit = %id, "edit undone");
                true
            }
            None => false,
        }
    }

    /// Keep the current discharges through the next filter update
    pub fn lock_spikes(&mut self) {
        self.spike_lock = true;
    }

    pub fn is_spike_locked(&self) -> bool {
        self.spike_lock
    }

    /// Zero a unit and mark it for removal by [`EditingSession::compact`]
    pub fn flag_for_deletion(&mut self, id: UnitId) -> DecompResult<()> {
        self.begin_edit(id)?;
        self.unit_mut(id)?.flag_for_deletion();
        info!(unit = %id, "motor unit flagged for deletion");
        Ok(())
    }

    /// Remove flagged units, re-indexing the survivors of each grid in order
    pub fn compact(&mut self) -> usize {
        let before: usize = self.grids.iter().map(Vec::len).sum();
        for units in &mut self.grids {
            units.retain(|unit| !unit.is_flagged());
        }
        let removed = before - self.grids.iter().map(Vec::len).sum::<usize>();
        self.undo.clear();
        info!(removed, "session compacted");
        removed
    }

    /// Recompute SIL and continuous SIL of a unit
    pub fn rescore(&mut self, id: UnitId) -> DecompResult<()> {
        self.unit(id)?;
        self.scorer.rescore(&mut self.grids[id.grid][id.unit]);
        Ok(())
    }

    fn edit_discharges<F>(&mut self, id: UnitId, edit: F) -> DecompResult<()>
    where
        F: FnOnce(&MotorUnit) -> Vec<usize>,
    {
        let discharges = edit(self.unit(id)?);
        self.begin_edit(id)?;
        let unit = self.unit_mut(id)?;
        let before = unit.discharge_count();
        unit.set_discharge_times(discharges);
        debug!(unit = %id, before, after = unit.discharge_count(), "discharges edited");
        self.rescore(id)
    }

    /// Add the pulse-train peaks inside `region` as discharges
    pub fn add_spikes(&mut self, id: UnitId, region: &SelectionRegion) -> DecompResult<()> {
        let min_distance = seconds_to_samples(self.config.spikes.refractory_s, self.sampling_rate);
        self.edit_discharges(id, |unit| {
            selection::add_spikes(unit.pulse_train.view(), &unit.discharge_times, region, min_distance)
        })
    }

    /// Remove the discharges inside `region`
    pub fn delete_spikes(&mut self, id: UnitId, region: &SelectionRegion) -> DecompResult<()> {
        self.edit_discharges(id, |unit| {
            selection::delete_spikes(unit.pulse_train.view(), &unit.discharge_times, region)
        })
    }

    /// Remove the discharges whose instantaneous rate falls inside `region`
    pub fn delete_discharge_rates(&mut self, id: UnitId, region: &SelectionRegion) -> DecompResult<()> {
        let sampling_rate = self.sampling_rate;
        self.edit_discharges(id, |unit| {
            selection::delete_discharge_rates(&unit.discharge_times, sampling_rate, region)
        })
    }

    /// Remove discharge-rate outliers from one unit, returning how many were dropped
    pub fn remove_outliers(&mut self, id: UnitId) -> DecompResult<usize> {
        let before = self.unit(id)?.discharge_count();
        let (fs, editing, sigma) = (
            self.sampling_rate,
            self.config.editing.clone(),
            self.config.spikes.outlier_sigma,
        );
        self.edit_discharges(id, |unit| {
            remove_rate_outliers(
                unit.pulse_train.view(),
                &unit.discharge_times,
                fs,
                editing.rate_cov_threshold,
                sigma,
                editing.max_outlier_iterations,
            )
        })?;
        Ok(before - self.unit(id)?.discharge_count())
    }

    /// Re-estimate a unit's filter from its discharges inside `window`
    ///
    /// Honours and then clears the spike lock. On error the unit is left untouched.
    pub fn update_filter(&mut self, id: UnitId, window: &Range<usize>) -> DecompResult<()> {
        self.refine_unit(id, window, self.spike_lock)?;
        if self.spike_lock {
            debug!(unit = %id, "spike lock released");
            self.spike_lock = false;
        }
        Ok(())
    }

    fn refine_unit(&mut self, id: UnitId, window: &Range<usize>, locked: bool) -> DecompResult<()> {
        self.unit(id)?;
        let observation = self.observations[id.grid]
            .as_ref()
            .ok_or(DecompError::SignalNotAttached(id.grid))?;
        let update = self
            .refiner
            .update_window(observation, &self.grids[id.grid][id.unit], window, locked)?;

        self.begin_edit(id)?;
        update.apply(self.unit_mut(id)?);
        Ok(())
    }

    /// Extend a unit's filter from `window` over the whole recording
    pub fn extend_filter(
        &mut self,
        id: UnitId,
        window: &Range<usize>,
        cancel: &CancellationToken,
        progress: &mut dyn ProgressReporter,
    ) -> DecompResult<ExtensionReport> {
        self.unit(id)?;
        if !self.has_signal(id.grid) {
            return Err(DecompError::SignalNotAttached(id.grid));
        }
        plan_extension(window, self.sample_count)?;
        self.begin_edit(id)?;

        let observation = self.observations[id.grid]
            .as_ref()
            .ok_or(DecompError::SignalNotAttached(id.grid))?;
        let unit = &mut self.grids[id.grid][id.unit];
        let report = self
            .refiner
            .extend_to_full_signal(observation, id, unit, window, cancel, progress)?;
        self.rescore(id)?;
        Ok(report)
    }

    /// Rate-based outlier removal on every active unit
    pub fn remove_outliers_all(
        &mut self,
        cancel: &CancellationToken,
        progress: &mut dyn ProgressReporter,
    ) -> BatchReport {
        let ids = self.unit_ids();
        let mut report = BatchReport::default();
        self.undo.clear();

        for (completed, id) in ids.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if self.grids[id.grid][id.unit].discharge_count() < 2 {
                report.skipped += 1;
            } else {
                match self.remove_outliers(*id) {
                    Ok(_) => report.processed += 1,
                    Err(e) => record_failure(&mut report, *id, e),
                }
            }
            progress.report(ProgressEvent::BatchStep {
                unit: *id,
                completed: completed + 1,
                total: ids.len(),
            });
        }

        self.undo.clear();
        info!(
            processed = report.processed,
            skipped = report.skipped,
            cancelled = report.cancelled,
            "outliers removed from all units"
        );
        report
    }

    /// Whole-signal filter update of every unit with attached signal
    ///
    /// Batch updates never use the spike lock; a pending lock stays for the
    /// next single-unit update.
    pub fn update_all_filters(
        &mut self,
        cancel: &CancellationToken,
        progress: &mut dyn ProgressReporter,
    ) -> BatchReport {
        let ids = self.unit_ids();
        let window = 0..self.sample_count;
        let mut report = BatchReport::default();

        for (completed, id) in ids.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if self.grids[id.grid][id.unit].is_flagged() {
                report.skipped += 1;
            } else {
                match self.refine_unit(*id, &window, false) {
                    Ok(()) => report.processed += 1,
                    Err(DecompError::EmptyDischargeSet { .. }) => report.skipped += 1,
                    Err(e) => record_failure(&mut report, *id, e),
                }
            }
            progress.report(ProgressEvent::BatchStep {
                unit: *id,
                completed: completed + 1,
                total: ids.len(),
            });
        }

        self.undo.clear();
        info!(
            processed = report.processed,
            skipped = report.skipped,
            failures = report.failures.len(),
            cancelled = report.cancelled,
            "all filters updated"
        );
        report
    }

    /// Remove duplicated units inside each grid, returning how many were removed
    pub fn remove_duplicates_within_grids(&mut self) -> usize {
        let mut removed = 0;
        for (grid, units) in self.grids.iter_mut().enumerate() {
            let kept = self.resolver.resolve_within(units);
            removed += units.len() - kept.len();
            retain_indices(units, &kept);
            debug!(grid, kept = kept.len(), "duplicates removed within grid");
        }
        self.undo.clear();
        info!(removed, "duplicates removed within grids");
        removed
    }

    /// Remove units duplicated across grids, returning how many were removed
    pub fn remove_duplicates_between_grids(&mut self) -> usize {
        let tagged: Vec<(usize, &MotorUnit)> = self
            .grids
            .iter()
            .enumerate()
            .flat_map(|(grid, units)| units.iter().map(move |unit| (grid, unit)))
            .collect();
        let kept = self.resolver.resolve_between(&tagged);
        let removed = tagged.len() - kept.len();

        let ids = self.unit_ids();
        let mut survivors: Vec<Vec<usize>> = vec![Vec::new(); self.grids.len()];
        for position in kept {
            let id = ids[position];
            survivors[id.grid].push(id.unit);
        }
        for (units, kept) in self.grids.iter_mut().zip(survivors.iter()) {
            retain_indices(units, kept);
        }

        self.undo.clear();
        info!(removed, "duplicates removed between grids");
        removed
    }

    /// Decomposition payload with the current state of every unit
    pub fn export(&self) -> DecompositionOutput {
        DecompositionOutput {
            sampling_rate: self.sampling_rate,
            sample_count: self.sample_count,
            grids: self.grids.clone(),
            skipped_grids: self.skipped_grids.clone(),
            cancelled: false,
        }
    }
}

fn record_failure(report: &mut BatchReport, id: UnitId, error: DecompError) {
    warn!(unit = %id, %error, "batch step failed");
    report.failures.push((id, error));
}

/// Keep the elements at the sorted positions in `kept`
fn retain_indices(units: &mut Vec<MotorUnit>, kept: &[usize]) {
    let mut index = 0;
    units.retain(|_| {
        let keep = kept.binary_search(&index).is_ok();
        index += 1;
        keep
    });
}

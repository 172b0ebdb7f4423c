// src/model/motor_unit.rs
//! Motor unit records held by the editing session

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::utils::validation::normalize_discharge_times;

/// Dense address of a motor unit: grid index and unit index within the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId {
    pub grid: usize,
    pub unit: usize,
}

impl UnitId {
    pub fn new(grid: usize, unit: usize) -> Self {
        Self { grid, unit }
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "grid {} / MU {}", self.grid, self.unit)
    }
}

/// Lifecycle tag of a motor unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UnitState {
    #[default]
    Active,
    /// Removed by the next compaction pass
    FlaggedForDeletion,
}

/// One decomposed motor unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorUnit {
    /// Separated activation trace, one value per sample
    pub pulse_train: Array1<f64>,
    /// Strictly increasing sample indices inside the pulse train
    pub discharge_times: Vec<usize>,
    pub sil: f64,
    /// (window-centre sample, local SIL) pairs
    pub continuous_sil: Vec<(usize, f64)>,
    pub state: UnitState,
}

impl MotorUnit {
    /// Unscored unit; callers rescore it before exposing it
    pub fn new(pulse_train: Array1<f64>, discharge_times: Vec<usize>) -> Self {
        let len = pulse_train.len();
        let (discharge_times, dropped) = normalize_discharge_times(discharge_times, len);
        if dropped > 0 {
            warn!(dropped, len, "discarded out-of-range or repeated discharge times");
        }
        Self {
            pulse_train,
            discharge_times,
            sil: 0.0,
            continuous_sil: Vec::new(),
            state: UnitState::Active,
        }
    }

    /// Rebuild a unit from persisted parts, keeping the stored scores
    pub fn from_parts(
        pulse_train: Array1<f64>,
        discharge_times: Vec<usize>,
        sil: f64,
        continuous_sil: Vec<(usize, f64)>,
    ) -> Self {
        let mut unit = Self::new(pulse_train, discharge_times);
        unit.sil = if sil.is_finite() { sil.clamp(0.0, 1.0) } else { 0.0 };
        unit.continuous_sil = continuous_sil;
        unit
    }

    pub fn len(&self) -> usize {
        self.pulse_train.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pulse_train.is_empty()
    }

    pub fn discharge_count(&self) -> usize {
        self.discharge_times.len()
    }

    pub fn is_flagged(&self) -> bool {
        self.state == UnitState::FlaggedForDeletion
    }

    /// Replace the discharge times, enforcing ordering and range
    pub fn set_discharge_times(&mut self, discharge_times: Vec<usize>) {
        let (normalized, dropped) = normalize_discharge_times(discharge_times, self.len());
        if dropped > 0 {
            warn!(dropped, "discarded out-of-range or repeated discharge times");
        }
        self.discharge_times = normalized;
    }

    /// Zero the unit and tag it for removal by compaction
    pub fn flag_for_deletion(&mut self) {
        self.pulse_train.fill(0.0);
        self.discharge_times.clear();
        self.sil = 0.0;
        self.continuous_sil.clear();
        self.state = UnitState::FlaggedForDeletion;
    }

    /// Mean discharge rate in Hz over the span of the discharges
    pub fn mean_discharge_rate(&self, sampling_rate: f64) -> f64 {
        crate::processing::quality::mean_discharge_rate(&self.discharge_times, sampling_rate)
    }
}

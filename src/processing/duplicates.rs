// src/processing/duplicates.rs
//! Duplicate motor unit resolution
//!
//! Two units are duplicates when a large share of their discharges coincide
//! within a short tolerance. Of each duplicate group the best-separated unit
//! survives.

use std::cmp::Ordering;

use tracing::debug;

use crate::config::{seconds_to_samples, DuplicateConfig};
use crate::model::MotorUnit;

/// Number of discharges of `a` matched to a discharge of `b` within `tolerance` samples
///
/// Both inputs must be sorted; each discharge is matched at most once.
pub fn coincidence_count(a: &[usize], b: &[usize], tolerance: usize) -> usize {
    let (mut i, mut j, mut matches) = (0, 0, 0);
    while i < a.len() && j < b.len() {
        if a[i].abs_diff(b[j]) <= tolerance {
            matches += 1;
            i += 1;
            j += 1;
        } else if a[i] < b[j] {
            i += 1;
        } else {
            j += 1;
        }
    }
    matches
}

/// Coincidences relative to the smaller discharge set, 0 if either is empty
pub fn coincidence_ratio(a: &[usize], b: &[usize], tolerance: usize) -> f64 {
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return 0.0;
    }
    coincidence_count(a, b, tolerance) as f64 / smaller as f64
}

/// Selects which units survive duplicate removal
#[derive(Debug, Clone)]
pub struct DuplicateResolver {
    tolerance: usize,
    threshold: f64,
}

impl DuplicateResolver {
    pub fn new(config: &DuplicateConfig, sampling_rate: f64) -> Self {
        Self {
            tolerance: seconds_to_samples(config.coincidence_tolerance_s, sampling_rate),
            threshold: config.duplicate_threshold,
        }
    }

    /// Coincidence tolerance in samples
    pub fn tolerance(&self) -> usize {
        self.tolerance
    }

    pub fn is_duplicate(&self, a: &MotorUnit, b: &MotorUnit) -> bool {
        coincidence_ratio(&a.discharge_times, &b.discharge_times, self.tolerance) > self.threshold
    }

    /// Indices of the units of one grid that survive, in original order
    pub fn resolve_within(&self, units: &[MotorUnit]) -> Vec<usize> {
        let refs: Vec<&MotorUnit> = units.iter().collect();
        self.resolve(&refs)
    }

    /// Positions in `units` (tagged with their grid) that survive across grids, in original order
    pub fn resolve_between(&self, units: &[(usize, &MotorUnit)]) -> Vec<usize> {
        let refs: Vec<&MotorUnit> = units.iter().map(|(_, unit)| *unit).collect();
        let kept = self.resolve(&refs);
        debug!(
            total = units.len(),
            kept = kept.len(),
            "resolved duplicates between grids"
        );
        kept
    }

    fn resolve(&self, units: &[&MotorUnit]) -> Vec<usize> {
        let mut ranking: Vec<usize> = (0..units.len()).collect();
        ranking.sort_by(|&a, &b| rank(units[a], units[b]).then(a.cmp(&b)));

        let mut kept: Vec<usize> = Vec::with_capacity(units.len());
        for candidate in ranking {
            let duplicate_of = kept
                .iter()
                .find(|&&survivor| self.is_duplicate(units[candidate], units[survivor]));
            match duplicate_of {
                Some(&survivor) => debug!(removed = candidate, survivor, "duplicate motor unit"),
                None => kept.push(candidate),
            }
        }

        kept.sort_unstable();
        kept
    }
}

/// Higher SIL first, then more discharges
fn rank(a: &MotorUnit, b: &MotorUnit) -> Ordering {
    b.sil
        .total_cmp(&a.sil)
        .then(b.discharge_count().cmp(&a.discharge_count()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    fn unit(times: Vec<usize>, sil: f64) -> MotorUnit {
        MotorUnit::from_parts(Array1::zeros(20_000), times, sil, Vec::new())
    }

    fn resolver() -> DuplicateResolver {
        DuplicateResolver::new(&DuplicateConfig::default(), 2000.0)
    }

    #[test]
    fn test_coincidence_count() {
        assert_eq!(coincidence_count(&[10, 20, 30], &[11, 19, 45], 2), 2);
        // Each discharge matched once
        assert_eq!(coincidence_count(&[10, 11], &[10], 2), 1);
        assert_eq!(coincidence_ratio(&[], &[1, 2], 2), 0.0);
    }

    #[test]
    fn test_higher_sil_survives() {
        let shared: Vec<usize> = (1..=40).map(|i| i * 400).collect();
        let mut a = shared.clone();
        a.extend((0..10).map(|i| 16_500 + i * 300));
        let mut b: Vec<usize> = shared.iter().map(|t| t + 3).collect();
        b.extend((0..10).map(|i| 16_650 + i * 300));

        let units = vec![unit(b, 0.71), unit(a, 0.92)];
        assert!(resolver().is_duplicate(&units[0], &units[1]));
        assert_eq!(resolver().resolve_within(&units), vec![1]);
    }

    #[test]
    fn test_tie_breaks_on_count_then_index() {
        let times: Vec<usize> = (1..20).map(|i| i * 500).collect();
        let mut longer = times.clone();
        longer.push(19_900);

        let units = vec![unit(times.clone(), 0.9), unit(longer, 0.9)];
        assert_eq!(resolver().resolve_within(&units), vec![1]);

        let units = vec![unit(times.clone(), 0.9), unit(times, 0.9)];
        assert_eq!(resolver().resolve_within(&units), vec![0]);
    }

    #[test]
    fn test_distinct_units_are_kept() {
        let units = vec![
            unit((1..20).map(|i| i * 500).collect(), 0.9),
            unit((1..20).map(|i| i * 500 + 250).collect(), 0.8),
            unit(Vec::new(), 0.0),
        ];
        assert_eq!(resolver().resolve_within(&units), vec![0, 1, 2]);
    }

    #[test]
    fn test_between_grids() {
        let times: Vec<usize> = (1..30).map(|i| i * 600).collect();
        let a = unit(times.clone(), 0.85);
        let b = unit(times.iter().map(|t| t + 10).collect(), 0.95);
        let c = unit((1..30).map(|i| i * 600 + 300).collect(), 0.9);

        let tagged = vec![(0, &a), (0, &c), (1, &b)];
        assert_eq!(resolver().resolve_between(&tagged), vec![1, 2]);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let times: Vec<usize> = (1..30).map(|i| i * 600).collect();
        let units = vec![
            unit(times.clone(), 0.8),
            unit(times.iter().map(|t| t + 5).collect(), 0.9),
            unit((1..30).map(|i| i * 600 + 300).collect(), 0.7),
        ];
        let first = resolver().resolve_within(&units);
        let survivors: Vec<MotorUnit> = first.iter().map(|&i| units[i].clone()).collect();
        let second = resolver().resolve_within(&survivors);
        assert_eq!(second, (0..survivors.len()).collect::<Vec<_>>());
    }
}

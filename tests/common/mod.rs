// tests/common/mod.rs
//! Synthetic HDEMG recordings with known motor unit firings

#![allow(dead_code)]

use hdemg_core::config::EngineConfig;
use hdemg_core::model::{MotorUnit, Recording};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const SAMPLING_RATE: f64 = 2000.0;

/// Recording plus the planted discharge times of each unit
pub struct SyntheticGrid {
    pub data: Array2<f64>,
    pub firings: Vec<Vec<usize>>,
}

impl SyntheticGrid {
    pub fn recording(&self) -> Recording {
        Recording::single_grid(self.data.clone(), SAMPLING_RATE).expect("valid synthetic recording")
    }

    pub fn samples(&self) -> usize {
        self.data.ncols()
    }
}

/// `units` motor units with distinct waveforms firing at 12-20 Hz over light noise
pub fn synthetic_grid(channels: usize, samples: usize, units: usize, seed: u64) -> SyntheticGrid {
    let mut rng = StdRng::seed_from_u64(seed);
    let shape = [0.2, 0.7, 1.0, 0.4, -0.3, -0.5, -0.2, -0.05];

    let mut data = Array2::from_shape_fn((channels, samples), |_| rng.gen_range(-0.02..0.02));
    let mut firings = Vec::with_capacity(units);

    for unit in 0..units {
        let gains: Vec<f64> = (0..channels).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let base_interval = 100 + 35 * unit;

        let mut times = Vec::new();
        let mut t = 20 + rng.gen_range(0..50);
        while t + shape.len() < samples {
            times.push(t);
            t += base_interval + rng.gen_range(0..15);
        }

        for &f in &times {
            for (c, gain) in gains.iter().enumerate() {
                for (k, v) in shape.iter().enumerate() {
                    data[[c, f + k]] += gain * v;
                }
            }
        }
        firings.push(times);
    }

    SyntheticGrid { data, firings }
}

/// Configuration with a small extension factor so tests stay fast
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.extension.max_factor = 8;
    config.separation.iterations = 6;
    config
}

/// Unit carrying a subset of the planted firings and a flat pulse train
pub fn seeded_unit(samples: usize, firings: &[usize], keep_every: usize) -> MotorUnit {
    let kept: Vec<usize> = firings
        .iter()
        .enumerate()
        .filter(|(i, _)| i % keep_every != 0)
        .map(|(_, &t)| t)
        .collect();
    MotorUnit::new(Array1::zeros(samples), kept)
}

/// Share of `planted` discharges found in `found` within `tolerance` samples
pub fn recovery_ratio(found: &[usize], planted: &[usize], tolerance: usize) -> f64 {
    if planted.is_empty() {
        return 0.0;
    }
    let hits = planted
        .iter()
        .filter(|&&p| found.iter().any(|&f| f.abs_diff(p) <= tolerance))
        .count();
    hits as f64 / planted.len() as f64
}

/// Discharge times strictly increasing and inside the pulse train
pub fn assert_unit_invariants(unit: &MotorUnit, samples: usize) {
    assert_eq!(unit.len(), samples);
    assert!(unit.discharge_times.windows(2).all(|w| w[0] < w[1]));
    assert!(unit.discharge_times.iter().all(|&t| t < samples));
    assert!((0.0..=1.0).contains(&unit.sil));
    if unit.discharge_count() < 3 {
        assert_eq!(unit.sil, 0.0);
    }
}

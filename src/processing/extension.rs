// src/processing/extension.rs
//! Time-delay embedding of a channel set

use ndarray::{s, Array2, ArrayView2, Axis};

use crate::config::constants::extension::MIN_EXTENSION_FACTOR;
use crate::error::{DecompError, DecompResult};

/// Extend a channel matrix with `factor` time-shifted copies
///
/// Row block `r` holds the original channels delayed by `r` samples, so the
/// output has `C·R` rows and `N + R − 1` columns with zeros before each
/// block's first sample.
pub fn extend(channels: ArrayView2<f64>, factor: usize) -> DecompResult<Array2<f64>> {
    let (channel_count, sample_count) = channels.dim();
    if channel_count == 0 || sample_count == 0 {
        return Err(DecompError::invalid_shape(
            "channel matrix",
            format!("{} channels x {} samples", channel_count, sample_count),
        ));
    }
    if factor == 0 {
        return Err(DecompError::invalid_shape("extension factor", "must be at least 1"));
    }

    let mut extended = Array2::zeros((channel_count * factor, sample_count + factor - 1));
    for delay in 0..factor {
        extended
            .slice_mut(s![
                delay * channel_count..(delay + 1) * channel_count,
                delay..delay + sample_count
            ])
            .assign(&channels);
    }
    Ok(extended)
}

/// Extension factor that brings `channel_count` close to the target number of extended channels
pub fn extension_factor(channel_count: usize, target_extended_channels: usize, max_factor: usize) -> usize {
    if channel_count == 0 {
        return MIN_EXTENSION_FACTOR;
    }
    let factor = (target_extended_channels as f64 / channel_count as f64).round() as usize;
    factor.clamp(MIN_EXTENSION_FACTOR, max_factor.max(MIN_EXTENSION_FACTOR))
}

/// Remove each channel's mean
pub fn demean(channels: ArrayView2<f64>) -> Array2<f64> {
    let mut centered = channels.to_owned();
    if let Some(means) = channels.mean_axis(Axis(1)) {
        for (mut row, mean) in centered.rows_mut().into_iter().zip(means.iter()) {
            row -= *mean;
        }
    }
    centered
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_extended_shape() {
        let channels = Array2::<f64>::ones((4, 10_000));
        let extended = extend(channels.view(), 4).unwrap();
        assert_eq!(extended.dim(), (16, 10_003));
    }

    #[test]
    fn test_blocks_are_delayed_copies() {
        let channels = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let extended = extend(channels.view(), 3).unwrap();

        assert_eq!(extended.row(0).to_vec(), vec![1.0, 2.0, 3.0, 0.0, 0.0]);
        assert_eq!(extended.row(1).to_vec(), vec![4.0, 5.0, 6.0, 0.0, 0.0]);
        assert_eq!(extended.row(2).to_vec(), vec![0.0, 1.0, 2.0, 3.0, 0.0]);
        assert_eq!(extended.row(5).to_vec(), vec![0.0, 0.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_factor_one_is_identity() {
        let channels = array![[1.0, -2.0], [0.5, 3.0]];
        assert_eq!(extend(channels.view(), 1).unwrap(), channels);
    }

    #[test]
    fn test_invalid_shapes() {
        assert!(matches!(
            extend(Array2::<f64>::zeros((0, 10)).view(), 2),
            Err(DecompError::InvalidShape { .. })
        ));
        assert!(extend(Array2::<f64>::zeros((3, 0)).view(), 2).is_err());
        assert!(extend(Array2::<f64>::zeros((3, 5)).view(), 0).is_err());
    }

    #[test]
    fn test_extension_factor() {
        assert_eq!(extension_factor(64, 1000, 25), 16);
        assert_eq!(extension_factor(4, 1000, 25), 25);
        assert_eq!(extension_factor(2000, 1000, 25), 1);
    }

    #[test]
    fn test_demean() {
        let channels = array![[1.0, 3.0], [10.0, 10.0]];
        assert_eq!(demean(channels.view()), array![[-1.0, 1.0], [0.0, 0.0]]);
    }
}

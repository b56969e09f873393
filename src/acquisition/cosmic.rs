//! Cosmic-ray rejection across an accumulation group.
//!
//! For every pixel the filter computes the mean across the batch and a spread
//! estimate, builds the acceptance band `[mean - k*spread, mean + k*spread]` and masks
//! the values of each frame that fall outside it. The aggregate frame is the mean of
//! the values that survive.
//!
//! Two spread estimators exist. [`RejectionStatistic::SquaredDeviation`] is the
//! standard deviation of the squared deviations from the mean, which is what
//! existing acquisition data was processed with; it scales with the square of the
//! signal, so only spikes that are small in absolute counts get rejected.
//! [`RejectionStatistic::StandardDeviation`] is the conventional population standard
//! deviation.
//!
//! NaN inputs count as missing: they are left out of the statistics and reported as
//! masked.

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, DaqError};
use crate::hardware::Frame;

/// Default rejection coefficient `k`.
pub const DEFAULT_COEFFICIENT: f64 = 2.2;

/// Spread estimator used for the acceptance band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionStatistic {
    /// Standard deviation of `(x - mean)^2`
    #[default]
    SquaredDeviation,
    /// Standard deviation of `x`
    StandardDeviation,
}

/// Result of filtering one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct CosmicRejection {
    /// Per-pixel mean of the accepted values
    pub aggregate: Frame,
    /// `mask[frame][pixel]` is true where the value was excluded
    pub mask: Vec<Vec<bool>>,
    /// Total number of excluded values
    pub rejected: usize,
    /// Pixels where every value fell outside the band; these keep the plain mean
    pub fully_rejected_pixels: usize,
}

impl CosmicRejection {
    /// Whether `pixel` of frame `frame` was excluded.
    pub fn is_masked(&self, frame: usize, pixel: usize) -> bool {
        self.mask
            .get(frame)
            .and_then(|m| m.get(pixel))
            .copied()
            .unwrap_or(false)
    }
}

/// Outlier filter for accumulation groups.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CosmicRejectionFilter {
    required_frames: usize,
    coefficient: f64,
    statistic: RejectionStatistic,
}

impl CosmicRejectionFilter {
    /// Filter expecting at least `required_frames` per batch.
    pub fn new(required_frames: usize, coefficient: f64) -> Self {
        Self {
            required_frames,
            coefficient,
            statistic: RejectionStatistic::default(),
        }
    }

    /// Choose the spread estimator.
    pub fn with_statistic(mut self, statistic: RejectionStatistic) -> Self {
        self.statistic = statistic;
        self
    }

    /// Filter a batch of identically shaped frames.
    ///
    /// # Errors
    /// - [`DaqError::InsufficientData`] when the batch is smaller than the required size
    /// - [`DaqError::Processing`] when the batch is empty or shapes differ
    pub fn apply(&self, frames: &[Frame]) -> AppResult<CosmicRejection> {
        if frames.len() < self.required_frames {
            return Err(DaqError::InsufficientData {
                required: self.required_frames,
                available: frames.len(),
            });
        }
        let first = frames
            .first()
            .ok_or_else(|| DaqError::Processing("cosmic rejection on an empty batch".into()))?;
        let shape = first.shape();
        if let Some(odd) = frames.iter().find(|f| f.shape() != shape || f.len() != first.len()) {
            return Err(DaqError::Processing(format!(
                "frame shape {:?} differs from {:?}",
                odd.shape(),
                shape
            )));
        }

        let pixels = first.len();
        let mut mask = vec![vec![false; pixels]; frames.len()];
        let mut aggregate = Vec::with_capacity(pixels);
        let mut rejected = 0;
        let mut fully_rejected_pixels = 0;
        let mut column = Vec::with_capacity(frames.len());

        for pixel in 0..pixels {
            column.clear();
            column.extend(frames.iter().map(|f| f.data[pixel]));

            let Some(mean) = nan_mean(column.iter().copied()) else {
                for frame_mask in mask.iter_mut() {
                    frame_mask[pixel] = true;
                }
                rejected += frames.len();
                fully_rejected_pixels += 1;
                aggregate.push(f64::NAN);
                continue;
            };
            let half_width = self.coefficient * self.spread(&column, mean);
            let tolerance = 8.0 * f64::EPSILON * mean.abs().max(1.0);

            let mut sum = 0.0;
            let mut kept = 0usize;
            for (index, &value) in column.iter().enumerate() {
                if !value.is_nan() && (value - mean).abs() <= half_width + tolerance {
                    sum += value;
                    kept += 1;
                } else {
                    mask[index][pixel] = true;
                    rejected += 1;
                }
            }

            if kept == 0 {
                fully_rejected_pixels += 1;
                aggregate.push(mean);
            } else {
                aggregate.push(sum / kept as f64);
            }
        }

        Ok(CosmicRejection {
            aggregate: Frame {
                width: first.width,
                height: first.height,
                data: aggregate,
            },
            mask,
            rejected,
            fully_rejected_pixels,
        })
    }

    fn spread(&self, column: &[f64], mean: f64) -> f64 {
        let deviations = column.iter().filter(|v| !v.is_nan()).map(|v| v - mean);
        match self.statistic {
            RejectionStatistic::SquaredDeviation => {
                let squared: Vec<f64> = deviations.map(|d| d * d).collect();
                nan_std(&squared)
            }
            RejectionStatistic::StandardDeviation => {
                let values: Vec<f64> = deviations.collect();
                nan_std(&values)
            }
        }
    }
}

fn nan_mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Population standard deviation.
fn nan_std(values: &[f64]) -> f64 {
    let Some(mean) = nan_mean(values.iter().copied()) else {
        return 0.0;
    };
    let (sum, count) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, n), v| (s + (v - mean).powi(2), n + 1));
    (sum / count as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_batch(count: usize, value: f64) -> Vec<Frame> {
        (0..count).map(|_| Frame::filled(5, 2, value)).collect()
    }

    fn batch_with_spike(count: usize, base: f64, spike: f64) -> Vec<Frame> {
        let mut frames = constant_batch(count, base);
        frames[2].data[3] += spike;
        frames
    }

    #[test]
    fn identical_frames_pass_untouched() {
        let filter = CosmicRejectionFilter::new(4, DEFAULT_COEFFICIENT);
        let result = filter.apply(&constant_batch(4, 100.0)).unwrap();
        assert_eq!(result.rejected, 0);
        assert_eq!(result.fully_rejected_pixels, 0);
        assert!(result.aggregate.data.iter().all(|&v| v == 100.0));
        assert_eq!(result.aggregate.shape(), (5, 2));
    }

    #[test]
    fn identical_non_representable_values_are_not_masked() {
        let filter = CosmicRejectionFilter::new(3, DEFAULT_COEFFICIENT);
        let result = filter.apply(&constant_batch(3, 0.1)).unwrap();
        assert_eq!(result.rejected, 0);
        assert!(result.aggregate.data.iter().all(|&v| (v - 0.1).abs() < 1e-12));
    }

    #[test]
    fn spike_excluded_with_standard_deviation() {
        let filter = CosmicRejectionFilter::new(8, DEFAULT_COEFFICIENT)
            .with_statistic(RejectionStatistic::StandardDeviation);
        let result = filter.apply(&batch_with_spike(8, 100.0, 10.0)).unwrap();

        assert!(result.is_masked(2, 3));
        assert_eq!(result.rejected, 1);
        for frame in [0, 1, 3, 4, 5, 6, 7] {
            assert!(!result.is_masked(frame, 3));
        }
        assert!((result.aggregate.data[3] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn spike_excluded_with_squared_deviation() {
        let filter = CosmicRejectionFilter::new(8, DEFAULT_COEFFICIENT);
        let result = filter.apply(&batch_with_spike(8, 100.0, 1.0)).unwrap();

        assert!(result.is_masked(2, 3));
        assert_eq!(result.rejected, 1);
        assert!((result.aggregate.data[3] - 100.0).abs() < 1e-9);
        assert_eq!(result.aggregate.data[0], 100.0);
    }

    #[test]
    fn squared_deviation_band_grows_with_amplitude() {
        // A large spike widens the squared-deviation band enough to survive.
        let filter = CosmicRejectionFilter::new(8, DEFAULT_COEFFICIENT);
        let result = filter.apply(&batch_with_spike(8, 100.0, 10.0)).unwrap();
        assert!(!result.is_masked(2, 3));
    }

    #[test]
    fn two_distinct_values_fall_back_to_mean() {
        let filter = CosmicRejectionFilter::new(2, DEFAULT_COEFFICIENT);
        let frames = vec![Frame::spectrum(vec![0.0]), Frame::spectrum(vec![2.0])];
        let result = filter.apply(&frames).unwrap();
        assert_eq!(result.fully_rejected_pixels, 1);
        assert_eq!(result.aggregate.data[0], 1.0);
    }

    #[test]
    fn nan_values_are_masked_and_ignored() {
        let filter = CosmicRejectionFilter::new(3, DEFAULT_COEFFICIENT);
        let frames = vec![
            Frame::spectrum(vec![5.0, f64::NAN]),
            Frame::spectrum(vec![5.0, f64::NAN]),
            Frame::spectrum(vec![f64::NAN, f64::NAN]),
        ];
        let result = filter.apply(&frames).unwrap();
        assert!(result.is_masked(2, 0));
        assert_eq!(result.aggregate.data[0], 5.0);
        assert!(result.aggregate.data[1].is_nan());
    }

    #[test]
    fn too_few_frames_is_insufficient_data() {
        let filter = CosmicRejectionFilter::new(4, DEFAULT_COEFFICIENT);
        let err = filter.apply(&constant_batch(3, 1.0)).unwrap_err();
        assert!(matches!(
            err,
            DaqError::InsufficientData {
                required: 4,
                available: 3
            }
        ));
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let filter = CosmicRejectionFilter::new(2, DEFAULT_COEFFICIENT);
        let frames = vec![Frame::filled(4, 1, 1.0), Frame::filled(2, 2, 1.0)];
        assert!(matches!(filter.apply(&frames), Err(DaqError::Processing(_))));
    }
}

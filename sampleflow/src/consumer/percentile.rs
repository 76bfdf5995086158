//! Bounded memory percentile estimation.
//!
//! Values are folded into a DDSketch. Memory does not grow with the number of
//! values and every percentile is within 1% relative error of the exact one.

use sketches_ddsketch::{Config, DDSketch};

/// Streaming percentile estimator.
pub struct PercentileEstimator {
    sketch: DDSketch,
}

impl std::fmt::Debug for PercentileEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PercentileEstimator")
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

impl Default for PercentileEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl PercentileEstimator {
    /// An empty estimator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sketch: DDSketch::new(Config::defaults()),
        }
    }

    /// Fold `value` in. Values that are not finite are ignored.
    pub fn add(&mut self, value: f64) {
        if value.is_finite() {
            self.sketch.add(value);
        }
    }

    /// Number of values folded in.
    #[must_use]
    pub fn count(&self) -> u64 {
        u64::try_from(self.sketch.count()).unwrap_or(u64::MAX)
    }

    /// Estimated value below which `percent` percent of the values fall.
    ///
    /// `percent` is clamped to `0..=100`. Returns 0 when empty.
    #[must_use]
    pub fn percentile(&self, percent: f64) -> f64 {
        if self.count() == 0 || percent.is_nan() {
            return 0.0;
        }
        let quantile = (percent / 100.0).clamp(0.0, 1.0);
        self.sketch.quantile(quantile).ok().flatten().unwrap_or(0.0)
    }

    /// Estimated median.
    #[must_use]
    pub fn median(&self) -> f64 {
        self.percentile(50.0)
    }
}

//! Request statistics per sampler label.
//!
//! Every bucket is a [`Calculator`], a running aggregate plus a percentile
//! sketch. Nothing per sample is retained, so the table covers arbitrarily
//! long logs in bounded memory.

use super::{Error, Summary, percentile::PercentileEstimator, ratio};
use crate::{result::ResultData, sample::Sample};

/// Percentile columns of the table unless configured otherwise.
pub const DEFAULT_PERCENTILES: [f64; 3] = [90.0, 95.0, 99.0];

/// Running aggregate of elapsed times, errors and transfer volume.
///
/// A sample whose `SampleCount` is N stands for N operations of equal
/// duration, `elapsed / N` each. Min, max, mean and deviation are over
/// operations, not rows. Percentiles are over rows, each row contributing
/// its per-operation duration once.
#[derive(Debug)]
pub struct Calculator {
    count: u64,
    errors: u64,
    sum: f64,
    sum_of_squares: f64,
    min: f64,
    max: f64,
    bytes: i64,
    sent_bytes: i64,
    start_time: i64,
    end_time: i64,
    percentiles: PercentileEstimator,
}

impl Default for Calculator {
    fn default() -> Self {
        Self {
            count: 0,
            errors: 0,
            sum: 0.0,
            sum_of_squares: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            bytes: 0,
            sent_bytes: 0,
            start_time: i64::MAX,
            end_time: i64::MIN,
            percentiles: PercentileEstimator::new(),
        }
    }
}

impl Calculator {
    /// An empty calculator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `sample` in.
    pub fn add_sample(&mut self, sample: &Sample) {
        self.bytes = self.bytes.saturating_add(sample.bytes());
        self.sent_bytes = self.sent_bytes.saturating_add(sample.sent_bytes());
        self.add_value(sample.elapsed_time(), sample.sample_count());
        self.errors = self
            .errors
            .saturating_add(u64::try_from(sample.error_count()).unwrap_or(0));
        self.start_time = self.start_time.min(sample.start_time());
        self.end_time = self.end_time.max(sample.end_time());
    }

    /// Fold in `elapsed` milliseconds spread over `sample_count` operations.
    #[allow(clippy::cast_precision_loss)]
    pub fn add_value(&mut self, elapsed: i64, sample_count: i64) {
        let sample_count = sample_count.max(1);
        let elapsed = elapsed as f64;
        let per_operation = elapsed / sample_count as f64;

        self.count = self
            .count
            .saturating_add(u64::try_from(sample_count).unwrap_or(1));
        self.sum += elapsed;
        self.min = self.min.min(per_operation);
        self.max = self.max.max(per_operation);
        self.percentiles.add(per_operation);
        // N operations of elapsed/N each add N * (elapsed/N)^2.
        self.sum_of_squares += elapsed * per_operation;
    }

    /// Number of operations.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Number of failed operations.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors
    }

    /// Failed operations as a fraction of all, 0 when empty.
    #[must_use]
    pub fn error_percentage(&self) -> f64 {
        ratio(self.errors, self.count)
    }

    /// Mean elapsed time per operation, 0 when empty.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Smallest elapsed time per operation, 0 when empty.
    #[must_use]
    pub fn min(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.min }
    }

    /// Largest elapsed time per operation, 0 when empty.
    #[must_use]
    pub fn max(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.max }
    }

    /// Estimated elapsed time per operation below which `percent` percent of
    /// the rows fall, 0 when empty.
    #[must_use]
    pub fn percentile(&self, percent: f64) -> f64 {
        self.percentiles.percentile(percent)
    }

    /// Estimated median elapsed time per operation, 0 when empty.
    #[must_use]
    pub fn median(&self) -> f64 {
        self.percentiles.median()
    }

    /// Population standard deviation of elapsed time per operation.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn standard_deviation(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mean = self.mean();
        (self.sum_of_squares / self.count as f64 - mean * mean)
            .max(0.0)
            .sqrt()
    }

    /// Wall-clock span covered by the samples in milliseconds.
    #[must_use]
    pub fn elapsed_span(&self) -> i64 {
        if self.count == 0 {
            0
        } else {
            self.end_time.saturating_sub(self.start_time).max(0)
        }
    }

    /// Operations per second over the span.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn throughput(&self) -> f64 {
        self.per_second(self.count as f64)
    }

    /// Received bytes per second over the span.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn bytes_per_second(&self) -> f64 {
        self.per_second(self.bytes as f64)
    }

    /// Sent bytes per second over the span.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn sent_bytes_per_second(&self) -> f64 {
        self.per_second(self.sent_bytes as f64)
    }

    #[allow(clippy::cast_precision_loss)]
    fn per_second(&self, amount: f64) -> f64 {
        let span = self.elapsed_span();
        if span == 0 {
            0.0
        } else {
            amount / span as f64 * 1_000.0
        }
    }
}

/// The statistics [`Summary`].
///
/// Columns are the label, counts and error share, average, min, max and
/// median, one column per configured percentile, then deviation and rates.
#[derive(Debug, Clone)]
pub struct Statistics {
    percentiles: Vec<f64>,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new(DEFAULT_PERCENTILES.to_vec())
    }
}

impl Statistics {
    /// A table with one column per entry of `percentiles`, in order.
    #[must_use]
    pub fn new(percentiles: Vec<f64>) -> Self {
        Self { percentiles }
    }

    /// The percentile columns.
    #[must_use]
    pub fn percentiles(&self) -> &[f64] {
        &self.percentiles
    }
}

impl Summary for Statistics {
    type Data = Calculator;

    fn create_data(&self, _key: Option<&str>) -> Calculator {
        Calculator::new()
    }

    fn update_data(&self, data: &mut Calculator, sample: &Sample) -> Result<(), Error> {
        data.add_sample(sample);
        Ok(())
    }

    fn titles(&self) -> Vec<String> {
        let head = ["Label", "#Samples", "FAIL", "Error %", "Average", "Min", "Max", "Median"];
        let tail = ["Std. Dev.", "Transactions/s", "Received", "Sent"];
        head.into_iter()
            .map(str::to_string)
            .chain(self.percentiles.iter().map(|p| format!("{p}th pct")))
            .chain(tail.into_iter().map(str::to_string))
            .collect()
    }

    fn data_result(&self, key: Option<&str>, data: &Calculator, _overall: &Calculator) -> Vec<ResultData> {
        let mut row = vec![
            ResultData::value(key.unwrap_or("Total")),
            ResultData::value(data.count()),
            ResultData::value(data.errors()),
            ResultData::value(data.error_percentage() * 100.0),
            ResultData::value(data.mean()),
            ResultData::value(data.min()),
            ResultData::value(data.max()),
            ResultData::value(data.median()),
        ];
        row.extend(self.percentiles.iter().map(|p| ResultData::value(data.percentile(*p))));
        row.extend([
            ResultData::value(data.standard_deviation()),
            ResultData::value(data.throughput()),
            ResultData::value(data.bytes_per_second() / 1_024.0),
            ResultData::value(data.sent_bytes_per_second() / 1_024.0),
        ]);
        row
    }
}

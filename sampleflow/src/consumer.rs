//! Sample consumers
//!
//! A consumer folds the samples of one pass into a [`MapResultData`]. The
//! pipeline drives every consumer through the same lifecycle: [`initialize`]
//! once, [`consume`] once per sample in row order, [`finalize`] once at the
//! end of input.
//!
//! Most consumers are tables: rows keyed by some property of the sample plus
//! an overall row. Those implement [`Summary`] and are driven by the generic
//! [`SummaryConsumer`], which owns the per-key buckets and lays out the
//! emitted table.
//!
//! [`initialize`]: Consumer::initialize
//! [`consume`]: Consumer::consume
//! [`finalize`]: Consumer::finalize

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::{
    convert,
    result::{ListResultData, MapResultData, ResultData},
    sample::Sample,
};

pub mod aggregate;
pub mod apdex;
pub mod errors;
pub mod filter;
pub mod graph;
pub mod percentile;
pub mod requests;
pub mod statistics;
pub mod top_errors;

/// Key of the column titles in a summary table.
pub const TITLES: &str = "titles";
/// Key of the per-key rows in a summary table.
pub const ITEMS: &str = "items";
/// Key of the overall row in a summary table.
pub const OVERALL: &str = "overall";
/// Key of a row's controller flag.
pub const IS_CONTROLLER: &str = "isController";
/// Key of a row's cells.
pub const DATA: &str = "data";
/// Key of the flag telling renderers whether rows carry a controller flag.
pub const SUPPORTS_CONTROLLERS_DISCRIMINATION: &str = "supportsControllersDiscrimination";

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Consumer`] implementations.
pub enum Error {
    /// See [`crate::convert::Error`] for details.
    #[error(transparent)]
    Convert(#[from] convert::Error),
    /// See [`regex::Error`] for details.
    #[error(transparent)]
    Regex(#[from] regex::Error),
    /// Any other consumer specific failure.
    #[error("{0}")]
    Custom(String),
}

/// A stateful aggregator over the samples of one pass.
pub trait Consumer: std::fmt::Debug + Send {
    /// Name the consumer's output is registered under.
    fn name(&self) -> &str;

    /// Reset all state. Called once before the first sample of a pass.
    ///
    /// # Errors
    ///
    /// Implementation specific.
    fn initialize(&mut self) -> Result<(), Error>;

    /// Fold `sample` into the running state.
    ///
    /// # Errors
    ///
    /// Implementation specific. Malformed field values are not errors, they
    /// read back as defaults.
    fn consume(&mut self, sample: &Sample) -> Result<(), Error>;

    /// Emit the result of the pass.
    ///
    /// # Errors
    ///
    /// Implementation specific.
    fn finalize(&mut self) -> Result<MapResultData, Error>;
}

/// The per-table behaviour of a [`SummaryConsumer`].
///
/// Implementors describe one bucket type and how samples fold into it. Key
/// management, the overall bucket and the table layout are handled by
/// [`SummaryConsumer`].
pub trait Summary: std::fmt::Debug + Send {
    /// The aggregate bucket kept per key.
    type Data: std::fmt::Debug + Send;

    /// Build an empty bucket. `key` is `None` for the overall bucket.
    fn create_data(&self, key: Option<&str>) -> Self::Data;

    /// The grouping key of `sample`, `None` to fold it into the overall
    /// bucket only.
    fn key_from_sample(&self, sample: &Sample) -> Option<String> {
        Some(sample.label().to_string())
    }

    /// Fold `sample` into `data`.
    ///
    /// # Errors
    ///
    /// Implementation specific.
    fn update_data(&self, data: &mut Self::Data, sample: &Sample) -> Result<(), Error>;

    /// Column titles of the table. Fixed before any data is seen.
    fn titles(&self) -> Vec<String>;

    /// Cells of the row for `key`, `None` being the overall row. Must hold as
    /// many cells as [`Summary::titles`] has entries. `overall` is the
    /// overall bucket, for rows expressed relative to the totals.
    fn data_result(&self, key: Option<&str>, data: &Self::Data, overall: &Self::Data) -> Vec<ResultData>;

    /// Whether rows carry a meaningful controller flag.
    fn supports_controllers_discrimination(&self) -> bool {
        true
    }
}

#[derive(Debug)]
struct Bucket<D> {
    key: String,
    is_controller: bool,
    data: D,
}

/// Drives a [`Summary`] over a pass.
///
/// Buckets are created lazily, on the first sample of their key, and emitted
/// in first-seen order followed by the overall row.
#[derive(Debug)]
pub struct SummaryConsumer<S: Summary> {
    name: String,
    summary: S,
    buckets: Vec<Bucket<S::Data>>,
    index: FxHashMap<String, usize>,
    overall: S::Data,
}

impl<S: Summary> SummaryConsumer<S> {
    /// Create a consumer registered as `name`.
    pub fn new(name: impl Into<String>, summary: S) -> Self {
        let overall = summary.create_data(None);
        Self {
            name: name.into(),
            summary,
            buckets: Vec::new(),
            index: FxHashMap::default(),
            overall,
        }
    }

    /// The table behaviour.
    #[must_use]
    pub fn summary(&self) -> &S {
        &self.summary
    }

    /// The bucket of `key`, if a sample with that key was seen.
    #[must_use]
    pub fn data(&self, key: &str) -> Option<&S::Data> {
        self.index.get(key).map(|&idx| &self.buckets[idx].data)
    }

    /// The overall bucket.
    #[must_use]
    pub fn overall(&self) -> &S::Data {
        &self.overall
    }

    /// Keys in first-seen order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.buckets.iter().map(|b| b.key.as_str())
    }

    fn row(&self, key: Option<&str>, is_controller: bool, data: &S::Data) -> MapResultData {
        let cells = self.summary.data_result(key, data, &self.overall);
        debug_assert_eq!(cells.len(), self.summary.titles().len());
        let mut row = MapResultData::new();
        row.put(IS_CONTROLLER, ResultData::value(is_controller));
        row.put(DATA, cells.into_iter().collect::<ListResultData>());
        row
    }
}

impl<S: Summary> Consumer for SummaryConsumer<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self) -> Result<(), Error> {
        self.buckets.clear();
        self.index.clear();
        self.overall = self.summary.create_data(None);
        Ok(())
    }

    fn consume(&mut self, sample: &Sample) -> Result<(), Error> {
        if let Some(key) = self.summary.key_from_sample(sample) {
            let idx = match self.index.get(&key) {
                Some(&idx) => idx,
                None => {
                    trace!(consumer = %self.name, key = %key, "New summary key");
                    let data = self.summary.create_data(Some(&key));
                    self.buckets.push(Bucket {
                        key: key.clone(),
                        is_controller: sample.is_controller(),
                        data,
                    });
                    self.index.insert(key, self.buckets.len() - 1);
                    self.buckets.len() - 1
                }
            };
            self.summary
                .update_data(&mut self.buckets[idx].data, sample)?;
        }
        self.summary.update_data(&mut self.overall, sample)
    }

    fn finalize(&mut self) -> Result<MapResultData, Error> {
        let mut result = MapResultData::new();
        result.put(
            SUPPORTS_CONTROLLERS_DISCRIMINATION,
            ResultData::value(self.summary.supports_controllers_discrimination()),
        );
        result.put(
            TITLES,
            self.summary
                .titles()
                .into_iter()
                .map(ResultData::value)
                .collect::<ListResultData>(),
        );
        let items: ListResultData = self
            .buckets
            .iter()
            .map(|b| ResultData::from(self.row(Some(&b.key), b.is_controller, &b.data)))
            .collect();
        result.put(ITEMS, items);
        result.put(OVERALL, self.row(None, false, &self.overall));
        Ok(result)
    }
}

/// Divide, yielding 0 for an empty denominator.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Readers over emitted summary tables.

    use crate::result::{MapResultData, ResultData, Value};

    use super::{DATA, ITEMS, OVERALL};

    /// Cells of the row whose first cell is `key`, or of the overall row for
    /// `None`.
    pub(crate) fn row(result: &MapResultData, key_column: usize, key: Option<&str>) -> Vec<Value> {
        let cells = |row: &ResultData| -> Vec<Value> {
            row.as_map()
                .and_then(|m| m.get(DATA))
                .and_then(ResultData::as_list)
                .map(|l| {
                    l.iter()
                        .map(|c| c.and_then(ResultData::as_value).cloned().unwrap_or(Value::Str(String::new())))
                        .collect()
                })
                .unwrap_or_default()
        };
        match key {
            None => cells(result.get(OVERALL).expect("overall row")),
            Some(key) => result
                .get(ITEMS)
                .and_then(ResultData::as_list)
                .expect("items")
                .iter()
                .flatten()
                .map(cells)
                .find(|c| c.get(key_column).and_then(Value::as_str) == Some(key))
                .expect("row for key"),
        }
    }

    pub(crate) fn num(value: &Value) -> f64 {
        value.as_f64().expect("numeric cell")
    }
}

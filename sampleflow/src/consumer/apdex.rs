//! Apdex scores per sampler label.
//!
//! A sample is satisfied when its elapsed time is at most the satisfied
//! threshold, tolerated when it is above that but at most the tolerated
//! threshold, frustrated otherwise. Failed samples count toward the total.
//! The score is `(satisfied + tolerated / 2) / total`.

use regex::Regex;
use tracing::debug;

use super::{Error, Summary};
use crate::{result::ResultData, sample::Sample};

/// A pair of thresholds in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Elapsed time at or under which a sample is satisfied
    pub satisfied: i64,
    /// Elapsed time at or under which a sample is tolerated
    pub tolerated: i64,
}

impl Thresholds {
    /// Create a threshold pair. Ordering is not checked here, see
    /// [`crate::config`].
    #[must_use]
    pub fn new(satisfied: i64, tolerated: i64) -> Self {
        Self {
            satisfied,
            tolerated,
        }
    }
}

/// Picks thresholds for a label.
///
/// Rules are tried in order. A rule applies when its pattern matches the
/// whole label. Labels matching no rule get the default pair.
#[derive(Debug, Clone)]
pub struct ThresholdSelector {
    default: Thresholds,
    rules: Vec<(Regex, Thresholds)>,
}

impl ThresholdSelector {
    /// A selector that always answers `default`.
    #[must_use]
    pub fn new(default: Thresholds) -> Self {
        Self {
            default,
            rules: Vec::new(),
        }
    }

    /// Add a rule for labels matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Regex`] if `pattern` is not a valid regular
    /// expression.
    pub fn with_rule(mut self, pattern: &str, thresholds: Thresholds) -> Result<Self, Error> {
        let regex = Regex::new(&format!("^(?:{pattern})$"))?;
        self.rules.push((regex, thresholds));
        Ok(self)
    }

    /// The default pair.
    #[must_use]
    pub fn default_thresholds(&self) -> Thresholds {
        self.default
    }

    /// Thresholds for `label`.
    #[must_use]
    pub fn select(&self, label: &str) -> Thresholds {
        self.rules
            .iter()
            .find(|(regex, _)| regex.is_match(label))
            .map_or(self.default, |(_, t)| *t)
    }
}

/// Counters of one Apdex bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApdexData {
    /// Thresholds this bucket classifies against
    pub thresholds: Thresholds,
    /// Samples at or under the satisfied threshold
    pub satisfied: u64,
    /// Samples above the satisfied threshold, at or under the tolerated one
    pub tolerated: u64,
    /// Every sample
    pub total: u64,
}

impl ApdexData {
    /// An empty bucket.
    #[must_use]
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            satisfied: 0,
            tolerated: 0,
            total: 0,
        }
    }

    /// Classify one elapsed time.
    pub fn record(&mut self, elapsed: i64) {
        self.total += 1;
        if elapsed <= self.thresholds.satisfied {
            self.satisfied += 1;
        } else if elapsed <= self.thresholds.tolerated {
            self.tolerated += 1;
        }
    }

    /// The Apdex score, 0 for an empty bucket.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn score(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.satisfied as f64 + self.tolerated as f64 / 2.0) / self.total as f64
    }
}

/// The Apdex [`Summary`].
#[derive(Debug, Clone)]
pub struct Apdex {
    selector: ThresholdSelector,
}

impl Apdex {
    /// Create the summary.
    #[must_use]
    pub fn new(selector: ThresholdSelector) -> Self {
        Self { selector }
    }
}

impl Summary for Apdex {
    type Data = ApdexData;

    fn create_data(&self, key: Option<&str>) -> ApdexData {
        let thresholds = match key {
            Some(label) => self.selector.select(label),
            None => self.selector.default_thresholds(),
        };
        debug!(
            label = key.unwrap_or("<overall>"),
            satisfied = thresholds.satisfied,
            tolerated = thresholds.tolerated,
            "Apdex thresholds"
        );
        ApdexData::new(thresholds)
    }

    fn update_data(&self, data: &mut ApdexData, sample: &Sample) -> Result<(), Error> {
        data.record(sample.elapsed_time());
        Ok(())
    }

    fn titles(&self) -> Vec<String> {
        ["Apdex", "T (Toleration threshold)", "F (Frustration threshold)", "Label"]
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn data_result(&self, key: Option<&str>, data: &ApdexData, _overall: &ApdexData) -> Vec<ResultData> {
        vec![
            ResultData::value(data.score()),
            ResultData::value(data.thresholds.satisfied),
            ResultData::value(data.thresholds.tolerated),
            ResultData::value(key.unwrap_or("Total")),
        ]
    }
}

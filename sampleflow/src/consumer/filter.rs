//! Forward a subset of samples to an inner consumer.

use regex::Regex;

use super::{Consumer, Error};
use crate::{result::MapResultData, sample::Sample};

/// Which samples pass.
///
/// A sample passes when every configured condition holds. An empty filter
/// passes everything.
#[derive(Debug, Clone, Default)]
pub struct SampleFilter {
    label: Option<Regex>,
    exclude_controllers: bool,
}

impl SampleFilter {
    /// A filter passing everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only pass samples whose whole label matches `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Regex`] if `pattern` is not a valid regular
    /// expression.
    pub fn with_label(mut self, pattern: &str) -> Result<Self, Error> {
        self.label = Some(Regex::new(&format!("^(?:{pattern})$"))?);
        Ok(self)
    }

    /// Drop transaction controller samples.
    #[must_use]
    pub fn excluding_controllers(mut self) -> Self {
        self.exclude_controllers = true;
        self
    }

    /// Whether the filter passes everything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.label.is_none() && !self.exclude_controllers
    }

    /// Whether `sample` passes.
    #[must_use]
    pub fn matches(&self, sample: &Sample) -> bool {
        if self.exclude_controllers && sample.is_controller() {
            return false;
        }
        self.label
            .as_ref()
            .is_none_or(|regex| regex.is_match(sample.label()))
    }
}

/// Wraps a consumer, hiding the samples a [`SampleFilter`] rejects.
///
/// The wrapper is registered under the inner consumer's name.
#[derive(Debug)]
pub struct FilterConsumer {
    filter: SampleFilter,
    inner: Box<dyn Consumer>,
}

impl FilterConsumer {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(filter: SampleFilter, inner: Box<dyn Consumer>) -> Self {
        Self { filter, inner }
    }
}

impl Consumer for FilterConsumer {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn initialize(&mut self) -> Result<(), Error> {
        self.inner.initialize()
    }

    fn consume(&mut self, sample: &Sample) -> Result<(), Error> {
        if self.filter.matches(sample) {
            self.inner.consume(sample)
        } else {
            Ok(())
        }
    }

    fn finalize(&mut self) -> Result<MapResultData, Error> {
        self.inner.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::requests::{KO_PERCENT, RequestsSummary};
    use crate::result::{ResultData, Value};
    use crate::sample::test_support::{metadata, sample};

    #[test]
    fn label_must_match_whole() {
        let filter = SampleFilter::new().with_label("api/.*").expect("valid pattern");
        assert!(filter.matches(&sample(0, "api/users", 1, true)));
        assert!(!filter.matches(&sample(0, "web/api/users", 1, true)));
        assert!(!filter.is_empty());
    }

    #[test]
    fn controllers_can_be_excluded() {
        let controller = Sample::from_line(
            0,
            metadata(),
            "1,10,tx,200,Number of samples in transaction : 2,t,true,,0,0,2",
        );
        assert!(SampleFilter::new().matches(&controller));
        assert!(!SampleFilter::new().excluding_controllers().matches(&controller));
    }

    #[test]
    fn inner_sees_only_passing_samples() {
        let filter = SampleFilter::new().with_label("keep").expect("valid pattern");
        let mut consumer = FilterConsumer::new(filter, Box::new(RequestsSummary::new("requests")));
        assert_eq!(consumer.name(), "requests");
        consumer.initialize().expect("initialize");
        consumer.consume(&sample(0, "keep", 1, true)).expect("consume");
        consumer.consume(&sample(1, "drop", 1, false)).expect("consume");
        let result = consumer.finalize().expect("finalize");
        assert_eq!(
            result.get(KO_PERCENT).and_then(ResultData::as_value),
            Some(&Value::Float(0.0))
        );
    }
}

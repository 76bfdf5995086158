//! Overall share of failed and successful requests.

use tracing::debug;

use super::{Consumer, Error, ratio};
use crate::{
    result::{MapResultData, ResultData},
    sample::Sample,
};

/// Key of the failed share, a percentage.
pub const KO_PERCENT: &str = "KoPercent";
/// Key of the successful share, a percentage.
pub const OK_PERCENT: &str = "OkPercent";

/// Counts operations and failed operations across the whole pass.
///
/// A row stands for `SampleCount` operations of which `ErrorCount` failed.
#[derive(Debug)]
pub struct RequestsSummary {
    name: String,
    count: u64,
    errors: u64,
}

impl RequestsSummary {
    /// Create a consumer registered as `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            count: 0,
            errors: 0,
        }
    }
}

impl Consumer for RequestsSummary {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self) -> Result<(), Error> {
        self.count = 0;
        self.errors = 0;
        Ok(())
    }

    fn consume(&mut self, sample: &Sample) -> Result<(), Error> {
        let count = u64::try_from(sample.sample_count()).unwrap_or(1);
        let errors = u64::try_from(sample.error_count()).unwrap_or(0);
        self.count = self.count.saturating_add(count);
        self.errors = self.errors.saturating_add(errors);
        Ok(())
    }

    fn finalize(&mut self) -> Result<MapResultData, Error> {
        let ko = ratio(self.errors, self.count) * 100.0;
        let ok = if self.count == 0 { 0.0 } else { 100.0 - ko };
        debug!(count = self.count, errors = self.errors, "Requests summary");

        let mut result = MapResultData::new();
        result.put(KO_PERCENT, ResultData::value(ko));
        result.put(OK_PERCENT, ResultData::value(ok));
        Ok(result)
    }
}

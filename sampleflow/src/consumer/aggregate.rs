//! Single value aggregates over the whole pass, the begin and end dates of
//! the test run.

use super::{Consumer, Error};
use crate::{
    result::{MapResultData, ResultData},
    sample::Sample,
};

/// Key of the aggregated value in the emitted map.
pub const VALUE: &str = "value";

/// Which extreme of the run to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// Earliest sample start
    Begin,
    /// Latest sample end
    End,
}

/// Keeps one extreme timestamp.
///
/// The emitted map is empty when no sample was seen.
#[derive(Debug)]
pub struct DateConsumer {
    name: String,
    bound: Bound,
    value: Option<i64>,
}

impl DateConsumer {
    /// Create a consumer registered as `name`.
    pub fn new(name: impl Into<String>, bound: Bound) -> Self {
        Self {
            name: name.into(),
            bound,
            value: None,
        }
    }

    /// The extreme so far.
    #[must_use]
    pub fn value(&self) -> Option<i64> {
        self.value
    }
}

impl Consumer for DateConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self) -> Result<(), Error> {
        self.value = None;
        Ok(())
    }

    fn consume(&mut self, sample: &Sample) -> Result<(), Error> {
        self.value = Some(match (self.bound, self.value) {
            (Bound::Begin, None) => sample.start_time(),
            (Bound::Begin, Some(v)) => v.min(sample.start_time()),
            (Bound::End, None) => sample.end_time(),
            (Bound::End, Some(v)) => v.max(sample.end_time()),
        });
        Ok(())
    }

    fn finalize(&mut self) -> Result<MapResultData, Error> {
        let mut result = MapResultData::new();
        if let Some(v) = self.value {
            result.put(VALUE, ResultData::value(v));
        }
        Ok(result)
    }
}

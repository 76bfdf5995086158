//! The five most frequent errors of each sampler label.

use super::{Error, Summary};
use crate::{result::ResultData, sample::Sample};

/// Number of distinct messages tracked per bucket.
pub const MAX_NUMBER_OF_ERRORS_IN_TOP: usize = 5;

/// A bounded frequency table of error messages.
///
/// At most [`MAX_NUMBER_OF_ERRORS_IN_TOP`] distinct messages are counted.
/// Once the table is full a message not already present is dropped without
/// being counted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopErrors {
    entries: Vec<(String, u64)>,
}

impl TopErrors {
    /// Count one occurrence of `message`. Returns whether it was counted.
    pub fn register(&mut self, message: &str) -> bool {
        if let Some((_, count)) = self.entries.iter_mut().find(|(m, _)| m == message) {
            *count += 1;
            return true;
        }
        if self.entries.len() >= MAX_NUMBER_OF_ERRORS_IN_TOP {
            return false;
        }
        self.entries.push((message.to_string(), 1));
        true
    }

    /// Messages by descending count, ties in registration order.
    #[must_use]
    pub fn top(&self) -> Vec<(&str, u64)> {
        let mut top: Vec<(&str, u64)> = self.entries.iter().map(|(m, c)| (m.as_str(), *c)).collect();
        top.sort_by(|a, b| b.1.cmp(&a.1));
        top
    }
}

/// One bucket of the top errors table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopErrorsData {
    /// Every sample
    pub total: u64,
    /// Failed samples, controllers excluded
    pub errors: u64,
    /// Most frequent failure messages
    pub top: TopErrors,
}

/// The top errors by sampler [`Summary`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TopErrorsBySampler;

impl Summary for TopErrorsBySampler {
    type Data = TopErrorsData;

    fn create_data(&self, _key: Option<&str>) -> TopErrorsData {
        TopErrorsData::default()
    }

    fn update_data(&self, data: &mut TopErrorsData, sample: &Sample) -> Result<(), Error> {
        data.total += 1;
        if !sample.success() && !sample.is_controller() {
            data.errors += 1;
            data.top.register(&sample.error_message());
        }
        Ok(())
    }

    fn titles(&self) -> Vec<String> {
        let mut titles = vec![
            "Sample".to_string(),
            "#Samples".to_string(),
            "#Errors".to_string(),
        ];
        for _ in 0..MAX_NUMBER_OF_ERRORS_IN_TOP {
            titles.push("Error".to_string());
            titles.push("#Errors".to_string());
        }
        titles
    }

    fn data_result(&self, key: Option<&str>, data: &TopErrorsData, _overall: &TopErrorsData) -> Vec<ResultData> {
        let mut cells = Vec::with_capacity(3 + 2 * MAX_NUMBER_OF_ERRORS_IN_TOP);
        cells.push(ResultData::value(key.unwrap_or("Total")));
        cells.push(ResultData::value(data.total));
        cells.push(ResultData::value(data.errors));
        let top = data.top.top();
        for slot in 0..MAX_NUMBER_OF_ERRORS_IN_TOP {
            match top.get(slot) {
                Some((message, count)) => {
                    cells.push(ResultData::value(*message));
                    cells.push(ResultData::value(*count));
                }
                None => {
                    cells.push(ResultData::value(""));
                    cells.push(ResultData::value(""));
                }
            }
        }
        cells
    }
}

//! Failures grouped by error message.
//!
//! Unlike the other tables this one is keyed by [`Sample::error_message`].
//! Successful samples only count toward the overall total, which the
//! percentages of each row are computed against.

use super::{Error, Summary, ratio};
use crate::{result::ResultData, sample::Sample};

/// One bucket of the errors table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorsData {
    /// Failed samples
    pub errors: u64,
    /// Every sample folded into the bucket
    pub total: u64,
}

/// The errors [`Summary`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorsSummary;

fn is_error(sample: &Sample) -> bool {
    !sample.success() && !sample.is_controller()
}

impl Summary for ErrorsSummary {
    type Data = ErrorsData;

    fn create_data(&self, _key: Option<&str>) -> ErrorsData {
        ErrorsData::default()
    }

    fn key_from_sample(&self, sample: &Sample) -> Option<String> {
        is_error(sample).then(|| sample.error_message())
    }

    fn update_data(&self, data: &mut ErrorsData, sample: &Sample) -> Result<(), Error> {
        data.total += 1;
        if is_error(sample) {
            data.errors += 1;
        }
        Ok(())
    }

    fn titles(&self) -> Vec<String> {
        [
            "Type of error",
            "Number of errors",
            "% in errors",
            "% in all samples",
        ]
        .into_iter()
        .map(str::to_string)
        .collect()
    }

    fn data_result(&self, key: Option<&str>, data: &ErrorsData, overall: &ErrorsData) -> Vec<ResultData> {
        vec![
            ResultData::value(key.unwrap_or("Total")),
            ResultData::value(data.errors),
            ResultData::value(ratio(data.errors, overall.errors) * 100.0),
            ResultData::value(ratio(data.errors, overall.total) * 100.0),
        ]
    }

    fn supports_controllers_discrimination(&self) -> bool {
        false
    }
}

//! One recorded result row and its typed view.
//!
//! A [`Sample`] is immutable. Typed accessors never fail: an absent or
//! malformed field reads back as the type's default, zero or `false` or the
//! empty string. A partially corrupt log still yields a report.

use std::sync::Arc;

use tracing::trace;

use crate::convert::{self, FromField};

pub mod metadata;
pub mod source;
pub mod timestamp;

pub use metadata::SampleMetadata;
pub use source::SampleSource;
pub use timestamp::TimestampFormat;

/// Column names of a results file as written by the load generator.
pub mod column {
    /// Start of the sample, epoch milliseconds
    pub const TIMESTAMP: &str = "timeStamp";
    /// Elapsed time in milliseconds
    pub const ELAPSED: &str = "elapsed";
    /// Sampler label
    pub const LABEL: &str = "label";
    /// Protocol response code
    pub const RESPONSE_CODE: &str = "responseCode";
    /// Protocol response message
    pub const RESPONSE_MESSAGE: &str = "responseMessage";
    /// Name of the thread that ran the sample
    pub const THREAD_NAME: &str = "threadName";
    /// Kind of response payload
    pub const DATA_TYPE: &str = "dataType";
    /// Whether the sample succeeded
    pub const SUCCESS: &str = "success";
    /// First assertion failure message
    pub const FAILURE_MESSAGE: &str = "failureMessage";
    /// Received bytes
    pub const BYTES: &str = "bytes";
    /// Sent bytes
    pub const SENT_BYTES: &str = "sentBytes";
    /// Active threads in the sample's group
    pub const GROUP_THREADS: &str = "grpThreads";
    /// Active threads overall
    pub const ALL_THREADS: &str = "allThreads";
    /// Request URL
    pub const URL: &str = "URL";
    /// Time to first byte in milliseconds
    pub const LATENCY: &str = "Latency";
    /// Idle time in milliseconds
    pub const IDLE_TIME: &str = "IdleTime";
    /// Connection time in milliseconds
    pub const CONNECT_TIME: &str = "Connect";
    /// Number of operations the row stands for
    pub const SAMPLE_COUNT: &str = "SampleCount";
    /// Number of failed operations the row stands for
    pub const ERROR_COUNT: &str = "ErrorCount";
}

/// Response message prefix that marks a transaction controller pseudo-sample.
pub const CONTROLLER_MESSAGE_PREFIX: &str = "Number of samples in transaction";

/// Error key used for failures of successful responses without a message.
pub const ASSERTION_FAILED: &str = "Assertion failed";

/// A field was requested that the sample does not have.
///
/// This is not a failure, callers substitute a default.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Field {name:?} is missing")]
pub struct MissingField {
    /// Name of the requested field
    pub name: String,
}

/// One row of a results file.
#[derive(Debug, Clone)]
pub struct Sample {
    row: u64,
    metadata: Arc<SampleMetadata>,
    fields: Vec<String>,
}

impl Sample {
    /// Wrap already split fields.
    #[must_use]
    pub fn new(row: u64, metadata: Arc<SampleMetadata>, fields: Vec<String>) -> Self {
        Self {
            row,
            metadata,
            fields,
        }
    }

    /// Split `line` with the metadata's separator and wrap the result.
    #[must_use]
    pub fn from_line(row: u64, metadata: Arc<SampleMetadata>, line: &str) -> Self {
        let fields = metadata.split(line);
        Self::new(row, metadata, fields)
    }

    /// Zero-based row number within the file, header excluded.
    #[must_use]
    pub fn row(&self) -> u64 {
        self.row
    }

    /// Column layout of the file this sample comes from.
    #[must_use]
    pub fn metadata(&self) -> &SampleMetadata {
        &self.metadata
    }

    /// Raw field values in column order.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Raw value of the column named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`MissingField`] if the header has no such column or this row
    /// is too short to hold it.
    pub fn field(&self, name: &str) -> Result<&str, MissingField> {
        self.metadata
            .index_of(name)
            .and_then(|idx| self.field_at(idx))
            .ok_or_else(|| MissingField {
                name: name.to_string(),
            })
    }

    /// A copy of this sample with the column named `name` set to `value`.
    ///
    /// A row too short to hold the column is padded with empty fields. The
    /// sample is returned unchanged if the header has no such column.
    #[must_use]
    pub fn with_field(&self, name: &str, value: String) -> Sample {
        let mut fields = self.fields.clone();
        if let Some(index) = self.metadata.index_of(name) {
            if fields.len() <= index {
                fields.resize(index + 1, String::new());
            }
            fields[index] = value;
        }
        Self::new(self.row, Arc::clone(&self.metadata), fields)
    }

    /// Raw value at column `index`, if this row has it.
    #[must_use]
    pub fn field_at(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    /// Typed value of `name`, `default` when absent or unparseable.
    #[must_use]
    pub fn field_or<T: FromField>(&self, name: &str, default: T) -> T {
        match self.field(name) {
            Ok(raw) => match convert::convert::<T>(raw) {
                Ok(v) => v,
                Err(err) => {
                    trace!(row = self.row, column = name, error = %err, "Substituting default");
                    default
                }
            },
            Err(_) => default,
        }
    }

    fn text(&self, name: &str) -> &str {
        self.field(name).unwrap_or("")
    }

    /// Start of the sample in epoch milliseconds.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.field_or(column::TIMESTAMP, 0)
    }

    /// Elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_time(&self) -> i64 {
        self.field_or(column::ELAPSED, 0)
    }

    /// Whether the sample succeeded.
    #[must_use]
    pub fn success(&self) -> bool {
        self.field_or(column::SUCCESS, false)
    }

    /// The sampler label, the default grouping key.
    #[must_use]
    pub fn label(&self) -> &str {
        self.text(column::LABEL)
    }

    /// Protocol response code.
    #[must_use]
    pub fn response_code(&self) -> &str {
        self.text(column::RESPONSE_CODE)
    }

    /// Protocol response message.
    #[must_use]
    pub fn response_message(&self) -> &str {
        self.text(column::RESPONSE_MESSAGE)
    }

    /// Assertion failure message.
    #[must_use]
    pub fn failure_message(&self) -> &str {
        self.text(column::FAILURE_MESSAGE)
    }

    /// Name of the thread that produced the sample.
    #[must_use]
    pub fn thread_name(&self) -> &str {
        self.text(column::THREAD_NAME)
    }

    /// Kind of response payload.
    #[must_use]
    pub fn data_type(&self) -> &str {
        self.text(column::DATA_TYPE)
    }

    /// Request URL.
    #[must_use]
    pub fn url(&self) -> &str {
        self.text(column::URL)
    }

    /// Received bytes.
    #[must_use]
    pub fn bytes(&self) -> i64 {
        self.field_or(column::BYTES, 0)
    }

    /// Sent bytes.
    #[must_use]
    pub fn sent_bytes(&self) -> i64 {
        self.field_or(column::SENT_BYTES, 0)
    }

    /// Time to first byte in milliseconds.
    #[must_use]
    pub fn latency(&self) -> i64 {
        self.field_or(column::LATENCY, 0)
    }

    /// Connection time in milliseconds.
    #[must_use]
    pub fn connect_time(&self) -> i64 {
        self.field_or(column::CONNECT_TIME, 0)
    }

    /// Idle time in milliseconds.
    #[must_use]
    pub fn idle_time(&self) -> i64 {
        self.field_or(column::IDLE_TIME, 0)
    }

    /// Active threads in the sample's thread group.
    #[must_use]
    pub fn group_threads(&self) -> i64 {
        self.field_or(column::GROUP_THREADS, 0)
    }

    /// Active threads across all groups.
    #[must_use]
    pub fn all_threads(&self) -> i64 {
        self.field_or(column::ALL_THREADS, 0)
    }

    /// Number of operations this row stands for.
    ///
    /// Unlike other numeric accessors the default is 1: a row always stands
    /// for at least itself.
    #[must_use]
    pub fn sample_count(&self) -> i64 {
        self.field_or(column::SAMPLE_COUNT, 1).max(1)
    }

    /// Number of failed operations this row stands for.
    ///
    /// Defaults to 0 for a successful row and 1 otherwise. Never exceeds
    /// [`Sample::sample_count`].
    #[must_use]
    pub fn error_count(&self) -> i64 {
        let default = i64::from(!self.success());
        self.field_or(column::ERROR_COUNT, default)
            .clamp(0, self.sample_count())
    }

    /// Alias of [`Sample::timestamp`].
    #[must_use]
    pub fn start_time(&self) -> i64 {
        self.timestamp()
    }

    /// End of the sample in epoch milliseconds.
    #[must_use]
    pub fn end_time(&self) -> i64 {
        self.timestamp().saturating_add(self.elapsed_time())
    }

    /// Whether this row is a transaction controller pseudo-sample.
    #[must_use]
    pub fn is_controller(&self) -> bool {
        self.response_message().starts_with(CONTROLLER_MESSAGE_PREFIX)
    }

    /// Descriptive key of this sample's failure.
    ///
    /// `<code>/<message>`, or the assertion failure message when the
    /// response itself was successful.
    #[must_use]
    pub fn error_message(&self) -> String {
        let code = self.response_code();
        let response_message = self.response_message();
        let failure_message = self.failure_message();

        let assertion_failure =
            is_success_code(code) || (code.is_empty() && !failure_message.is_empty());
        if assertion_failure {
            if failure_message.is_empty() {
                return ASSERTION_FAILED.to_string();
            }
            return failure_message.to_string();
        }

        if response_message.is_empty() {
            code.to_string()
        } else {
            format!("{code}/{response_message}")
        }
    }
}

/// Whether `code` denotes a successful HTTP-style response, 200 through 399.
#[must_use]
pub fn is_success_code(code: &str) -> bool {
    code.trim()
        .parse::<u16>()
        .is_ok_and(|c| (200..=399).contains(&c))
}


#[cfg(test)]
mod tests {
    use super::test_support::{metadata, sample};
    use super::*;

    #[test]
    fn typed_accessors_read_fields() {
        let s = sample(3, "login", 120, true);
        assert_eq!(s.row(), 3);
        assert_eq!(s.timestamp(), 1_003);
        assert_eq!(s.elapsed_time(), 120);
        assert_eq!(s.end_time(), 1_123);
        assert!(s.success());
        assert_eq!(s.label(), "login");
        assert_eq!(s.response_code(), "200");
        assert_eq!(s.thread_name(), "t-1");
        assert_eq!(s.bytes(), 100);
        assert_eq!(s.sent_bytes(), 10);
        assert_eq!(s.sample_count(), 1);
    }

    #[test]
    fn short_row_reports_missing_field() {
        let meta = Arc::new(SampleMetadata::parse("a,b,c", ',').expect("valid header"));
        let s = Sample::from_line(0, meta, "1,2");
        assert_eq!(s.field("a"), Ok("1"));
        assert_eq!(
            s.field("c"),
            Err(MissingField {
                name: "c".to_string()
            })
        );
        assert_eq!(
            s.field("nope"),
            Err(MissingField {
                name: "nope".to_string()
            })
        );
    }

    #[test]
    fn malformed_fields_fall_back_to_defaults() {
        let s = Sample::from_line(0, metadata(), "oops,fast,,200,,,maybe,,many");
        assert_eq!(s.timestamp(), 0);
        assert_eq!(s.elapsed_time(), 0);
        assert!(!s.success());
        assert_eq!(s.label(), "");
        assert_eq!(s.bytes(), 0);
        assert_eq!(s.sent_bytes(), 0);
        assert_eq!(s.latency(), 0);
        assert_eq!(s.sample_count(), 1);
        assert_eq!(s.error_count(), 1);
    }

    #[test]
    fn with_field_replaces_and_pads() {
        let s = sample(2, "a", 5, true);
        let relabeled = s.with_field(column::LABEL, "b".to_string());
        assert_eq!(relabeled.label(), "b");
        assert_eq!(relabeled.row(), 2);
        assert_eq!(s.label(), "a");

        let short = Sample::from_line(0, metadata(), "1,2");
        let padded = short.with_field(column::SAMPLE_COUNT, "4".to_string());
        assert_eq!(padded.fields().len(), metadata().column_count());
        assert_eq!(padded.sample_count(), 4);
        assert_eq!(padded.label(), "");

        assert_eq!(s.with_field("nope", "x".to_string()).fields(), s.fields());
    }

    #[test]
    fn error_count_is_bounded_by_sample_count() {
        let meta = Arc::new(
            SampleMetadata::parse("success,SampleCount,ErrorCount", ',').expect("valid header"),
        );
        let s = Sample::from_line(0, Arc::clone(&meta), "false,3,7");
        assert_eq!(s.error_count(), 3);
        let s = Sample::from_line(0, meta, "true,3,-2");
        assert_eq!(s.error_count(), 0);
    }

    #[test]
    fn controller_detection() {
        let s = Sample::from_line(
            0,
            metadata(),
            "1,10,tx,200,\"Number of samples in transaction : 3, number of failing samples : 0\",t,true,,0,0,3",
        );
        assert!(s.is_controller());
        assert_eq!(s.sample_count(), 3);
        assert!(!sample(0, "a", 1, true).is_controller());
    }

    #[test]
    fn error_message_prefers_code_and_message() {
        let s = sample(0, "a", 1, false);
        assert_eq!(s.error_message(), "500/Internal Server Error");

        let assertion = Sample::from_line(0, metadata(), "1,10,a,200,OK,t,false,Expected 42,0,0,1");
        assert_eq!(assertion.error_message(), "Expected 42");

        let bare = Sample::from_line(0, metadata(), "1,10,a,204,,t,false,,0,0,1");
        assert_eq!(bare.error_message(), ASSERTION_FAILED);

        let non_http = Sample::from_line(0, metadata(), "1,10,a,java.net.ConnectException,,t,false,,0,0,1");
        assert_eq!(non_http.error_message(), "java.net.ConnectException");
    }

    #[test]
    fn success_codes() {
        assert!(is_success_code("200"));
        assert!(is_success_code("302"));
        assert!(!is_success_code("404"));
        assert!(!is_success_code("Non HTTP response code"));
        assert!(!is_success_code(""));
    }
}

//! Turn the lines of a results file into [`Sample`]s.
//!
//! [`SampleSource`] does not read files. It is handed an iterator of already
//! decoded lines by the caller, consumes the first non-blank one as the
//! header and yields every following non-blank line as a sample. Once the
//! underlying iterator ends the source is spent; build a new one to scan the
//! file again.

use std::sync::Arc;

use tracing::{debug, trace};

use super::{
    Sample,
    metadata::{self, DEFAULT_SEPARATOR, LineSplitter, SampleMetadata},
};

/// A lazy, finite sequence of samples over a line iterator.
#[derive(Debug)]
pub struct SampleSource<I> {
    lines: I,
    metadata: Arc<SampleMetadata>,
    splitter: LineSplitter,
    next_row: u64,
    skipped: u64,
}

impl<I, S> SampleSource<I>
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
    /// Build a source, consuming the header from `lines`.
    ///
    /// When `separator` is `None` the default separator is assumed and
    /// detection applies, see [`SampleMetadata::parse`].
    ///
    /// # Errors
    ///
    /// Returns [`metadata::Error::EmptyHeader`] if `lines` holds no non-blank
    /// line.
    pub fn new<L>(lines: L, separator: Option<char>) -> Result<Self, metadata::Error>
    where
        L: IntoIterator<IntoIter = I>,
    {
        let mut lines = lines.into_iter();
        let header = lines
            .by_ref()
            .find(|line| !line.as_ref().trim().is_empty())
            .ok_or(metadata::Error::EmptyHeader)?;
        let metadata = SampleMetadata::parse(
            trim_line_end(header.as_ref()),
            separator.unwrap_or(DEFAULT_SEPARATOR),
        )?;
        debug!(
            columns = metadata.column_count(),
            separator = ?metadata.separator(),
            "Parsed results header"
        );

        Ok(Self {
            lines,
            splitter: metadata.splitter(),
            metadata: Arc::new(metadata),
            next_row: 0,
            skipped: 0,
        })
    }

    /// Column layout shared by every sample of this source.
    #[must_use]
    pub fn metadata(&self) -> &Arc<SampleMetadata> {
        &self.metadata
    }

    /// Number of samples produced so far.
    #[must_use]
    pub fn produced(&self) -> u64 {
        self.next_row
    }

    /// Number of blank lines skipped so far.
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl<I, S> Iterator for SampleSource<I>
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
    type Item = Sample;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            let line = trim_line_end(line.as_ref());
            if line.trim().is_empty() {
                self.skipped += 1;
                trace!(after_row = self.next_row, "Skipping blank line");
                continue;
            }

            let fields = self.splitter.split(line);
            if fields.len() != self.metadata.column_count() {
                trace!(
                    row = self.next_row,
                    expected = self.metadata.column_count(),
                    actual = fields.len(),
                    "Ragged row"
                );
            }
            let sample = Sample::new(self.next_row, Arc::clone(&self.metadata), fields);
            self.next_row += 1;
            return Some(sample);
        }
    }
}

fn trim_line_end(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_first_non_blank_line() {
        let lines = vec!["", "  ", "a,b,c", "1,2,3", "4,5,6"];
        let source = SampleSource::new(lines, Some(',')).expect("header present");
        assert_eq!(source.metadata().columns(), ["a", "b", "c"]);

        let rows: Vec<(u64, String)> = source.map(|s| (s.row(), s.fields().join("|"))).collect();
        assert_eq!(rows, [(0_u64, "1|2|3".to_string()), (1, "4|5|6".to_string())]);
    }

    #[test]
    fn empty_input_has_no_header() {
        let lines: Vec<&str> = vec!["", "   "];
        assert_eq!(
            SampleSource::new(lines, None).map(|_| ()),
            Err(metadata::Error::EmptyHeader)
        );
    }

    #[test]
    fn rows_share_metadata_and_tolerate_raggedness() {
        let lines = vec!["a,b,c", "1,2", "1,2,3,4"];
        let mut source = SampleSource::new(lines, None).expect("header present");
        let short = source.next().expect("first row");
        let long = source.next().expect("second row");
        assert!(source.next().is_none());

        assert!(short.field("c").is_err());
        assert_eq!(long.fields().len(), 4);
        assert!(std::ptr::eq(short.metadata(), long.metadata()));
    }

    #[test]
    fn blank_data_lines_are_skipped_without_consuming_row_numbers() {
        let lines = vec!["a;b", "1;2", "", "3;4\r\n"];
        let mut source = SampleSource::new(lines, None).expect("header present");
        assert_eq!(source.metadata().separator(), ';');
        assert_eq!(source.next().map(|s| s.row()), Some(0));
        let second = source.next().expect("second row");
        assert_eq!(second.row(), 1);
        assert_eq!(second.field("b"), Ok("4"));
        assert_eq!(source.skipped(), 1);
        assert_eq!(source.produced(), 2);
    }

    #[test]
    fn owned_lines_are_accepted() {
        let lines: Vec<String> = vec!["label".into(), "home".into()];
        let samples: Vec<Sample> = SampleSource::new(lines, None)
            .expect("header present")
            .collect();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].label(), "home");
    }
}

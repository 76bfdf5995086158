//! Column layout of a results file.
//!
//! [`SampleMetadata`] is built once from the header line of a file and shared
//! read-only by every [`super::Sample`] of that file. It owns the separator
//! and the name to index mapping of the columns.

use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

/// Separator assumed when the caller does not configure one.
pub const DEFAULT_SEPARATOR: char = ',';

/// Separators tried, in order, when the configured one does not appear in the
/// header line.
pub const CANDIDATE_SEPARATORS: [char; 5] = [',', ';', '\t', '&', '|'];

/// Errors produced by [`SampleMetadata::parse`]
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The header line is empty or only whitespace.
    #[error("Header line is empty")]
    EmptyHeader,
}

/// Ordered column names and the separator that delimits them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleMetadata {
    separator: char,
    columns: Vec<String>,
    indices: FxHashMap<String, usize>,
}

impl SampleMetadata {
    /// Create metadata from already split column names.
    ///
    /// Names are case-sensitive. Should a name repeat, lookups resolve to its
    /// first position.
    #[must_use]
    pub fn new(separator: char, columns: Vec<String>) -> Self {
        let mut indices = FxHashMap::default();
        for (idx, name) in columns.iter().enumerate() {
            if indices.contains_key(name) {
                warn!(
                    column = %name,
                    index = idx,
                    "Duplicate column name in header, lookups use the first occurrence"
                );
                continue;
            }
            indices.insert(name.clone(), idx);
        }
        Self {
            separator,
            columns,
            indices,
        }
    }

    /// Parse a header line.
    ///
    /// If `separator` does not appear in the line the separator is detected,
    /// see [`detect_separator`]. When no candidate appears either the whole
    /// line is a single column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyHeader`] if the line is blank.
    pub fn parse(header: &str, separator: char) -> Result<Self, Error> {
        if header.trim().is_empty() {
            return Err(Error::EmptyHeader);
        }

        let separator = match detect_separator(header, separator) {
            Some(detected) => {
                if detected != separator {
                    debug!(
                        configured = ?separator,
                        detected = ?detected,
                        "Configured separator absent from header, using detected one"
                    );
                }
                detected
            }
            None => {
                debug!("No known separator in header, treating it as one column");
                separator
            }
        };

        Ok(Self::new(separator, split_line(header, separator)))
    }

    /// The field separator of this file.
    #[must_use]
    pub fn separator(&self) -> char {
        self.separator
    }

    /// Column names in header order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of columns declared by the header.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Name of the column at `index`.
    #[must_use]
    pub fn column_name(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(String::as_str)
    }

    /// Index of the column named `name`.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.indices.get(name).copied()
    }

    /// Split a data line with this file's separator.
    #[must_use]
    pub fn split(&self, line: &str) -> Vec<String> {
        split_line(line, self.separator)
    }

    /// A reusable splitter for the data lines of this file.
    #[must_use]
    pub fn splitter(&self) -> LineSplitter {
        LineSplitter::new(self.separator)
    }
}

/// Pick the separator for `line`.
///
/// Returns `configured` if it appears in the line, otherwise the first of
/// [`CANDIDATE_SEPARATORS`] that does, otherwise `None`.
#[must_use]
pub fn detect_separator(line: &str, configured: char) -> Option<char> {
    if line.contains(configured) {
        return Some(configured);
    }
    CANDIDATE_SEPARATORS
        .iter()
        .copied()
        .find(|candidate| line.contains(*candidate))
}

/// Split one line into its fields.
///
/// Fields may be quoted with `"`, in which case they can hold the separator
/// and `""` stands for a literal quote. Rows of any width are accepted.
pub(crate) fn split_line(line: &str, separator: char) -> Vec<String> {
    LineSplitter::new(separator).split(line)
}

/// Reusable field splitter for the lines of one file.
///
/// Keeps its parser and output buffers between lines. A separator outside
/// ASCII cannot be quoted and splits verbatim.
pub struct LineSplitter {
    separator: char,
    reader: Option<csv_core::Reader>,
    output: Vec<u8>,
    ends: Vec<usize>,
}

impl std::fmt::Debug for LineSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineSplitter")
            .field("separator", &self.separator)
            .field("quoted", &self.reader.is_some())
            .finish_non_exhaustive()
    }
}

impl LineSplitter {
    /// A splitter for `separator`.
    #[must_use]
    pub fn new(separator: char) -> Self {
        let reader = u8::try_from(separator)
            .ok()
            .filter(u8::is_ascii)
            .map(|delimiter| csv_core::ReaderBuilder::new().delimiter(delimiter).build());
        Self {
            separator,
            reader,
            output: Vec::new(),
            ends: vec![0; 32],
        }
    }

    /// The separator this splitter splits on.
    #[must_use]
    pub fn separator(&self) -> char {
        self.separator
    }

    /// Split `line`, a single line without its terminator.
    pub fn split(&mut self, line: &str) -> Vec<String> {
        let Some(reader) = self.reader.as_mut() else {
            return line.split(self.separator).map(str::to_string).collect();
        };
        reader.reset();
        // unquoting never grows a field
        if self.output.len() < line.len() {
            self.output.resize(line.len(), 0);
        }

        let mut input = line.as_bytes();
        let mut written = 0;
        let mut fields = 0;
        loop {
            let (result, read, out, ended) =
                reader.read_record(input, &mut self.output[written..], &mut self.ends[fields..]);
            input = &input[read..];
            written += out;
            fields += ended;
            match result {
                csv_core::ReadRecordResult::InputEmpty => {}
                csv_core::ReadRecordResult::OutputFull => {
                    let grown = (self.output.len() * 2).max(64);
                    self.output.resize(grown, 0);
                }
                csv_core::ReadRecordResult::OutputEndsFull => {
                    let grown = self.ends.len() * 2;
                    self.ends.resize(grown, 0);
                }
                csv_core::ReadRecordResult::Record | csv_core::ReadRecordResult::End => break,
            }
        }

        if fields == 0 {
            trace!("Line holds no field");
            return vec![String::new()];
        }
        let mut start = 0;
        self.ends[..fields]
            .iter()
            .map(|&end| {
                let field = String::from_utf8_lossy(&self.output[start..end]).into_owned();
                start = end;
                field
            })
            .collect()
    }
}

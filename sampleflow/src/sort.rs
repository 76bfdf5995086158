//! Deterministic ordering of samples and of emitted table rows.

use std::cmp::Ordering;

use tracing::debug;

use crate::{
    consumer::{DATA, ITEMS, TITLES},
    result::{MapResultData, ResultData, Value},
    sample::{Sample, SampleMetadata},
};

/// Errors produced by sorting.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The comparator's field is not a column of the metadata.
    #[error("Unknown sample field {name:?}")]
    UnknownField {
        /// Name of the field
        name: String,
    },
    /// The column is not among the table's titles.
    #[error("Unknown table column {name:?}")]
    UnknownColumn {
        /// Name of the column
        name: String,
    },
    /// The map is not a summary table.
    #[error("Result is not a table, titles or items missing")]
    NotATable,
}

/// Orders samples by the raw text of one field.
///
/// Comparison is lexicographic on the raw value, also for numeric looking
/// fields. Absent values compare as the empty string.
///
/// A comparator must be [`initialize`]d against the samples' metadata before
/// use. An uninitialized comparator reads column 0.
///
/// [`initialize`]: FieldSampleComparator::initialize
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSampleComparator {
    field: String,
    index: Option<usize>,
}

impl FieldSampleComparator {
    /// A comparator on `field`.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            index: None,
        }
    }

    /// The field compared on.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Resolve the field to a column of `metadata`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownField`] if `metadata` has no such column. The
    /// comparator is left unchanged.
    pub fn initialize(&mut self, metadata: &SampleMetadata) -> Result<(), Error> {
        let index = metadata.index_of(&self.field).ok_or_else(|| Error::UnknownField {
            name: self.field.clone(),
        })?;
        self.index = Some(index);
        Ok(())
    }

    /// Whether [`FieldSampleComparator::initialize`] succeeded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.index.is_some()
    }

    /// Compare `a` and `b` on the field.
    #[must_use]
    pub fn compare(&self, a: &Sample, b: &Sample) -> Ordering {
        let index = self.index.unwrap_or_else(|| {
            debug!(field = %self.field, "Comparator used before initialize, reading column 0");
            0
        });
        let a = a.field_at(index).unwrap_or("");
        let b = b.field_at(index).unwrap_or("");
        a.cmp(b)
    }
}

/// Stable sort of `samples` with `comparator`.
pub fn sort_samples(samples: &mut [Sample], comparator: &FieldSampleComparator) {
    samples.sort_by(|a, b| comparator.compare(a, b));
}

/// Stable sort of the rows of a summary table by the column titled `column`.
///
/// Numeric cells compare numerically, anything else by its text. Numbers
/// order before text, absent cells last. The overall row is not moved.
///
/// # Errors
///
/// Returns [`Error::NotATable`] if `table` is not a summary table and
/// [`Error::UnknownColumn`] if no title is `column`.
pub fn sort_rows_by_column(table: &mut MapResultData, column: &str, descending: bool) -> Result<(), Error> {
    let index = table
        .get(TITLES)
        .and_then(ResultData::as_list)
        .ok_or(Error::NotATable)?
        .iter()
        .position(|t| t.and_then(ResultData::as_value).and_then(Value::as_str) == Some(column))
        .ok_or_else(|| Error::UnknownColumn {
            name: column.to_string(),
        })?;
    let Some(ResultData::List(items)) = table.get_mut(ITEMS) else {
        return Err(Error::NotATable);
    };

    let cell = |row: &Option<ResultData>| -> Option<Value> {
        row.as_ref()?
            .as_map()?
            .get(DATA)?
            .as_list()?
            .get(index)?
            .as_value()
            .cloned()
    };
    items.sort_by(|a, b| {
        let ordering = compare_cells(cell(a).as_ref(), cell(b).as_ref());
        if descending { ordering.reverse() } else { ordering }
    });
    Ok(())
}

fn compare_cells(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.to_string().cmp(&b.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::consumer::{Consumer, SummaryConsumer, statistics::Statistics};
    use crate::sample::test_support::{metadata, sample};
    use proptest::prelude::*;

    fn row(meta: &Arc<SampleMetadata>, values: &[&str]) -> Sample {
        Sample::new(0, Arc::clone(meta), values.iter().map(|v| (*v).to_string()).collect())
    }

    #[test]
    fn lexicographic_not_numeric() {
        let meta = metadata();
        let mut comparator = FieldSampleComparator::new("elapsed");
        comparator.initialize(&meta).expect("known field");
        let nine = row(&meta, &["0", "9"]);
        let ten = row(&meta, &["0", "10"]);
        assert_eq!(comparator.compare(&ten, &nine), Ordering::Less);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let mut comparator = FieldSampleComparator::new("nope");
        assert_eq!(
            comparator.initialize(&metadata()),
            Err(Error::UnknownField {
                name: "nope".to_string()
            })
        );
        assert!(!comparator.is_initialized());
    }

    #[test]
    fn uninitialized_reads_first_column() {
        let meta = metadata();
        let comparator = FieldSampleComparator::new("label");
        let a = row(&meta, &["1", "z", "b"]);
        let b = row(&meta, &["2", "a", "a"]);
        assert_eq!(comparator.compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn sort_is_stable() {
        let meta = metadata();
        let mut comparator = FieldSampleComparator::new("label");
        comparator.initialize(&meta).expect("known field");
        let mut samples = vec![
            sample(0, "b", 1, true),
            sample(1, "a", 1, true),
            sample(2, "b", 1, true),
            sample(3, "a", 1, true),
        ];
        sort_samples(&mut samples, &comparator);
        let order: Vec<u64> = samples.iter().map(Sample::row).collect();
        assert_eq!(order, [1, 3, 0, 2]);
    }

    #[test]
    fn table_rows_sort_numerically() {
        let mut consumer = SummaryConsumer::new("statistics", Statistics::default());
        consumer.initialize().expect("initialize");
        for (row, (label, elapsed)) in [("a", 9), ("b", 100), ("c", 20)].into_iter().enumerate() {
            consumer
                .consume(&sample(row as u64, label, elapsed, true))
                .expect("consume");
        }
        let mut table = consumer.finalize().expect("finalize");
        sort_rows_by_column(&mut table, "Average", true).expect("sortable");

        let labels: Vec<String> = table
            .get(ITEMS)
            .and_then(ResultData::as_list)
            .expect("items")
            .iter()
            .flatten()
            .map(|r| {
                r.as_map()
                    .and_then(|m| m.get(DATA))
                    .and_then(ResultData::as_list)
                    .and_then(|l| l.get(0))
                    .and_then(ResultData::as_value)
                    .map(ToString::to_string)
                    .expect("label cell")
            })
            .collect();
        assert_eq!(labels, ["b", "c", "a"]);

        assert_eq!(
            sort_rows_by_column(&mut table, "Nope", false),
            Err(Error::UnknownColumn {
                name: "Nope".to_string()
            })
        );
        assert_eq!(
            sort_rows_by_column(&mut MapResultData::new(), "Average", false),
            Err(Error::NotATable)
        );
    }

    proptest! {
        #[test]
        fn comparator_is_a_total_order(a in ".{0,6}", b in ".{0,6}", c in ".{0,6}") {
            let meta = Arc::new(SampleMetadata::new(',', vec!["f".to_string()]));
            let mut comparator = FieldSampleComparator::new("f");
            comparator.initialize(&meta).expect("known field");
            let [a, b, c] = [a, b, c].map(|v| Sample::new(0, Arc::clone(&meta), vec![v]));

            prop_assert_eq!(comparator.compare(&a, &a), Ordering::Equal);
            prop_assert_eq!(comparator.compare(&a, &b), comparator.compare(&b, &a).reverse());
            if comparator.compare(&a, &b) == Ordering::Less && comparator.compare(&b, &c) == Ordering::Less {
                prop_assert_eq!(comparator.compare(&a, &c), Ordering::Less);
            }
        }
    }
}

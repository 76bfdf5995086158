//! Response time graphs, one series per sampler label plus an overall
//! series.
//!
//! [`ResponseTimeOverTime`] buckets samples by start time truncated to the
//! granularity and reduces every bucket with a selectable [`Aggregation`].
//! [`ResponseTimePercentiles`] renders the distribution of each series as
//! percentile points from 0 to 100.
//!
//! Points are emitted in ascending x, series in first-seen order with the
//! overall series last.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::Deserialize;

use super::{Consumer, DATA, Error, IS_CONTROLLER, percentile::PercentileEstimator};
use crate::{
    result::{ListResultData, MapResultData, ResultData, Value},
    sample::Sample,
};

/// Title of the time graph.
pub const TITLE: &str = "Response Time Over Time";
/// Title of the percentile graph.
pub const PERCENTILES_TITLE: &str = "Response Time Percentiles";
/// Label of the series covering every sample.
pub const OVERALL_SERIES: &str = "Overall";
/// Percentile points per percent of a percentile series.
pub const PERCENTILE_RESOLUTION: u32 = 10;

/// How the values falling into one bucket reduce to a point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Arithmetic mean
    #[default]
    Mean,
    /// Smallest value
    Min,
    /// Largest value
    Max,
    /// Sum of the values
    Sum,
    /// Number of values
    Count,
    /// Estimated percentile, in percent
    Percentile(f64),
}

/// Reduces the values of one bucket per its [`Aggregation`].
#[derive(Debug)]
pub struct Aggregator {
    aggregation: Aggregation,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    estimator: Option<PercentileEstimator>,
}

impl Aggregator {
    /// An empty aggregator.
    #[must_use]
    pub fn new(aggregation: Aggregation) -> Self {
        Self {
            aggregation,
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            estimator: matches!(aggregation, Aggregation::Percentile(_)).then(PercentileEstimator::new),
        }
    }

    /// Fold `value` in.
    pub fn add(&mut self, value: f64) {
        self.count = self.count.saturating_add(1);
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        if let Some(estimator) = &mut self.estimator {
            estimator.add(value);
        }
    }

    /// Number of values folded in.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// The reduced value, 0 when empty.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn result(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        match self.aggregation {
            Aggregation::Mean => self.sum / self.count as f64,
            Aggregation::Min => self.min,
            Aggregation::Max => self.max,
            Aggregation::Sum => self.sum,
            Aggregation::Count => self.count as f64,
            Aggregation::Percentile(percent) => self
                .estimator
                .as_ref()
                .map_or(0.0, |estimator| estimator.percentile(percent)),
        }
    }
}

#[derive(Debug)]
struct Series<T> {
    label: String,
    is_controller: bool,
    data: T,
}

/// Per-label series plus the overall one.
#[derive(Debug)]
struct SeriesSet<T> {
    series: Vec<Series<T>>,
    index: FxHashMap<String, usize>,
    overall: T,
}

impl<T> SeriesSet<T> {
    fn new(overall: T) -> Self {
        Self {
            series: Vec::new(),
            index: FxHashMap::default(),
            overall,
        }
    }

    fn for_sample(&mut self, sample: &Sample, create: impl FnOnce() -> T) -> &mut T {
        let label = sample.label();
        let idx = if let Some(&idx) = self.index.get(label) {
            idx
        } else {
            self.series.push(Series {
                label: label.to_string(),
                is_controller: sample.is_controller(),
                data: create(),
            });
            self.index.insert(label.to_string(), self.series.len() - 1);
            self.series.len() - 1
        };
        &mut self.series[idx].data
    }

    /// Label, controller flag, overall flag and data of every series.
    fn iter(&self) -> impl Iterator<Item = (&str, bool, bool, &T)> {
        self.series
            .iter()
            .map(|s| (s.label.as_str(), s.is_controller, false, &s.data))
            .chain(std::iter::once((OVERALL_SERIES, false, true, &self.overall)))
    }
}

fn series_result(label: &str, is_controller: bool, is_overall: bool, points: ListResultData) -> ResultData {
    let mut series = MapResultData::new();
    series.put("label", ResultData::value(label));
    series.put(IS_CONTROLLER, ResultData::value(is_controller));
    series.put("isOverall", ResultData::value(is_overall));
    series.put(DATA, points);
    series.into()
}

fn point(x: impl Into<Value>, y: f64) -> ResultData {
    let mut point = ListResultData::new();
    point.add_result(ResultData::value(x));
    point.add_result(ResultData::value(y));
    point.into()
}

fn put_y_bounds(result: &mut MapResultData, ys: impl Iterator<Item = f64>) {
    let (min_y, max_y) = ys.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), y| {
        (lo.min(y), hi.max(y))
    });
    if min_y.is_finite() {
        result.put("minY", ResultData::value(min_y));
        result.put("maxY", ResultData::value(max_y));
    }
}

/// The response time over time graph.
#[derive(Debug)]
pub struct ResponseTimeOverTime {
    name: String,
    granularity: i64,
    aggregation: Aggregation,
    series: SeriesSet<BTreeMap<i64, Aggregator>>,
}

impl ResponseTimeOverTime {
    /// Create a consumer registered as `name`, bucketing by `granularity`
    /// milliseconds and averaging every bucket. A granularity below 1 is
    /// taken as 1.
    pub fn new(name: impl Into<String>, granularity: i64) -> Self {
        Self {
            name: name.into(),
            granularity: granularity.max(1),
            aggregation: Aggregation::Mean,
            series: SeriesSet::new(BTreeMap::new()),
        }
    }

    /// Reduce every bucket with `aggregation` instead.
    #[must_use]
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    fn bucket(&self, timestamp: i64) -> i64 {
        timestamp.saturating_sub(timestamp.rem_euclid(self.granularity))
    }
}

impl Consumer for ResponseTimeOverTime {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self) -> Result<(), Error> {
        self.series = SeriesSet::new(BTreeMap::new());
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn consume(&mut self, sample: &Sample) -> Result<(), Error> {
        let x = self.bucket(sample.start_time());
        let elapsed = sample.elapsed_time() as f64;
        let aggregation = self.aggregation;
        self.series
            .for_sample(sample, BTreeMap::new)
            .entry(x)
            .or_insert_with(|| Aggregator::new(aggregation))
            .add(elapsed);
        self.series
            .overall
            .entry(x)
            .or_insert_with(|| Aggregator::new(aggregation))
            .add(elapsed);
        Ok(())
    }

    fn finalize(&mut self) -> Result<MapResultData, Error> {
        let mut result = MapResultData::new();
        result.put("title", ResultData::value(TITLE));
        result.put("granularity", ResultData::value(self.granularity));

        let xs = self.series.overall.keys();
        if let (Some(min_x), Some(max_x)) = (xs.clone().next(), xs.last()) {
            result.put("minX", ResultData::value(*min_x));
            result.put("maxX", ResultData::value(*max_x));
        }
        put_y_bounds(
            &mut result,
            self.series
                .iter()
                .flat_map(|(_, _, _, points)| points.values().map(Aggregator::result)),
        );

        let series: ListResultData = self
            .series
            .iter()
            .map(|(label, is_controller, is_overall, points)| {
                let points = points.iter().map(|(x, agg)| point(*x, agg.result())).collect();
                series_result(label, is_controller, is_overall, points)
            })
            .collect();
        result.put("series", series);
        Ok(result)
    }
}

/// The response time percentiles graph.
///
/// Each series holds one point per tenth of a percent, x the percentile and
/// y the estimated elapsed time at it.
#[derive(Debug)]
pub struct ResponseTimePercentiles {
    name: String,
    series: SeriesSet<PercentileEstimator>,
}

impl ResponseTimePercentiles {
    /// Create a consumer registered as `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            series: SeriesSet::new(PercentileEstimator::new()),
        }
    }
}

fn percentile_points(estimator: &PercentileEstimator) -> impl Iterator<Item = (f64, f64)> + '_ {
    let steps = if estimator.count() == 0 {
        0
    } else {
        100 * PERCENTILE_RESOLUTION + 1
    };
    (0..steps).map(move |rank| {
        let percent = f64::from(rank) / f64::from(PERCENTILE_RESOLUTION);
        (percent, estimator.percentile(percent))
    })
}

impl Consumer for ResponseTimePercentiles {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self) -> Result<(), Error> {
        self.series = SeriesSet::new(PercentileEstimator::new());
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn consume(&mut self, sample: &Sample) -> Result<(), Error> {
        let elapsed = sample.elapsed_time() as f64;
        self.series.for_sample(sample, PercentileEstimator::new).add(elapsed);
        self.series.overall.add(elapsed);
        Ok(())
    }

    fn finalize(&mut self) -> Result<MapResultData, Error> {
        let mut result = MapResultData::new();
        result.put("title", ResultData::value(PERCENTILES_TITLE));
        if self.series.overall.count() > 0 {
            result.put("minX", ResultData::value(0.0));
            result.put("maxX", ResultData::value(100.0));
        }
        put_y_bounds(
            &mut result,
            self.series
                .iter()
                .flat_map(|(_, _, _, estimator)| percentile_points(estimator).map(|(_, y)| y)),
        );

        let series: ListResultData = self
            .series
            .iter()
            .map(|(label, is_controller, is_overall, estimator)| {
                let points = percentile_points(estimator).map(|(x, y)| point(x, y)).collect();
                series_result(label, is_controller, is_overall, points)
            })
            .collect();
        result.put("series", series);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::test_support::{metadata, sample};

    fn points(series: &ResultData) -> Vec<(Value, f64)> {
        series
            .as_map()
            .and_then(|m| m.get(DATA))
            .and_then(ResultData::as_list)
            .expect("series data")
            .iter()
            .flatten()
            .map(|p| {
                let p = p.as_list().expect("point");
                let x = p.get(0).and_then(ResultData::as_value).cloned().expect("x");
                let y = p.get(1).and_then(ResultData::as_value).and_then(Value::as_f64).expect("y");
                (x, y)
            })
            .collect()
    }

    fn timed(points: &[(Value, f64)]) -> Vec<(i64, f64)> {
        points
            .iter()
            .map(|(x, y)| match x {
                Value::Int(x) => (*x, *y),
                other => panic!("unexpected x {other:?}"),
            })
            .collect()
    }

    fn run(consumer: &mut dyn Consumer, samples: &[Sample]) -> MapResultData {
        consumer.initialize().expect("initialize");
        for s in samples {
            consumer.consume(s).expect("consume");
        }
        consumer.finalize().expect("finalize")
    }

    #[test]
    fn buckets_by_granularity() {
        // sample timestamps are 1000 + row
        let mut graph = ResponseTimeOverTime::new("response_time_over_time", 5);
        let result = run(
            &mut graph,
            &[
                sample(0, "a", 10, true),
                sample(3, "a", 20, true),
                sample(6, "b", 40, false),
                sample(7, "a", 30, true),
            ],
        );

        assert_eq!(result.get("minX"), Some(&ResultData::value(1_000_i64)));
        assert_eq!(result.get("maxX"), Some(&ResultData::value(1_005_i64)));
        assert_eq!(result.get("minY"), Some(&ResultData::value(15.0)));
        assert_eq!(result.get("maxY"), Some(&ResultData::value(40.0)));

        let series = result.get("series").and_then(ResultData::as_list).expect("series");
        assert_eq!(series.size(), 3);
        assert_eq!(
            timed(&points(series.get(0).expect("a"))),
            [(1_000, 15.0), (1_005, 30.0)]
        );
        assert_eq!(timed(&points(series.get(1).expect("b"))), [(1_005, 40.0)]);
        let overall = series.get(2).expect("overall");
        assert_eq!(
            overall.as_map().and_then(|m| m.get("label")),
            Some(&ResultData::value(OVERALL_SERIES))
        );
        assert_eq!(timed(&points(overall)), [(1_000, 15.0), (1_005, 35.0)]);
    }

    #[test]
    fn aggregation_is_selectable() {
        let samples = [
            sample(0, "a", 10, true),
            sample(1, "a", 20, true),
            sample(2, "a", 30, true),
        ];
        for (aggregation, expected) in [
            (Aggregation::Mean, 20.0),
            (Aggregation::Min, 10.0),
            (Aggregation::Max, 30.0),
            (Aggregation::Sum, 60.0),
            (Aggregation::Count, 3.0),
        ] {
            let mut graph = ResponseTimeOverTime::new("g", 1_000).with_aggregation(aggregation);
            let result = run(&mut graph, &samples);
            let series = result.get("series").and_then(ResultData::as_list).expect("series");
            assert_eq!(timed(&points(series.get(0).expect("a"))), [(1_000, expected)], "{aggregation:?}");
        }

        let mut graph = ResponseTimeOverTime::new("g", 1_000).with_aggregation(Aggregation::Percentile(100.0));
        let result = run(&mut graph, &samples);
        let series = result.get("series").and_then(ResultData::as_list).expect("series");
        let (_, y) = timed(&points(series.get(0).expect("a")))[0];
        assert!((y - 30.0).abs() <= 0.6, "{y}");
    }

    #[test]
    fn extreme_timestamps_do_not_overflow() {
        let early = Sample::from_line(0, metadata(), "-9223372036854775808,5,a,200,OK,t,true,,0,0,1");
        let late = Sample::from_line(1, metadata(), "9223372036854775807,5,a,200,OK,t,true,,0,0,1");
        let mut graph = ResponseTimeOverTime::new("g", 60_000);
        let result = run(&mut graph, &[early, late]);
        assert_eq!(result.get("minX"), Some(&ResultData::value(i64::MIN)));
        let max_x = result
            .get("maxX")
            .and_then(ResultData::as_value)
            .and_then(Value::as_f64)
            .expect("maxX");
        assert!(max_x > 0.0);
    }

    #[test]
    fn empty_graph_has_only_overall_series() {
        let mut graph = ResponseTimeOverTime::new("g", 0);
        let result = run(&mut graph, &[]);
        assert!(result.get("minX").is_none());
        assert_eq!(result.get("granularity"), Some(&ResultData::value(1_i64)));
        let series = result.get("series").and_then(ResultData::as_list).expect("series");
        assert_eq!(series.size(), 1);
    }

    #[test]
    fn percentile_series_span_the_distribution() {
        let mut samples: Vec<Sample> = (1..=100).map(|v| sample(v as u64, "a", v, true)).collect();
        samples.push(sample(101, "b", 1_000, true));
        let mut graph = ResponseTimePercentiles::new("response_time_percentiles");
        let result = run(&mut graph, &samples);

        assert_eq!(result.get("title"), Some(&ResultData::value(PERCENTILES_TITLE)));
        assert_eq!(result.get("minX"), Some(&ResultData::value(0.0)));
        assert_eq!(result.get("maxX"), Some(&ResultData::value(100.0)));
        let max_y = result
            .get("maxY")
            .and_then(ResultData::as_value)
            .and_then(Value::as_f64)
            .expect("maxY");
        assert!((max_y - 1_000.0).abs() <= 20.0);

        let series = result.get("series").and_then(ResultData::as_list).expect("series");
        assert_eq!(series.size(), 3);
        let a = points(series.get(0).expect("a"));
        assert_eq!(a.len(), 1_001);
        assert_eq!(a[0].0, Value::Float(0.0));
        assert_eq!(a[1_000].0, Value::Float(100.0));
        let (_, median) = a[500];
        assert!((median - 50.0).abs() <= 2.0, "{median}");
        assert!(a.windows(2).all(|w| w[0].1 <= w[1].1 * 1.02 + 1e-9));
    }

    #[test]
    fn empty_percentile_graph_has_no_points() {
        let mut graph = ResponseTimePercentiles::new("p");
        let result = run(&mut graph, &[]);
        assert!(result.get("minX").is_none());
        assert!(result.get("minY").is_none());
        let series = result.get("series").and_then(ResultData::as_list).expect("series");
        assert_eq!(points(series.get(0).expect("overall")).len(), 0);
    }
}

//! This module controls configuration parsing from the end user and turns a
//! configuration into a ready to run [`Pipeline`]. Invalid configuration is
//! rejected here, before any sample is read.

use std::{fs, path::Path, str::FromStr};

use regex::Regex;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use tracing::debug;

use crate::{
    consumer::{
        self, Consumer, SummaryConsumer,
        aggregate::{Bound, DateConsumer},
        apdex::{Apdex, ThresholdSelector, Thresholds},
        errors::ErrorsSummary,
        filter::{FilterConsumer, SampleFilter},
        graph::{Aggregation, ResponseTimeOverTime, ResponseTimePercentiles},
        requests::RequestsSummary,
        statistics::{DEFAULT_PERCENTILES, Statistics},
        top_errors::TopErrorsBySampler,
    },
    pipeline::{self, Pipeline},
    sample::timestamp::{self, TimestampFormat},
};

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error for IO operations when reading the config file
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// Error for an invalid label pattern
    #[error("Invalid label pattern: {0}")]
    Regex(#[from] regex::Error),
    /// Error for a threshold pair whose satisfied bound exceeds its tolerated
    /// bound
    #[error("Apdex satisfied threshold {satisfied} exceeds tolerated threshold {tolerated} ({context})")]
    InvalidApdexThresholds {
        /// Where the pair is configured
        context: String,
        /// Satisfied threshold in milliseconds
        satisfied: i64,
        /// Tolerated threshold in milliseconds
        tolerated: i64,
    },
    /// Error for duplicate consumer IDs
    #[error("Duplicate consumer ID found: {0}")]
    DuplicateConsumer(String),
    /// Error for a separator that cannot delimit fields
    #[error("Invalid field separator {0:?}")]
    InvalidSeparator(char),
    /// Error for a percentile outside of 0 to 100
    #[error("Invalid percentile {0}, expected a value from 0 to 100")]
    InvalidPercentile(f64),
    /// See [`crate::sample::timestamp::Error`] for details.
    #[error(transparent)]
    TimestampFormat(#[from] timestamp::Error),
    /// See [`crate::consumer::Error`] for details.
    #[error(transparent)]
    Consumer(#[from] consumer::Error),
    /// See [`crate::pipeline::Error`] for details.
    #[error(transparent)]
    Pipeline(#[from] pipeline::Error),
}

fn default_satisfied_threshold() -> i64 {
    500
}

fn default_tolerated_threshold() -> i64 {
    1_500
}

fn default_granularity() -> i64 {
    60_000
}

fn default_filtered() -> bool {
    true
}

fn default_percentiles() -> Vec<f64> {
    DEFAULT_PERCENTILES.to_vec()
}

fn default_consumers() -> Vec<ConsumerConfig> {
    [
        Inner::BeginDate(DateOptions::default()),
        Inner::EndDate(DateOptions::default()),
        Inner::Requests(Options::default()),
        Inner::Apdex(Options::default()),
        Inner::Statistics(StatisticsOptions::default()),
        Inner::Errors(Options::default()),
        Inner::TopErrors(Options::default()),
    ]
    .into_iter()
    .map(|inner| ConsumerConfig {
        general: General { id: None },
        inner,
    })
    .collect()
}

/// Main configuration struct for the report pipeline
#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Field separator of the results file. Detected from the header when
    /// absent.
    #[serde(default)]
    pub separator: Option<char>,
    /// `strftime` pattern of formatted `timeStamp` values. Formatted values
    /// are read as epoch milliseconds when absent.
    #[serde(default)]
    pub timestamp_format: Option<String>,
    /// Only samples whose whole label matches this pattern reach the
    /// filtered consumers.
    #[serde(default)]
    pub sample_filter: Option<String>,
    /// Apdex thresholds
    #[serde(default)]
    pub apdex: ApdexConfig,
    /// Consumers to register, in order
    #[serde(default = "default_consumers")]
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub consumers: Vec<ConsumerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            separator: None,
            timestamp_format: None,
            sample_filter: None,
            apdex: ApdexConfig::default(),
            consumers: default_consumers(),
        }
    }
}

/// Apdex threshold configuration
#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
pub struct ApdexConfig {
    /// Default satisfied threshold in milliseconds
    #[serde(default = "default_satisfied_threshold")]
    pub satisfied_threshold: i64,
    /// Default tolerated threshold in milliseconds
    #[serde(default = "default_tolerated_threshold")]
    pub tolerated_threshold: i64,
    /// Thresholds for specific labels, first match wins
    #[serde(default)]
    pub per_label: Vec<ApdexRule>,
}

impl Default for ApdexConfig {
    fn default() -> Self {
        Self {
            satisfied_threshold: default_satisfied_threshold(),
            tolerated_threshold: default_tolerated_threshold(),
            per_label: Vec::new(),
        }
    }
}

/// Thresholds for the labels matching a pattern
#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
pub struct ApdexRule {
    /// Regular expression the whole label must match
    pub pattern: String,
    /// Satisfied threshold in milliseconds
    pub satisfied: i64,
    /// Tolerated threshold in milliseconds
    pub tolerated: i64,
}

/// Configuration for one consumer
#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub struct ConsumerConfig {
    /// Common consumer configs
    #[serde(flatten)]
    pub general: General,
    /// The consumer config
    #[serde(flatten)]
    pub inner: Inner,
}

impl ConsumerConfig {
    /// Name the consumer's output is registered under.
    #[must_use]
    pub fn name(&self) -> &str {
        self.general.id.as_deref().unwrap_or(self.inner.default_name())
    }
}

/// Configurations common to all consumers
#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub struct General {
    /// The ID assigned to this consumer, its kind's name when absent
    pub id: Option<String>,
}

/// Options shared by the consumer kinds
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct Options {
    /// Whether [`Config::sample_filter`] applies
    #[serde(default = "default_filtered")]
    pub filtered: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            filtered: default_filtered(),
        }
    }
}

/// Options of the begin and end dates
///
/// The dates describe the whole run, so [`Config::sample_filter`] does not
/// apply unless asked for.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(deny_unknown_fields)]
pub struct DateOptions {
    /// Whether [`Config::sample_filter`] applies
    #[serde(default)]
    pub filtered: bool,
}

/// Options of the statistics table
#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct StatisticsOptions {
    /// Whether [`Config::sample_filter`] applies
    #[serde(default = "default_filtered")]
    pub filtered: bool,
    /// Percentile columns, in percent
    #[serde(default = "default_percentiles")]
    pub percentiles: Vec<f64>,
}

impl Default for StatisticsOptions {
    fn default() -> Self {
        Self {
            filtered: default_filtered(),
            percentiles: default_percentiles(),
        }
    }
}

/// Options of the response time over time graph
#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct GraphOptions {
    /// Whether [`Config::sample_filter`] applies
    #[serde(default = "default_filtered")]
    pub filtered: bool,
    /// Width of a time bucket in milliseconds
    #[serde(default = "default_granularity")]
    pub granularity: i64,
    /// How the samples of a bucket reduce to a point
    #[serde(default)]
    pub aggregation: Aggregation,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            filtered: default_filtered(),
            granularity: default_granularity(),
            aggregation: Aggregation::default(),
        }
    }
}

/// The consumer kinds
#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum Inner {
    /// See [`crate::consumer::apdex`] for details.
    Apdex(Options),
    /// See [`crate::consumer::statistics`] for details.
    Statistics(StatisticsOptions),
    /// See [`crate::consumer::top_errors`] for details.
    TopErrors(Options),
    /// See [`crate::consumer::errors`] for details.
    Errors(Options),
    /// See [`crate::consumer::requests`] for details.
    Requests(Options),
    /// See [`crate::consumer::aggregate`] for details.
    BeginDate(DateOptions),
    /// See [`crate::consumer::aggregate`] for details.
    EndDate(DateOptions),
    /// See [`crate::consumer::graph`] for details.
    ResponseTimeOverTime(GraphOptions),
    /// See [`crate::consumer::graph`] for details.
    ResponseTimePercentiles(Options),
}

impl Inner {
    /// Name of a consumer of this kind when no ID is configured.
    #[must_use]
    pub fn default_name(&self) -> &'static str {
        match self {
            Inner::Apdex(_) => "apdex",
            Inner::Statistics(_) => "statistics",
            Inner::TopErrors(_) => "top_errors",
            Inner::Errors(_) => "errors",
            Inner::Requests(_) => "requests",
            Inner::BeginDate(_) => "begin_date",
            Inner::EndDate(_) => "end_date",
            Inner::ResponseTimeOverTime(_) => "response_time_over_time",
            Inner::ResponseTimePercentiles(_) => "response_time_percentiles",
        }
    }

    fn filtered(&self) -> bool {
        match self {
            Inner::Apdex(o)
            | Inner::TopErrors(o)
            | Inner::Errors(o)
            | Inner::Requests(o)
            | Inner::ResponseTimePercentiles(o) => o.filtered,
            Inner::Statistics(o) => o.filtered,
            Inner::BeginDate(o) | Inner::EndDate(o) => o.filtered,
            Inner::ResponseTimeOverTime(o) => o.filtered,
        }
    }

    fn excludes_controllers(&self) -> bool {
        matches!(self, Inner::TopErrors(_) | Inner::Errors(_))
    }
}

impl FromStr for Config {
    type Err = Error;

    /// Parse and validate a YAML configuration.
    fn from_str(contents: &str) -> Result<Self, Error> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Load and validate the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid YAML or
    /// fails [`Config::validate`].
    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)?;
        contents.parse()
    }

    /// Check the configuration for errors deserialization cannot catch.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    ///
    /// * The separator is a quote or a line break
    /// * The timestamp format is not a valid `strftime` pattern
    /// * A label pattern is not a valid regular expression
    /// * A percentile lies outside of 0 to 100
    /// * A threshold pair has its satisfied bound above its tolerated bound
    /// * Two consumers share a name
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(separator) = self.separator
            && matches!(separator, '"' | '\n' | '\r')
        {
            return Err(Error::InvalidSeparator(separator));
        }
        if let Some(pattern) = &self.timestamp_format {
            TimestampFormat::new(pattern.as_str())?;
        }
        if let Some(pattern) = &self.sample_filter {
            Regex::new(pattern)?;
        }

        check_thresholds(
            "default",
            self.apdex.satisfied_threshold,
            self.apdex.tolerated_threshold,
        )?;
        for rule in &self.apdex.per_label {
            Regex::new(&rule.pattern)?;
            check_thresholds(&rule.pattern, rule.satisfied, rule.tolerated)?;
        }

        let mut seen = FxHashSet::default();
        for consumer in &self.consumers {
            if !seen.insert(consumer.name()) {
                return Err(Error::DuplicateConsumer(consumer.name().to_string()));
            }
            match &consumer.inner {
                Inner::Statistics(o) => o.percentiles.iter().try_for_each(|p| check_percentile(*p))?,
                Inner::ResponseTimeOverTime(GraphOptions {
                    aggregation: Aggregation::Percentile(p),
                    ..
                }) => check_percentile(*p)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Build a pipeline with the configured consumers registered in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn build_pipeline(&self) -> Result<Pipeline, Error> {
        self.validate()?;
        let mut selector = ThresholdSelector::new(Thresholds::new(
            self.apdex.satisfied_threshold,
            self.apdex.tolerated_threshold,
        ));
        for rule in &self.apdex.per_label {
            selector = selector.with_rule(&rule.pattern, Thresholds::new(rule.satisfied, rule.tolerated))?;
        }
        let label_filter = match &self.sample_filter {
            Some(pattern) => SampleFilter::new().with_label(pattern)?,
            None => SampleFilter::new(),
        };

        let mut pipeline = Pipeline::new();
        if let Some(separator) = self.separator {
            pipeline = pipeline.with_separator(separator);
        }
        if let Some(pattern) = &self.timestamp_format {
            pipeline = pipeline.with_timestamp_format(TimestampFormat::new(pattern.as_str())?);
        }
        for config in &self.consumers {
            let name = config.name();
            let consumer: Box<dyn Consumer> = match &config.inner {
                Inner::Apdex(_) => Box::new(SummaryConsumer::new(name, Apdex::new(selector.clone()))),
                Inner::Statistics(o) => Box::new(SummaryConsumer::new(name, Statistics::new(o.percentiles.clone()))),
                Inner::TopErrors(_) => Box::new(SummaryConsumer::new(name, TopErrorsBySampler)),
                Inner::Errors(_) => Box::new(SummaryConsumer::new(name, ErrorsSummary)),
                Inner::Requests(_) => Box::new(RequestsSummary::new(name)),
                Inner::BeginDate(_) => Box::new(DateConsumer::new(name, Bound::Begin)),
                Inner::EndDate(_) => Box::new(DateConsumer::new(name, Bound::End)),
                Inner::ResponseTimeOverTime(o) => {
                    Box::new(ResponseTimeOverTime::new(name, o.granularity).with_aggregation(o.aggregation))
                }
                Inner::ResponseTimePercentiles(_) => Box::new(ResponseTimePercentiles::new(name)),
            };

            let mut filter = if config.inner.filtered() {
                label_filter.clone()
            } else {
                SampleFilter::new()
            };
            if config.inner.excludes_controllers() {
                filter = filter.excluding_controllers();
            }
            let consumer: Box<dyn Consumer> = if filter.is_empty() {
                consumer
            } else {
                Box::new(FilterConsumer::new(filter, consumer))
            };
            debug!(consumer = %name, kind = config.inner.default_name(), "Building consumer");
            pipeline.register(consumer)?;
        }
        Ok(pipeline)
    }
}

fn check_percentile(percent: f64) -> Result<(), Error> {
    if (0.0..=100.0).contains(&percent) {
        Ok(())
    } else {
        Err(Error::InvalidPercentile(percent))
    }
}

fn check_thresholds(context: &str, satisfied: i64, tolerated: i64) -> Result<(), Error> {
    if satisfied > tolerated {
        return Err(Error::InvalidApdexThresholds {
            context: context.to_string(),
            satisfied,
            tolerated,
        });
    }
    Ok(())
}

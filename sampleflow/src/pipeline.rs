//! Single pass orchestration of consumers over a sample source.
//!
//! The [`Pipeline`] owns the registered consumers and walks them through a
//! pass: initialize, one update per sample in row order, finalize. It is a
//! synchronous state machine, in the manner of a capture manager's event
//! loop, driven by [`Pipeline::run`] or step by step through
//! [`Pipeline::initialize`], [`Pipeline::process`] and
//! [`Pipeline::finalize`].
//!
//! A consumer that fails is isolated. Its failure is recorded, it receives no
//! further samples and its output is left out of the report. The pass fails
//! only when no consumer survives to emit output.

use std::fmt;

use sampleflow_signal::Watcher;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    consumer::Consumer,
    result::MapResultData,
    sample::{Sample, SampleSource, TimestampFormat, metadata},
};

/// Lifecycle of a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Consumers may be registered
    Created,
    /// Every consumer was initialized, no sample seen yet
    Initialized,
    /// Samples are flowing
    Running,
    /// Every surviving consumer emitted its result
    Finalized,
    /// The pass was stopped, its state discarded
    Cancelled,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Created => "created",
            State::Initialized => "initialized",
            State::Running => "running",
            State::Finalized => "finalized",
            State::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Lifecycle call in which a consumer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// [`Consumer::initialize`]
    Initialize,
    /// [`Consumer::consume`] of the sample at `row`
    Update {
        /// Row of the offending sample
        row: u64,
    },
    /// [`Consumer::finalize`]
    Finalize,
}

/// A recorded consumer failure, an error entry of the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerFailure {
    /// Name of the failed consumer
    pub consumer: String,
    /// Where it failed
    pub phase: Phase,
    /// The error it returned
    pub message: String,
}

impl fmt::Display for ConsumerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.phase {
            Phase::Initialize => write!(f, "{} failed to initialize: {}", self.consumer, self.message),
            Phase::Update { row } => write!(f, "{} failed on row {row}: {}", self.consumer, self.message),
            Phase::Finalize => write!(f, "{} failed to finalize: {}", self.consumer, self.message),
        }
    }
}

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Pipeline`]
pub enum Error {
    /// See [`crate::sample::metadata::Error`] for details.
    #[error(transparent)]
    Metadata(#[from] metadata::Error),
    /// Every consumer failed, there is nothing to report.
    #[error("No consumer survived the pass, {} failure(s)", .failures.len())]
    NoSurvivingConsumers {
        /// Every failure of the pass
        failures: Vec<ConsumerFailure>,
    },
    /// The stop signal fired before the end of input.
    #[error("Pass cancelled")]
    Cancelled,
    /// A consumer is already registered under this name.
    #[error("Consumer {0:?} is already registered")]
    DuplicateConsumer(String),
    /// The operation is not valid in the pipeline's current state.
    #[error("Pipeline is {actual}, expected {expected}")]
    InvalidState {
        /// State the operation requires
        expected: State,
        /// State the pipeline is in
        actual: State,
    },
    /// A pass run on its own thread panicked.
    #[error("Pass thread panicked")]
    Panicked,
}

/// Outcome of a completed pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    /// Output of each surviving consumer, keyed by consumer name, in
    /// registration order
    pub results: MapResultData,
    /// Failures of consumers left out of `results`
    pub failures: Vec<ConsumerFailure>,
    /// Number of samples fed
    pub samples: u64,
}

impl Report {
    /// Render the report as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Events that drive the pipeline.
#[derive(Debug)]
enum Event<'a> {
    /// A sample was read from the source
    SampleReceived(&'a Sample),
    /// The stop signal fired
    StopSignaled,
}

/// Operations the pipeline requests of its driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    /// Feed the next sample
    Continue,
    /// Stop reading input
    Exit,
}

#[derive(Debug)]
struct Slot {
    consumer: Box<dyn Consumer>,
    failed: bool,
}

/// Drives registered consumers through one pass at a time.
#[derive(Debug)]
pub struct Pipeline {
    slots: Vec<Slot>,
    state: State,
    failures: Vec<ConsumerFailure>,
    samples: u64,
    shutdown: Option<Watcher>,
    separator: Option<char>,
    timestamp_format: Option<TimestampFormat>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// An empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            state: State::Created,
            failures: Vec::new(),
            samples: 0,
            shutdown: None,
            separator: None,
            timestamp_format: None,
        }
    }

    /// Stop passes when `shutdown` fires. The signal is checked between
    /// samples.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Watcher) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Split lines read by [`Pipeline::run_lines`] on `separator` unless the
    /// call names its own.
    #[must_use]
    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = Some(separator);
        self
    }

    /// Rewrite formatted timestamps to epoch milliseconds before consumers
    /// see them.
    #[must_use]
    pub fn with_timestamp_format(mut self, format: TimestampFormat) -> Self {
        self.timestamp_format = Some(format);
        self
    }

    /// Register `consumer`. Consumers are driven in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateConsumer`] if the name is taken and
    /// [`Error::InvalidState`] once a pass has started.
    pub fn register(&mut self, consumer: Box<dyn Consumer>) -> Result<(), Error> {
        self.expect_state(&[State::Created], State::Created)?;
        if self.slots.iter().any(|s| s.consumer.name() == consumer.name()) {
            return Err(Error::DuplicateConsumer(consumer.name().to_string()));
        }
        debug!(consumer = %consumer.name(), "Registered consumer");
        self.slots.push(Slot {
            consumer,
            failed: false,
        });
        Ok(())
    }

    /// Names of the registered consumers in registration order.
    pub fn consumer_names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|s| s.consumer.name())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Failures recorded in the current pass.
    #[must_use]
    pub fn failures(&self) -> &[ConsumerFailure] {
        &self.failures
    }

    /// Start a pass, initializing every consumer.
    ///
    /// A pipeline may be initialized again once the previous pass finalized
    /// or was cancelled. Consumers that failed in a previous pass get another
    /// chance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] while a pass is in progress.
    pub fn initialize(&mut self) -> Result<(), Error> {
        self.expect_state(
            &[State::Created, State::Finalized, State::Cancelled],
            State::Created,
        )?;
        self.failures.clear();
        self.samples = 0;
        for slot in &mut self.slots {
            slot.failed = false;
            if let Err(err) = slot.consumer.initialize() {
                warn!(consumer = %slot.consumer.name(), error = %err, "Consumer failed to initialize");
                slot.failed = true;
                self.failures.push(ConsumerFailure {
                    consumer: slot.consumer.name().to_string(),
                    phase: Phase::Initialize,
                    message: err.to_string(),
                });
            }
        }
        info!(consumers = self.slots.len(), "Pass started");
        self.state = State::Initialized;
        Ok(())
    }

    /// Feed one sample to every surviving consumer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the stop signal fired, discarding the
    /// pass, and [`Error::InvalidState`] outside of a pass.
    pub fn process(&mut self, sample: &Sample) -> Result<(), Error> {
        self.expect_state(&[State::Initialized, State::Running], State::Running)?;
        let event = if self.stop_signaled() {
            Event::StopSignaled
        } else {
            Event::SampleReceived(sample)
        };
        match self.next(event) {
            Operation::Continue => Ok(()),
            Operation::Exit => Err(Error::Cancelled),
        }
    }

    /// End the pass, merging the output of every surviving consumer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSurvivingConsumers`] if no consumer emitted output
    /// and [`Error::InvalidState`] outside of a pass.
    pub fn finalize(&mut self) -> Result<Report, Error> {
        self.expect_state(&[State::Initialized, State::Running], State::Running)?;
        let mut results = MapResultData::new();
        for slot in self.slots.iter_mut().filter(|s| !s.failed) {
            match slot.consumer.finalize() {
                Ok(result) => {
                    results.put(slot.consumer.name(), result);
                }
                Err(err) => {
                    warn!(consumer = %slot.consumer.name(), error = %err, "Consumer failed to finalize");
                    slot.failed = true;
                    self.failures.push(ConsumerFailure {
                        consumer: slot.consumer.name().to_string(),
                        phase: Phase::Finalize,
                        message: err.to_string(),
                    });
                }
            }
        }
        self.state = State::Finalized;
        info!(
            samples = self.samples,
            surviving = results.len(),
            failures = self.failures.len(),
            "Pass finished"
        );

        let failures = std::mem::take(&mut self.failures);
        if results.is_empty() {
            return Err(Error::NoSurvivingConsumers { failures });
        }
        Ok(Report {
            results,
            failures,
            samples: self.samples,
        })
    }

    /// Run a whole pass over `samples`.
    ///
    /// # Errors
    ///
    /// See [`Pipeline::initialize`], [`Pipeline::process`] and
    /// [`Pipeline::finalize`].
    pub fn run<I>(&mut self, samples: I) -> Result<Report, Error>
    where
        I: IntoIterator<Item = Sample>,
    {
        self.initialize()?;
        for sample in samples {
            self.process(&sample)?;
        }
        self.finalize()
    }

    /// Run a whole pass over the lines of a results file, the first non-blank
    /// line being the header. `separator` takes precedence over the one set
    /// with [`Pipeline::with_separator`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Metadata`] if there is no header, otherwise see
    /// [`Pipeline::run`].
    pub fn run_lines<L, S>(&mut self, lines: L, separator: Option<char>) -> Result<Report, Error>
    where
        L: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let source = SampleSource::new(lines, separator.or(self.separator))?;
        self.run(source)
    }

    fn run_watched<I>(&mut self, samples: I, watcher: Option<Watcher>) -> Result<Report, Error>
    where
        I: IntoIterator<Item = Sample>,
    {
        let Some(watcher) = watcher else {
            return self.run(samples);
        };
        let own = self.shutdown.replace(watcher);
        let result = self.run(samples);
        self.shutdown = own;
        result
    }

    fn stop_signaled(&mut self) -> bool {
        // a watcher answers Ok(true) once, then SignalReceived
        self.shutdown
            .as_mut()
            .is_some_and(|watcher| watcher.try_recv().unwrap_or(true))
    }

    fn next(&mut self, event: Event<'_>) -> Operation {
        match event {
            Event::SampleReceived(sample) => {
                self.handle_sample(sample);
                Operation::Continue
            }
            Event::StopSignaled => {
                self.handle_stop();
                Operation::Exit
            }
        }
    }

    fn handle_sample(&mut self, sample: &Sample) {
        let normalized = self
            .timestamp_format
            .as_ref()
            .and_then(|format| format.normalize(sample));
        let sample = normalized.as_ref().unwrap_or(sample);
        self.state = State::Running;
        self.samples += 1;
        for slot in self.slots.iter_mut().filter(|s| !s.failed) {
            if let Err(err) = slot.consumer.consume(sample) {
                warn!(
                    consumer = %slot.consumer.name(),
                    row = sample.row(),
                    error = %err,
                    "Consumer failed, excluding it from the report"
                );
                slot.failed = true;
                self.failures.push(ConsumerFailure {
                    consumer: slot.consumer.name().to_string(),
                    phase: Phase::Update { row: sample.row() },
                    message: err.to_string(),
                });
            }
        }
    }

    fn handle_stop(&mut self) {
        info!(samples = self.samples, "Stop signaled, discarding pass");
        for slot in &mut self.slots {
            if let Err(err) = slot.consumer.initialize() {
                debug!(consumer = %slot.consumer.name(), error = %err, "Consumer failed to reset");
            }
        }
        self.failures.clear();
        self.samples = 0;
        self.state = State::Cancelled;
    }

    fn expect_state(&self, allowed: &[State], expected: State) -> Result<(), Error> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }
}

/// Run independent passes on their own threads.
///
/// Each pipeline is run over its own samples. Results are returned in input
/// order. With a `shutdown` watcher every pass registers its own watcher,
/// which stands in for the pipeline's for the duration of the pass. A pass
/// that cannot register because the signal was already received is
/// [`Error::Cancelled`].
pub fn run_passes<I>(
    passes: Vec<(&mut Pipeline, I)>,
    shutdown: Option<&Watcher>,
) -> Vec<Result<Report, Error>>
where
    I: IntoIterator<Item = Sample> + Send,
{
    std::thread::scope(|scope| {
        let handles: Vec<_> = passes
            .into_iter()
            .map(|(pipeline, samples)| {
                let watcher = shutdown.map(Watcher::register).transpose();
                scope.spawn(move || {
                    let watcher = watcher.map_err(|err| {
                        debug!(error = %err, "Pass not started");
                        Error::Cancelled
                    })?;
                    pipeline.run_watched(samples, watcher)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or(Err(Error::Panicked)))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        consumer::{
            self, SummaryConsumer,
            apdex::{Apdex, ThresholdSelector, Thresholds},
            top_errors::TopErrorsBySampler,
        },
        result::{ResultData, Value},
        sample::test_support::{HEADER, sample},
    };

    #[derive(Debug)]
    struct Failing {
        name: &'static str,
        fail_on_finalize: bool,
    }

    impl Consumer for Failing {
        fn name(&self) -> &str {
            self.name
        }

        fn initialize(&mut self) -> Result<(), consumer::Error> {
            Ok(())
        }

        fn consume(&mut self, _sample: &Sample) -> Result<(), consumer::Error> {
            if self.fail_on_finalize {
                Ok(())
            } else {
                Err(consumer::Error::Custom("boom".to_string()))
            }
        }

        fn finalize(&mut self) -> Result<MapResultData, consumer::Error> {
            Err(consumer::Error::Custom("late boom".to_string()))
        }
    }

    fn apdex() -> Box<dyn Consumer> {
        Box::new(SummaryConsumer::new(
            "apdex",
            Apdex::new(ThresholdSelector::new(Thresholds::new(150, 300))),
        ))
    }

    fn scenario() -> Vec<Sample> {
        vec![
            sample(0, "A", 100, true),
            sample(1, "A", 200, false),
            sample(2, "B", 50, true),
        ]
    }

    fn cells(report: &Report, consumer: &str, key: &str, key_column: usize) -> Vec<Value> {
        let table = report
            .results
            .get(consumer)
            .and_then(ResultData::as_map)
            .expect("consumer output");
        consumer::test_support::row(table, key_column, Some(key))
    }

    #[test]
    fn apdex_and_top_errors_end_to_end() {
        let mut pipeline = Pipeline::new();
        pipeline.register(apdex()).expect("register");
        pipeline
            .register(Box::new(SummaryConsumer::new("top5", TopErrorsBySampler)))
            .expect("register");
        let report = pipeline.run(scenario()).expect("report");

        assert_eq!(report.samples, 3);
        assert!(report.failures.is_empty());
        assert_eq!(report.results.keys().collect::<Vec<_>>(), ["apdex", "top5"]);

        let a = cells(&report, "apdex", "A", 3);
        assert!((consumer::test_support::num(&a[0]) - 0.75).abs() < 1e-10);
        let b = cells(&report, "apdex", "B", 3);
        assert!((consumer::test_support::num(&b[0]) - 1.0).abs() < 1e-10);

        let a = cells(&report, "top5", "A", 0);
        assert_eq!((a[1].clone(), a[2].clone()), (Value::Int(2), Value::Int(1)));
        let b = cells(&report, "top5", "B", 0);
        assert_eq!((b[1].clone(), b[2].clone()), (Value::Int(1), Value::Int(0)));
    }

    #[test]
    fn failing_consumer_is_isolated() {
        let mut pipeline = Pipeline::new();
        pipeline
            .register(Box::new(Failing {
                name: "broken",
                fail_on_finalize: false,
            }))
            .expect("register");
        pipeline.register(apdex()).expect("register");
        let report = pipeline.run(scenario()).expect("partial report is a success");

        assert_eq!(report.results.keys().collect::<Vec<_>>(), ["apdex"]);
        assert_eq!(
            report.failures,
            [ConsumerFailure {
                consumer: "broken".to_string(),
                phase: Phase::Update { row: 0 },
                message: "boom".to_string(),
            }]
        );
        let a = cells(&report, "apdex", "A", 3);
        assert!((consumer::test_support::num(&a[0]) - 0.75).abs() < 1e-10);
        assert_eq!(pipeline.state(), State::Finalized);
    }

    #[test]
    fn no_survivors_is_a_failure() {
        let mut pipeline = Pipeline::new();
        pipeline
            .register(Box::new(Failing {
                name: "early",
                fail_on_finalize: false,
            }))
            .expect("register");
        pipeline
            .register(Box::new(Failing {
                name: "late",
                fail_on_finalize: true,
            }))
            .expect("register");
        match pipeline.run(scenario()) {
            Err(Error::NoSurvivingConsumers { failures }) => {
                let phases: Vec<Phase> = failures.iter().map(|f| f.phase).collect();
                assert_eq!(phases, [Phase::Update { row: 0 }, Phase::Finalize]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut pipeline = Pipeline::new();
        pipeline.register(apdex()).expect("register");
        assert!(matches!(
            pipeline.register(apdex()),
            Err(Error::DuplicateConsumer(name)) if name == "apdex"
        ));
    }

    #[test]
    fn lifecycle_is_enforced() {
        let mut pipeline = Pipeline::new();
        pipeline.register(apdex()).expect("register");
        assert!(matches!(
            pipeline.process(&sample(0, "a", 1, true)),
            Err(Error::InvalidState {
                expected: State::Running,
                actual: State::Created
            })
        ));
        pipeline.initialize().expect("initialize");
        assert_eq!(pipeline.state(), State::Initialized);
        assert!(matches!(
            pipeline.register(apdex()),
            Err(Error::InvalidState { .. })
        ));
        pipeline.process(&sample(0, "a", 1, true)).expect("process");
        assert_eq!(pipeline.state(), State::Running);
        pipeline.finalize().expect("finalize");
        assert!(matches!(pipeline.finalize(), Err(Error::InvalidState { .. })));

        // a second pass starts from scratch
        let report = pipeline.run(scenario()).expect("second pass");
        assert_eq!(report.samples, 3);
    }

    #[test]
    fn stop_signal_discards_the_pass() {
        let (watcher, broadcaster) = sampleflow_signal::signal();
        let mut pipeline = Pipeline::new().with_shutdown(watcher);
        pipeline.register(apdex()).expect("register");
        pipeline.initialize().expect("initialize");
        pipeline.process(&sample(0, "A", 1, true)).expect("process");
        broadcaster.signal();
        assert!(matches!(
            pipeline.process(&sample(1, "A", 1, true)),
            Err(Error::Cancelled)
        ));
        assert_eq!(pipeline.state(), State::Cancelled);
        assert!(matches!(pipeline.finalize(), Err(Error::InvalidState { .. })));
    }

    #[test]
    fn lines_without_header_fail() {
        let mut pipeline = Pipeline::new();
        pipeline.register(apdex()).expect("register");
        assert!(matches!(
            pipeline.run_lines(["", " "], None),
            Err(Error::Metadata(metadata::Error::EmptyHeader))
        ));
    }

    #[test]
    fn run_over_lines_and_render_json() {
        let lines = [
            HEADER,
            "1000,100,A,200,OK,t-1,true,,100,10,1",
            "1001,200,A,500,Internal Server Error,t-1,false,,100,10,1",
        ];
        let mut pipeline = Pipeline::new();
        pipeline.register(apdex()).expect("register");
        let report = pipeline.run_lines(lines, None).expect("report");
        let json = report.to_json().expect("serializable");
        assert!(json.starts_with(r#"{"results":{"apdex":{"supportsControllersDiscrimination":true,"titles":["Apdex""#));
        assert!(json.ends_with(r#""failures":[],"samples":2}"#));
    }

    #[test]
    fn passes_run_independently() {
        let mut first = Pipeline::new();
        first.register(apdex()).expect("register");
        let mut second = Pipeline::new();
        second.register(apdex()).expect("register");

        let results = run_passes(
            vec![
                (&mut first, scenario()),
                (&mut second, vec![sample(0, "C", 1, true)]),
            ],
            None,
        );
        let samples: Vec<u64> = results
            .into_iter()
            .map(|r| r.expect("report").samples)
            .collect();
        assert_eq!(samples, [3, 1]);
    }

    #[test]
    fn passes_register_their_own_watchers() {
        let (mut watcher, broadcaster) = sampleflow_signal::signal();
        let mut first = Pipeline::new();
        first.register(apdex()).expect("register");
        let mut second = Pipeline::new();
        second.register(apdex()).expect("register");

        let results = run_passes(
            vec![(&mut first, scenario()), (&mut second, scenario())],
            Some(&watcher),
        );
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(broadcaster.peers(), 1);

        broadcaster.signal();
        let results = run_passes(
            vec![(&mut first, scenario()), (&mut second, scenario())],
            Some(&watcher),
        );
        assert!(results.iter().all(|r| matches!(r, Err(Error::Cancelled))));
        assert_eq!(first.state(), State::Cancelled);

        // once the caller has seen the signal no further pass starts
        assert_eq!(watcher.try_recv(), Ok(true));
        let results = run_passes(vec![(&mut first, scenario())], Some(&watcher));
        assert!(matches!(results[..], [Err(Error::Cancelled)]));
        assert_eq!(first.state(), State::Cancelled);
    }

    #[test]
    fn configured_separator_and_timestamp_format_apply_to_lines() {
        let lines = [
            "timeStamp|elapsed|label|success,flag",
            "1970-01-01 00:00:01|100|A|true,x",
        ];
        let format = TimestampFormat::new("%Y-%m-%d %H:%M:%S").expect("valid pattern");
        let mut pipeline = Pipeline::new()
            .with_separator('|')
            .with_timestamp_format(format);
        pipeline
            .register(Box::new(crate::consumer::aggregate::DateConsumer::new(
                "begin_date",
                crate::consumer::aggregate::Bound::Begin,
            )))
            .expect("register");
        let report = pipeline.run_lines(lines, None).expect("report");
        assert_eq!(
            report
                .results
                .get("begin_date")
                .and_then(ResultData::as_map)
                .and_then(|m| m.get(consumer::aggregate::VALUE)),
            Some(&ResultData::value(1_000_i64))
        );
    }
}

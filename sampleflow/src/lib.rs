//! The sampleflow report core
//!
//! This library turns the result log of a load test, one separator delimited
//! row per recorded sample, into aggregated report data: Apdex scores,
//! per-label statistics, error breakdowns and time series. Logs may be
//! arbitrarily large. Every consumer keeps bounded, per-key state and sees
//! each sample exactly once, in row order.
//!
//! Reading files and rendering HTML are left to callers. Hand the lines of a
//! results file to a [`Pipeline`], built by hand or from a [`Config`], and
//! serialize the [`pipeline::Report`] it returns.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod consumer;
pub mod convert;
pub mod pipeline;
pub mod result;
pub mod sample;
pub mod sort;

pub use config::Config;
pub use pipeline::{Pipeline, Report};
pub use sampleflow_signal as signal;

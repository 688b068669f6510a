//! Measurement collection for tpc-bench.
//!
//! Workloads record one sample per operation into a shared [`Measurement`];
//! the reporter pulls [`MeasurementSnapshot`]s from it and renders them with
//! [`format_snapshot`] in one of the [`OutputStyle`]s.

pub mod collector;
pub mod format;

pub use collector::{Measurement, MeasurementSnapshot, OpSummary};
pub use format::{format_snapshot, OutputStyle, ReportKind};

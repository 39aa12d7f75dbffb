//! `posefuse-runtime` – drives the estimator.
//!
//! # Modules
//!
//! - [`estimator`] – [`StateEstimator`][estimator::StateEstimator]: shared
//!   estimation state, bus ingest tasks, and the per-tick fuse-and-publish
//!   step.
//! - [`scheduler`] – [`FixedRateScheduler`][scheduler::FixedRateScheduler]:
//!   cooperative fixed-period loop that reports every overrunning tick.
//! - [`mode`] – [`SourceMode`][mode::SourceMode] (polled sensors or simulator
//!   ground truth) and the startup wait for first inputs.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: initialises
//!   the global `tracing` subscriber with an optional OTLP span exporter.
//!   Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export.

pub mod estimator;
pub mod mode;
pub mod scheduler;
pub mod telemetry;

pub use estimator::{EstimatorConfig, StateEstimator};
pub use mode::{SourceMode, WaitOutcome, wait_for_inputs};
pub use scheduler::{FixedRateScheduler, Periodic, SchedulerReport, TickPhases};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};

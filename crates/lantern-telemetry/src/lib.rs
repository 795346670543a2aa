//! This crate contains the tracing, logging, and OpenTelemetry primitives
//! used to instrument the lantern backend and its companion services.
//!
//! It provides three building blocks: the [`AxumTraceLayer`] middleware which
//! traces every inbound HTTP request, the [`span`] helpers for starting,
//! annotating, and ending spans at call sites, and [`Tracing`] to initialise
//! the process-wide subscribers and exporters.
pub mod instrumentation;
pub mod span;
pub mod tracing;

pub use instrumentation::AxumTraceLayer;
pub use tracing::Tracing;

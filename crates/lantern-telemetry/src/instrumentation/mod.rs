//! Instrumentation layers for HTTP server frameworks.
pub mod axum;

pub use axum::TraceLayer as AxumTraceLayer;

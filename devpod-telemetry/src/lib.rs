//! Tracing setup shared by the dev pod binaries and tests.

pub mod tracing;

pub use crate::tracing::{LogFlusher, TracingError, init_tracing};

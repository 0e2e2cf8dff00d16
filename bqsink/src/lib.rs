//! Resilient write path into Google BigQuery.
//!
//! [`bigquery::BigQueryWriter`] creates tables, streams rows with `insertAll` and drives load
//! jobs to completion. Every failure is reported as a [`error::SinkError`] whose
//! classification tells the caller whether the chunk should be redelivered.

pub mod bigquery;
pub mod error;
mod macros;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use bqsink_config as config;

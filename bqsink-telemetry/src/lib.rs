//! Logging setup shared by binaries built on the BigQuery writer.

pub mod tracing;

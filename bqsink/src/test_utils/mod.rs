//! Utilities for exercising [`crate::bigquery::BigQueryWriter`] without a network.
//!
//! [`fake_api::FakeBigQuery`] answers every remote call from scripted responses and records
//! what it was asked, together with the (possibly paused) tokio clock. Tests hand it to a
//! writer through [`connector::CountingConnector`], which also counts how often the writer
//! resolved a new client.
//!
//! - [`fake_api`] - scripted in-memory BigQuery
//! - [`connector`] - connector returning the fake
//! - [`fixtures`] - configurations, schemas and job resources used across tests
pub mod connector;
pub mod fake_api;
pub mod fixtures;

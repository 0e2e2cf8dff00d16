//! Configuration for the BigQuery writer.
//!
//! Holds the serde-deserializable [`shared::WriterConfig`] consumed by the writer and the
//! hierarchical loader that builds it from configuration files and environment variables.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config, load_config_from_dir};

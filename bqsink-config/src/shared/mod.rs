//! Shared configuration types for the BigQuery writer.

mod auth;
mod base;
mod writer;

pub use auth::{AuthConfig, DEFAULT_PRIVATE_KEY_PASSPHRASE};
pub use base::ValidationError;
pub use writer::{
    LoadConfig, SourceFormat, TimePartitioningConfig, TimeoutConfig, WriterConfig,
    MAX_CLUSTERING_FIELDS,
};

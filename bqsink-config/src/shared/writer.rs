use serde::Deserialize;

use crate::load::Config;
use crate::shared::{AuthConfig, ValidationError};

/// Maximum number of clustering columns BigQuery accepts on a table.
pub const MAX_CLUSTERING_FIELDS: usize = 4;

/// Complete configuration of a BigQuery writer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WriterConfig {
    /// Credential settings.
    pub auth: AuthConfig,
    /// HTTP timeouts applied to every remote call.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Drop invalid rows from streaming inserts instead of failing the whole request.
    #[serde(default)]
    pub skip_invalid_rows: bool,
    /// Accept values that do not match any column of the table schema.
    #[serde(default)]
    pub ignore_unknown_values: bool,
    /// Treat per-row insert errors with retryable reasons as a retryable batch failure.
    #[serde(default)]
    pub allow_retry_insert_errors: bool,
    /// Load job settings.
    #[serde(default)]
    pub load: LoadConfig,
    /// Time partitioning applied when tables are created.
    #[serde(default)]
    pub time_partitioning: Option<TimePartitioningConfig>,
    /// Clustering columns applied when tables are created.
    #[serde(default)]
    pub clustering_fields: Vec<String>,
    /// Location passed to job status lookups.
    #[serde(default)]
    pub location: Option<String>,
}

impl WriterConfig {
    /// Validates structural constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(partitioning) = &self.time_partitioning {
            partitioning.validate()?;
        }

        if self.clustering_fields.len() > MAX_CLUSTERING_FIELDS {
            return Err(ValidationError::TooManyClusteringFields {
                max: MAX_CLUSTERING_FIELDS,
                actual: self.clustering_fields.len(),
            });
        }

        if self
            .clustering_fields
            .iter()
            .any(|field| field.trim().is_empty())
        {
            return Err(ValidationError::InvalidFieldValue {
                field: "clustering_fields".to_string(),
                constraint: "must not contain empty names".to_string(),
            });
        }

        Ok(())
    }
}

impl Config for WriterConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["clustering_fields"];
}

/// HTTP timeouts, in seconds. Unset values leave the client default in place.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Connect timeout.
    #[serde(default)]
    pub open_timeout_secs: Option<u64>,
    /// Per-read timeout.
    #[serde(default)]
    pub read_timeout_secs: Option<u64>,
    /// Overall request timeout.
    #[serde(default)]
    pub send_timeout_secs: Option<u64>,
}

/// Settings for batch load jobs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoadConfig {
    /// Create the destination table when a load job reports it missing.
    #[serde(default)]
    pub auto_create_table: bool,
    /// Number of bad records BigQuery tolerates before failing the job.
    #[serde(default)]
    pub max_bad_records: u32,
    /// Submit jobs with a deterministic id so replays of the same chunk are deduplicated.
    #[serde(default)]
    pub prevent_duplicate_load: bool,
    /// Format of the uploaded payload.
    #[serde(default)]
    pub source_format: SourceFormat,
}

/// Format of a load job payload.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    #[default]
    #[serde(alias = "json", alias = "NEWLINE_DELIMITED_JSON")]
    NewlineDelimitedJson,
    #[serde(alias = "AVRO")]
    Avro,
    #[serde(alias = "CSV")]
    Csv,
}

impl SourceFormat {
    /// Returns the name BigQuery uses for this format.
    pub fn as_api_str(&self) -> &'static str {
        match self {
            SourceFormat::NewlineDelimitedJson => "NEWLINE_DELIMITED_JSON",
            SourceFormat::Avro => "AVRO",
            SourceFormat::Csv => "CSV",
        }
    }
}

/// Time partitioning applied to created tables.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimePartitioningConfig {
    /// Partition granularity, for example `DAY` or `HOUR`.
    pub partition_type: String,
    /// Column to partition by. Ingestion time is used when unset.
    #[serde(default)]
    pub field: Option<String>,
    /// Partition expiration in seconds.
    #[serde(default)]
    pub expiration_secs: Option<u64>,
}

impl TimePartitioningConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.partition_type.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "time_partitioning.partition_type".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

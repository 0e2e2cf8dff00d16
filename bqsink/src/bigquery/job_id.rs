use sha1::{Digest, Sha1};

use crate::bigquery::model::TableFieldSchema;
use crate::error::{ErrorKind, SinkError, SinkResult};
use crate::sink_error;

/// Prefix of every deterministic load job id.
pub const JOB_ID_PREFIX: &str = "fluentd_job_";

/// Derives the load job id for one delivery attempt of a chunk.
///
/// The id only depends on its arguments. `error_count` is the number of retryable failures
/// already observed for the chunk, so an attempt that follows a failed job gets a fresh id
/// while replays of the same attempt reuse the previous one.
pub fn load_job_id(
    chunk_id: &str,
    dataset_id: &str,
    table_id: &str,
    fields: &[TableFieldSchema],
    max_bad_records: u32,
    ignore_unknown_values: bool,
    error_count: Option<u32>,
) -> SinkResult<String> {
    let schema = serde_json::to_string(fields).map_err(schema_encoding_error)?;
    let error_count = error_count.map(|count| count.to_string()).unwrap_or_default();

    let mut hasher = Sha1::new();
    hasher.update(chunk_id.as_bytes());
    hasher.update(dataset_id.as_bytes());
    hasher.update(table_id.as_bytes());
    hasher.update(schema.as_bytes());
    hasher.update(max_bad_records.to_string().as_bytes());
    hasher.update(ignore_unknown_values.to_string().as_bytes());
    hasher.update(error_count.as_bytes());

    Ok(format!("{JOB_ID_PREFIX}{}", hex::encode(hasher.finalize())))
}

fn schema_encoding_error(err: serde_json::Error) -> SinkError {
    sink_error!(
        ErrorKind::SerializationError,
        "Failed to encode the load job schema",
        err,
        source: err
    )
}

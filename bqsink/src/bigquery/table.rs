use bqsink_config::shared::{TimePartitioningConfig, WriterConfig};

use crate::bigquery::model::{
    Clustering, TableDefinition, TableFieldSchema, TableReference, TableSchema, TimePartitioning,
};

/// Removes a trailing `$<digits>` partition decorator from a table id.
///
/// `events$20240101` becomes `events`. Ids without a purely numeric decorator are returned as
/// they are.
pub fn strip_partition_decorator(table_id: &str) -> &str {
    match table_id.rsplit_once('$') {
        Some((base, suffix))
            if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) =>
        {
            base
        }
        _ => table_id,
    }
}

/// Builds the `insertTable` body for `table_id`, applying the configured partitioning and
/// clustering.
pub fn table_definition(
    project_id: &str,
    dataset_id: &str,
    table_id: &str,
    fields: &[TableFieldSchema],
    config: &WriterConfig,
) -> TableDefinition {
    let clustering = (!config.clustering_fields.is_empty()).then(|| Clustering {
        fields: Some(config.clustering_fields.clone()),
    });

    TableDefinition {
        table_reference: TableReference::new(
            project_id,
            dataset_id,
            strip_partition_decorator(table_id),
        ),
        schema: TableSchema {
            fields: fields.to_vec(),
        },
        time_partitioning: config.time_partitioning.as_ref().map(time_partitioning),
        clustering,
    }
}

fn time_partitioning(config: &TimePartitioningConfig) -> TimePartitioning {
    let mut partitioning = TimePartitioning::new(config.partition_type.to_uppercase());
    partitioning.expiration_ms = config
        .expiration_secs
        .map(|secs| secs.saturating_mul(1000).to_string());
    partitioning.field = config.field.clone();
    partitioning
}

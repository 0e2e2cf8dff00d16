//! Wire models for the subset of the BigQuery v2 REST API the writer uses.
//!
//! Leaf resources come from `gcp_bigquery_client::model`. Columns, jobs and `insertAll`
//! bodies are defined here: columns keep their type as sent by the caller, job polling needs
//! a required state, and the client's insert request does not expose its rows.

use serde::{Deserialize, Serialize};

pub use gcp_bigquery_client::model::clustering::Clustering;
pub use gcp_bigquery_client::model::error_proto::ErrorProto;
pub use gcp_bigquery_client::model::table_reference::TableReference;
pub use gcp_bigquery_client::model::time_partitioning::TimePartitioning;

/// Load jobs always append to the destination table.
pub const WRITE_APPEND: &str = "WRITE_APPEND";

/// Forbids a load job from creating its destination table.
pub const CREATE_NEVER: &str = "CREATE_NEVER";

/// Terminal job state.
pub const JOB_STATE_DONE: &str = "DONE";

/// A column of a table schema. Nested `RECORD` columns carry their own `fields`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableFieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<TableFieldSchema>,
}

impl TableFieldSchema {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            mode: None,
            fields: Vec::new(),
        }
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    /// Creates a `RECORD` column holding `fields`.
    pub fn record(name: impl Into<String>, fields: Vec<TableFieldSchema>) -> Self {
        Self {
            fields,
            ..Self::new(name, "RECORD")
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    #[serde(default)]
    pub fields: Vec<TableFieldSchema>,
}

/// Body of an `insertTable` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinition {
    pub table_reference: TableReference,
    pub schema: TableSchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_partitioning: Option<TimePartitioning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clustering: Option<Clustering>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReference {
    pub project_id: String,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfigurationLoad {
    pub destination_table: TableReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<TableSchema>,
    pub write_disposition: String,
    pub source_format: String,
    pub ignore_unknown_values: bool,
    pub max_bad_records: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_disposition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfiguration {
    pub load: JobConfigurationLoad,
}

/// Body of an `insertJob` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub configuration: JobConfiguration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_reference: Option<JobReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_result: Option<ErrorProto>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorProto>,
}

impl JobStatus {
    pub fn is_done(&self) -> bool {
        self.state == JOB_STATE_DONE
    }
}

/// Job as returned by `getJob` and `insertJob`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResource {
    pub job_reference: JobReference,
    pub status: JobStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_id: Option<String>,
    pub json: serde_json::Value,
}

impl InsertRow {
    pub fn new(json: serde_json::Value) -> Self {
        Self {
            insert_id: None,
            json,
        }
    }
}

/// Body of an `insertAll` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertAllRequest {
    pub rows: Vec<InsertRow>,
    pub skip_invalid_rows: bool,
    pub ignore_unknown_values: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_suffix: Option<String>,
}

/// Errors reported for the row at `index` of the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertError {
    pub index: u32,
    #[serde(default)]
    pub errors: Vec<ErrorProto>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertAllResponse {
    #[serde(default)]
    pub insert_errors: Vec<InsertError>,
}

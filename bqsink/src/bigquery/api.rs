use std::sync::Arc;

use async_trait::async_trait;
use bqsink_config::shared::TimeoutConfig;
use bytes::Bytes;
use thiserror::Error;

use crate::bigquery::auth::AuthStrategy;
use crate::bigquery::model::{
    InsertAllRequest, InsertAllResponse, Job, JobReference, JobResource, TableDefinition,
    TableSchema,
};
use crate::error::SinkResult;

/// Failure reported by a remote BigQuery call.
///
/// `status` is `None` when no HTTP response was received at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}", display_api_error(.status, .reason, .message))]
pub struct ApiError {
    pub status: Option<u16>,
    pub reason: Option<String>,
    pub message: String,
}

fn display_api_error(status: &Option<u16>, reason: &Option<String>, message: &str) -> String {
    match (status, reason) {
        (Some(status), Some(reason)) => format!("{status} {reason}: {message}"),
        (Some(status), None) => format!("{status}: {message}"),
        (None, _) => format!("transport error: {message}"),
    }
}

impl ApiError {
    pub fn new(status: u16, reason: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            reason: reason.map(str::to_owned),
            message: message.into(),
        }
    }

    /// Creates an error for a request that never got a response.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            reason: None,
            message: message.into(),
        }
    }

    /// `insertTable` conflict on a table that is already there.
    pub fn is_already_exists(&self) -> bool {
        self.status == Some(409) && self.message.contains("Already Exists")
    }

    /// `insertJob` rejection because the destination table does not exist.
    pub fn is_table_not_found(&self) -> bool {
        self.status == Some(404)
            && self
                .message
                .to_ascii_lowercase()
                .contains("not found: table")
    }

    /// `insertJob` conflict because a job with the same id was already submitted.
    pub fn is_duplicate_job(&self) -> bool {
        self.status == Some(409) && self.message.contains("Job")
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}

/// Remote operations the writer consumes.
///
/// Implemented over HTTP by [`crate::bigquery::RestBigQueryApi`] and in memory by the test
/// fake.
#[async_trait]
pub trait BigQueryApi: Send + Sync {
    async fn insert_table(
        &self,
        project_id: &str,
        dataset_id: &str,
        table: &TableDefinition,
    ) -> Result<(), ApiError>;

    async fn get_table(
        &self,
        project_id: &str,
        dataset_id: &str,
        table_id: &str,
    ) -> Result<TableSchema, ApiError>;

    async fn insert_all(
        &self,
        project_id: &str,
        dataset_id: &str,
        table_id: &str,
        request: &InsertAllRequest,
    ) -> Result<InsertAllResponse, ApiError>;

    /// Submits a load job whose data is `upload`.
    async fn insert_job(
        &self,
        project_id: &str,
        job: &Job,
        upload: Bytes,
    ) -> Result<JobReference, ApiError>;

    async fn get_job(
        &self,
        project_id: &str,
        job_id: &str,
        location: Option<&str>,
    ) -> Result<JobResource, ApiError>;
}

/// Produces an authorized [`BigQueryApi`] handle.
///
/// The writer calls this whenever its cached handle is missing or expired.
#[async_trait]
pub trait BigQueryConnector: Send + Sync {
    async fn connect(
        &self,
        auth: &AuthStrategy,
        timeouts: &TimeoutConfig,
    ) -> SinkResult<Arc<dyn BigQueryApi>>;
}

mod api;
mod auth;
pub mod classify;
mod job_id;
pub mod metrics;
mod model;
mod rest;
mod table;
mod writer;

pub use api::{ApiError, BigQueryApi, BigQueryConnector};
pub use auth::{AuthStrategy, Authorization, BIGQUERY_SCOPE, resolve_authorization};
pub use job_id::{JOB_ID_PREFIX, load_job_id};
pub use model::{
    Clustering, ErrorProto, InsertAllRequest, InsertAllResponse, InsertError, InsertRow, Job,
    JobConfiguration, JobConfigurationLoad, JobReference, JobResource, JobStatus,
    TableDefinition, TableFieldSchema, TableReference, TableSchema, TimePartitioning,
};
pub use rest::{RestBigQueryApi, RestConnector};
pub use table::{strip_partition_decorator, table_definition};
pub use writer::{BigQueryWriter, CLIENT_TTL, JOB_POLL_INTERVAL, MAX_CREATE_TABLE_ATTEMPTS};

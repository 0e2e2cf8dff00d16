use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bqsink_config::shared::WriterConfig;
use bytes::Bytes;
use metrics::counter;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use crate::bigquery::api::{BigQueryApi, BigQueryConnector};
use crate::bigquery::auth::AuthStrategy;
use crate::bigquery::classify::{
    ErrorClassification, api_error_to_sink_error, classify_api_error, is_retryable_insert_reason,
    is_retryable_reason,
};
use crate::bigquery::job_id::load_job_id;
use crate::bigquery::metrics::{
    BQSINK_CREATE_TABLE_RETRIES_TOTAL, BQSINK_INSERT_ROW_ERRORS_TOTAL,
    BQSINK_LOAD_JOB_FAILURES_TOTAL, BQSINK_LOAD_JOBS_SUBMITTED_TOTAL, register_metrics,
};
use crate::bigquery::model::{
    CREATE_NEVER, InsertAllRequest, InsertRow, Job, JobConfiguration, JobConfigurationLoad,
    JobReference, TableFieldSchema, TableReference, TableSchema, WRITE_APPEND,
};
use crate::bigquery::rest::RestConnector;
use crate::bigquery::table::{strip_partition_decorator, table_definition};
use crate::bail;
use crate::error::{ErrorKind, SinkResult};

/// How long an authorized client is reused before credentials are resolved again.
pub const CLIENT_TTL: Duration = Duration::from_secs(30 * 60);

/// Delay between two status lookups of a running load job.
pub const JOB_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Maximum number of `insertTable` calls made by a single table creation.
pub const MAX_CREATE_TABLE_ATTEMPTS: u32 = 3;

/// Delay before the second table creation attempt. Doubles for every further attempt.
const INITIAL_CREATE_TABLE_BACKOFF: Duration = Duration::from_secs(1);

/// Returns the delay to wait after the failed `attempt` (1-based) of a table creation.
fn create_table_backoff(attempt: u32) -> Duration {
    INITIAL_CREATE_TABLE_BACKOFF * 2u32.saturating_pow(attempt.saturating_sub(1))
}

struct CachedClient {
    api: Arc<dyn BigQueryApi>,
    expires_at: Instant,
}

/// State shared by concurrent callers of the same writer.
///
/// Never held across a sleep.
#[derive(Default)]
struct Inner {
    /// Authorized client, `None` until first use and after every remote failure.
    client: Option<CachedClient>,
    /// Retryable load job failures observed per chunk. Absence means zero.
    chunk_errors: HashMap<String, u32>,
}

/// Delivers chunks of rows into BigQuery tables.
///
/// Every public operation awaits the remote calls it makes. Failures are returned as
/// [`SinkError`]s of kind [`ErrorKind::RetryableError`], [`ErrorKind::UnretryableError`],
/// [`ErrorKind::ConfigError`] or [`ErrorKind::TableCreatedRetryLater`]; the caller owns
/// redelivery of the chunk.
///
/// Cloning is cheap and clones share the cached client and the per chunk error counters.
#[derive(Clone)]
pub struct BigQueryWriter<C = RestConnector> {
    config: Arc<WriterConfig>,
    auth: AuthStrategy,
    connector: C,
    inner: Arc<Mutex<Inner>>,
}

impl BigQueryWriter<RestConnector> {
    /// Creates a writer talking to the public BigQuery endpoints.
    pub fn new(config: WriterConfig) -> SinkResult<Self> {
        Self::with_connector(config, RestConnector::new())
    }
}

impl<C> BigQueryWriter<C>
where
    C: BigQueryConnector,
{
    /// Creates a writer whose clients are produced by `connector`.
    ///
    /// Fails with [`ErrorKind::ConfigError`] when the configuration is invalid or names an
    /// unknown auth method. Credentials themselves are only resolved on first use.
    pub fn with_connector(config: WriterConfig, connector: C) -> SinkResult<Self> {
        if let Err(err) = config.validate() {
            bail!(
                ErrorKind::ConfigError,
                "Invalid writer configuration",
                err.to_string(),
                source: err
            );
        }

        let auth = AuthStrategy::from_config(&config.auth)?;
        register_metrics();

        Ok(Self {
            config: Arc::new(config),
            auth,
            connector,
            inner: Arc::new(Mutex::new(Inner::default())),
        })
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Returns the cached client, resolving a new one when it is missing or expired.
    pub async fn client(&self) -> SinkResult<Arc<dyn BigQueryApi>> {
        let mut inner = self.inner.lock().await;

        if let Some(cached) = &inner.client {
            if Instant::now() < cached.expires_at {
                return Ok(cached.api.clone());
            }
            debug!("cached bigquery client expired");
        }

        let api = self
            .connector
            .connect(&self.auth, &self.config.timeouts)
            .await?;
        inner.client = Some(CachedClient {
            api: api.clone(),
            expires_at: Instant::now() + CLIENT_TTL,
        });

        debug!(method = self.auth.name(), "resolved new bigquery client");

        Ok(api)
    }

    /// Drops the cached client so that the next call resolves a fresh one.
    pub async fn invalidate_client(&self) {
        self.inner.lock().await.client = None;
    }

    /// Returns the number of retryable load job failures recorded for `chunk_id`.
    pub async fn chunk_error_count(&self, chunk_id: &str) -> Option<u32> {
        self.inner.lock().await.chunk_errors.get(chunk_id).copied()
    }

    async fn increment_chunk_errors(&self, chunk_id: &str) -> u32 {
        let mut inner = self.inner.lock().await;
        let count = inner.chunk_errors.entry(chunk_id.to_owned()).or_insert(0);
        *count += 1;
        *count
    }

    async fn clear_chunk_errors(&self, chunk_id: &str) {
        self.inner.lock().await.chunk_errors.remove(chunk_id);
    }

    /// Creates `table_id` with `fields`, stripping a `$<digits>` partition decorator first.
    ///
    /// A table that already exists counts as created. Retryable failures are retried in place
    /// up to [`MAX_CREATE_TABLE_ATTEMPTS`] calls in total, after which, or on any other failure,
    /// an [`ErrorKind::UnretryableError`] is returned.
    pub async fn create_table(
        &self,
        project_id: &str,
        dataset_id: &str,
        table_id: &str,
        fields: &[TableFieldSchema],
    ) -> SinkResult<()> {
        let table_id = strip_partition_decorator(table_id);
        let definition = table_definition(project_id, dataset_id, table_id, fields, &self.config);

        let mut attempt = 1;
        loop {
            let api = self.client().await?;
            let err = match api.insert_table(project_id, dataset_id, &definition).await {
                Ok(()) => {
                    info!(project_id, dataset_id, table_id, "created bigquery table");
                    // The handle is refreshed after a schema change.
                    self.invalidate_client().await;
                    return Ok(());
                }
                Err(err) => err,
            };

            self.invalidate_client().await;

            if err.is_already_exists() {
                debug!(project_id, dataset_id, table_id, "bigquery table already exists");
                return Ok(());
            }

            let classification = classify_api_error(&err);
            if classification.is_retryable() && attempt < MAX_CREATE_TABLE_ATTEMPTS {
                let backoff = create_table_backoff(attempt);
                warn!(
                    project_id,
                    dataset_id,
                    table_id,
                    status = ?err.status,
                    reason = ?err.reason,
                    message = %err.message,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "table creation failed, retrying"
                );
                counter!(BQSINK_CREATE_TABLE_RETRIES_TOTAL).increment(1);

                sleep(backoff).await;
                attempt += 1;
                continue;
            }

            error!(
                project_id,
                dataset_id,
                table_id,
                status = ?err.status,
                reason = ?err.reason,
                message = %err.message,
                attempt,
                "table creation failed"
            );

            bail!(
                ErrorKind::UnretryableError,
                "Table creation failed",
                detail = format!("{project_id}.{dataset_id}.{table_id} after {attempt} attempt(s): {err}"),
                source: err
            );
        }
    }

    /// Reads the schema of `table_id`.
    pub async fn fetch_schema(
        &self,
        project_id: &str,
        dataset_id: &str,
        table_id: &str,
    ) -> SinkResult<Vec<TableFieldSchema>> {
        let table_id = strip_partition_decorator(table_id);
        let api = self.client().await?;

        match api.get_table(project_id, dataset_id, table_id).await {
            Ok(schema) => {
                debug!(project_id, dataset_id, table_id, fields = schema.fields.len(), "fetched table schema");
                Ok(schema.fields)
            }
            Err(err) => {
                self.invalidate_client().await;
                error!(
                    project_id,
                    dataset_id,
                    table_id,
                    status = ?err.status,
                    reason = ?err.reason,
                    message = %err.message,
                    "fetching table schema failed"
                );
                Err(api_error_to_sink_error("Fetching table schema failed", err))
            }
        }
    }

    /// Streams `rows` into `table_id` with `insertAll`.
    ///
    /// Row errors are logged and otherwise ignored unless `allow_retry_insert_errors` is set,
    /// in which case they fail the call, retryably when any of their reasons is retryable.
    pub async fn insert_rows(
        &self,
        project_id: &str,
        dataset_id: &str,
        table_id: &str,
        rows: Vec<InsertRow>,
        template_suffix: Option<&str>,
    ) -> SinkResult<()> {
        let row_count = rows.len();
        let request = InsertAllRequest {
            rows,
            skip_invalid_rows: self.config.skip_invalid_rows,
            ignore_unknown_values: self.config.ignore_unknown_values,
            template_suffix: template_suffix.map(str::to_owned),
        };

        let api = self.client().await?;
        let response = match api
            .insert_all(project_id, dataset_id, table_id, &request)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                self.invalidate_client().await;
                let classification = classify_api_error(&err);
                if classification.is_retryable() {
                    warn!(
                        project_id,
                        dataset_id,
                        table_id,
                        status = ?err.status,
                        reason = ?err.reason,
                        message = %err.message,
                        "streaming insert failed"
                    );
                } else {
                    error!(
                        project_id,
                        dataset_id,
                        table_id,
                        status = ?err.status,
                        reason = ?err.reason,
                        message = %err.message,
                        "streaming insert failed"
                    );
                }
                return Err(api_error_to_sink_error("Streaming insert failed", err));
            }
        };

        if response.insert_errors.is_empty() {
            debug!(project_id, dataset_id, table_id, rows = row_count, "streamed rows");
            return Ok(());
        }

        counter!(BQSINK_INSERT_ROW_ERRORS_TOTAL).increment(response.insert_errors.len() as u64);
        warn!(
            project_id,
            dataset_id,
            table_id,
            rows = row_count,
            insert_errors = ?response.insert_errors,
            "streaming insert reported row errors"
        );

        if !self.config.allow_retry_insert_errors {
            return Ok(());
        }

        let retryable = response
            .insert_errors
            .iter()
            .flat_map(|insert_error| &insert_error.errors)
            .any(|error| is_retryable_insert_reason(error.reason.as_deref()));
        let detail = format!(
            "{} of {row_count} row(s) rejected by {project_id}.{dataset_id}.{table_id}",
            response.insert_errors.len()
        );

        if retryable {
            bail!(
                ErrorKind::RetryableError,
                "Streaming insert reported retryable row errors",
                detail = detail
            );
        }

        bail!(
            ErrorKind::UnretryableError,
            "Streaming insert reported row errors",
            detail = detail
        )
    }

    /// Submits `upload` as a load job into `table_id` and waits for it to finish.
    ///
    /// With `prevent_duplicate_load` the job id is derived from the chunk and its previous
    /// failures, and a conflicting submission is treated as already accepted. With
    /// `auto_create_table` a missing table is created and
    /// [`ErrorKind::TableCreatedRetryLater`] is returned so the chunk gets redelivered.
    pub async fn create_load_job(
        &self,
        chunk_id: &str,
        project_id: &str,
        dataset_id: &str,
        table_id: &str,
        upload: Bytes,
        fields: &[TableFieldSchema],
    ) -> SinkResult<()> {
        let job_id = if self.config.load.prevent_duplicate_load {
            let error_count = self.chunk_error_count(chunk_id).await;
            Some(load_job_id(
                chunk_id,
                dataset_id,
                table_id,
                fields,
                self.config.load.max_bad_records,
                self.config.ignore_unknown_values,
                error_count,
            )?)
        } else {
            None
        };

        let api = self.client().await?;
        let schema = self
            .schema_for_load(api.as_ref(), project_id, dataset_id, table_id, fields)
            .await?;

        let job = Job {
            configuration: JobConfiguration {
                load: JobConfigurationLoad {
                    destination_table: TableReference::new(project_id, dataset_id, table_id),
                    schema,
                    write_disposition: WRITE_APPEND.to_owned(),
                    source_format: self.config.load.source_format.as_api_str().to_owned(),
                    ignore_unknown_values: self.config.ignore_unknown_values,
                    max_bad_records: self.config.load.max_bad_records,
                    create_disposition: self
                        .config
                        .time_partitioning
                        .as_ref()
                        .map(|_| CREATE_NEVER.to_owned()),
                },
            },
            job_reference: job_id.as_ref().map(|job_id| JobReference {
                project_id: project_id.to_owned(),
                job_id: job_id.clone(),
                location: None,
            }),
        };

        let err = match api.insert_job(project_id, &job, upload).await {
            Ok(reference) => {
                counter!(BQSINK_LOAD_JOBS_SUBMITTED_TOTAL).increment(1);
                info!(chunk_id, project_id, dataset_id, table_id, job_id = %reference.job_id, "submitted load job");

                let location = self
                    .config
                    .location
                    .as_deref()
                    .or(reference.location.as_deref());
                self.poll_load_job(chunk_id, project_id, dataset_id, &reference.job_id, table_id, location)
                    .await?;
                self.clear_chunk_errors(chunk_id).await;
                return Ok(());
            }
            Err(err) => err,
        };

        self.invalidate_client().await;
        error!(
            chunk_id,
            project_id,
            dataset_id,
            table_id,
            job_id = ?job_id,
            status = ?err.status,
            reason = ?err.reason,
            message = %err.message,
            "load job submission failed"
        );

        if self.config.load.auto_create_table && err.is_table_not_found() {
            self.create_table(project_id, dataset_id, table_id, fields)
                .await?;
            bail!(
                ErrorKind::TableCreatedRetryLater,
                "Destination table created, send rows next time",
                detail = format!("{project_id}.{dataset_id}.{}", strip_partition_decorator(table_id)),
                source: err
            );
        }

        if let Some(job_id) = job_id.as_deref() {
            if err.is_duplicate_job() {
                info!(chunk_id, job_id, "load job was already submitted, waiting for it");
                self.wait_load_job(chunk_id, project_id, dataset_id, job_id, table_id)
                    .await?;
                self.clear_chunk_errors(chunk_id).await;
                return Ok(());
            }
        }

        let err = api_error_to_sink_error("Load job submission failed", err);
        record_load_job_failure(err.classification());
        Err(err)
    }

    /// Returns the schema to send with a load job: none when the table already exists.
    async fn schema_for_load(
        &self,
        api: &dyn BigQueryApi,
        project_id: &str,
        dataset_id: &str,
        table_id: &str,
        fields: &[TableFieldSchema],
    ) -> SinkResult<Option<TableSchema>> {
        let base_table_id = strip_partition_decorator(table_id);

        match api.get_table(project_id, dataset_id, base_table_id).await {
            Ok(_) => Ok(None),
            Err(err) => {
                debug!(
                    project_id,
                    dataset_id,
                    table_id = base_table_id,
                    status = ?err.status,
                    message = %err.message,
                    "destination table lookup failed"
                );
                if !err.is_not_found() {
                    self.invalidate_client().await;
                }
                if fields.is_empty() {
                    bail!(
                        ErrorKind::UnretryableError,
                        "Schema is empty",
                        detail = format!("{project_id}.{dataset_id}.{base_table_id} could not be looked up and no schema was given"),
                        source: err
                    );
                }

                Ok(Some(TableSchema {
                    fields: fields.to_vec(),
                }))
            }
        }
    }

    /// Polls `job_id` every [`JOB_POLL_INTERVAL`] until it is done.
    ///
    /// A terminal error with a retryable reason bumps the error counter of `chunk_id` and
    /// fails retryably; any other terminal error clears it and fails unretryably.
    pub async fn wait_load_job(
        &self,
        chunk_id: &str,
        project_id: &str,
        dataset_id: &str,
        job_id: &str,
        table_id: &str,
    ) -> SinkResult<()> {
        let location = self.config.location.clone();
        self.poll_load_job(
            chunk_id,
            project_id,
            dataset_id,
            job_id,
            table_id,
            location.as_deref(),
        )
        .await
    }

    async fn poll_load_job(
        &self,
        chunk_id: &str,
        project_id: &str,
        dataset_id: &str,
        job_id: &str,
        table_id: &str,
        location: Option<&str>,
    ) -> SinkResult<()> {
        let started = Instant::now();

        let job = loop {
            let api = self.client().await?;
            let job = match api.get_job(project_id, job_id, location).await {
                Ok(job) => job,
                Err(err) => {
                    self.invalidate_client().await;
                    error!(
                        chunk_id,
                        project_id,
                        dataset_id,
                        table_id,
                        job_id,
                        status = ?err.status,
                        reason = ?err.reason,
                        message = %err.message,
                        "load job status lookup failed"
                    );
                    return Err(api_error_to_sink_error("Load job status lookup failed", err));
                }
            };

            if job.status.is_done() {
                break job;
            }

            debug!(
                job_id,
                state = %job.status.state,
                elapsed_secs = started.elapsed().as_secs(),
                "waiting for load job to finish"
            );
            sleep(JOB_POLL_INTERVAL).await;
        };

        for row_error in &job.status.errors {
            error!(
                chunk_id,
                job_id,
                project_id,
                dataset_id,
                table_id,
                reason = ?row_error.reason,
                location = ?row_error.location,
                message = ?row_error.message,
                "load job reported an error"
            );
        }

        let Some(error_result) = job.status.error_result else {
            debug!(job_id, elapsed_secs = started.elapsed().as_secs(), "load job finished");
            return Ok(());
        };

        error!(
            chunk_id,
            job_id,
            project_id,
            dataset_id,
            table_id,
            reason = ?error_result.reason,
            message = ?error_result.message,
            "load job failed"
        );

        let detail = format!(
            "job {job_id}: {}: {}",
            error_result.reason.as_deref().unwrap_or("unknown"),
            error_result.message.as_deref().unwrap_or_default()
        );

        if is_retryable_reason(error_result.reason.as_deref()) {
            let failures = self.increment_chunk_errors(chunk_id).await;
            debug!(chunk_id, failures, "recorded retryable load job failure");
            record_load_job_failure(ErrorClassification::Retryable);

            bail!(
                ErrorKind::RetryableError,
                "Load job failed, retry",
                detail = detail
            );
        }

        self.clear_chunk_errors(chunk_id).await;
        record_load_job_failure(ErrorClassification::Unretryable);

        bail!(
            ErrorKind::UnretryableError,
            "Load job failed, cannot retry",
            detail = detail
        )
    }
}

fn record_load_job_failure(classification: ErrorClassification) {
    counter!(BQSINK_LOAD_JOB_FAILURES_TOTAL, "classification" => classification.as_str())
        .increment(1);
}

impl<C> fmt::Debug for BigQueryWriter<C> {
    /// Formats the writer without credentials or client state.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BigQueryWriter")
            .field("auth", &self.auth.name())
            .field("config", &self.config)
            .finish()
    }
}

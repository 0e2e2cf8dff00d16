use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use crate::bigquery::{
    ApiError, BigQueryApi, InsertAllRequest, InsertAllResponse, Job, JobReference, JobResource,
    TableDefinition, TableSchema,
};
use crate::test_utils::fixtures::job_done;

/// A remote call received by [`FakeBigQuery`].
#[derive(Debug, Clone)]
pub enum FakeCall {
    InsertTable {
        dataset_id: String,
        table: TableDefinition,
    },
    GetTable {
        dataset_id: String,
        table_id: String,
    },
    InsertAll {
        table_id: String,
        request: InsertAllRequest,
    },
    InsertJob {
        job: Job,
        upload: Bytes,
    },
    GetJob {
        job_id: String,
        location: Option<String>,
    },
}

/// A [`FakeCall`] together with the tokio time it arrived at.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub at: Instant,
    pub call: FakeCall,
}

#[derive(Default)]
struct State {
    tables: HashMap<(String, String), TableSchema>,
    insert_table: VecDeque<Result<(), ApiError>>,
    get_table: VecDeque<Result<TableSchema, ApiError>>,
    insert_all: VecDeque<Result<InsertAllResponse, ApiError>>,
    insert_job: VecDeque<Result<JobReference, ApiError>>,
    get_job: VecDeque<Result<JobResource, ApiError>>,
    calls: Vec<RecordedCall>,
}

/// In-memory BigQuery that answers with scripted responses.
///
/// Each operation pops its next scripted response. When none is queued it falls back to the
/// behavior of a healthy service: created tables are remembered and served by `get_table`,
/// inserts succeed, jobs are accepted and reported done.
#[derive(Default)]
pub struct FakeBigQuery {
    state: Mutex<State>,
}

impl FakeBigQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an existing table.
    pub fn with_table(self, dataset_id: &str, table_id: &str, schema: TableSchema) -> Self {
        self.lock()
            .tables
            .insert((dataset_id.to_owned(), table_id.to_owned()), schema);
        self
    }

    pub fn push_insert_table(&self, response: Result<(), ApiError>) {
        self.lock().insert_table.push_back(response);
    }

    pub fn push_get_table(&self, response: Result<TableSchema, ApiError>) {
        self.lock().get_table.push_back(response);
    }

    pub fn push_insert_all(&self, response: Result<InsertAllResponse, ApiError>) {
        self.lock().insert_all.push_back(response);
    }

    pub fn push_insert_job(&self, response: Result<JobReference, ApiError>) {
        self.lock().insert_job.push_back(response);
    }

    pub fn push_get_job(&self, response: Result<JobResource, ApiError>) {
        self.lock().get_job.push_back(response);
    }

    /// Returns every call received so far, oldest first.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn insert_table_calls(&self) -> Vec<RecordedCall> {
        self.calls_matching(|call| matches!(call, FakeCall::InsertTable { .. }))
    }

    pub fn get_table_calls(&self) -> Vec<RecordedCall> {
        self.calls_matching(|call| matches!(call, FakeCall::GetTable { .. }))
    }

    pub fn insert_job_calls(&self) -> Vec<RecordedCall> {
        self.calls_matching(|call| matches!(call, FakeCall::InsertJob { .. }))
    }

    pub fn get_job_calls(&self) -> Vec<RecordedCall> {
        self.calls_matching(|call| matches!(call, FakeCall::GetJob { .. }))
    }

    /// Returns the jobs submitted so far.
    pub fn submitted_jobs(&self) -> Vec<Job> {
        self.lock()
            .calls
            .iter()
            .filter_map(|recorded| match &recorded.call {
                FakeCall::InsertJob { job, .. } => Some(job.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn has_table(&self, dataset_id: &str, table_id: &str) -> bool {
        self.lock()
            .tables
            .contains_key(&(dataset_id.to_owned(), table_id.to_owned()))
    }

    fn calls_matching(&self, predicate: impl Fn(&FakeCall) -> bool) -> Vec<RecordedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|recorded| predicate(&recorded.call))
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panicking test poisons the lock; the state is still usable for its assertions.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(state: &mut State, call: FakeCall) {
        state.calls.push(RecordedCall {
            at: Instant::now(),
            call,
        });
    }
}

#[async_trait]
impl BigQueryApi for FakeBigQuery {
    async fn insert_table(
        &self,
        project_id: &str,
        dataset_id: &str,
        table: &TableDefinition,
    ) -> Result<(), ApiError> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            FakeCall::InsertTable {
                dataset_id: dataset_id.to_owned(),
                table: table.clone(),
            },
        );

        if let Some(response) = state.insert_table.pop_front() {
            return response;
        }

        let key = (
            dataset_id.to_owned(),
            table.table_reference.table_id.clone(),
        );
        if state.tables.contains_key(&key) {
            return Err(ApiError::new(
                409,
                Some("duplicate"),
                format!(
                    "Already Exists: Table {project_id}:{dataset_id}.{}",
                    table.table_reference.table_id
                ),
            ));
        }

        state.tables.insert(key, table.schema.clone());
        Ok(())
    }

    async fn get_table(
        &self,
        project_id: &str,
        dataset_id: &str,
        table_id: &str,
    ) -> Result<TableSchema, ApiError> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            FakeCall::GetTable {
                dataset_id: dataset_id.to_owned(),
                table_id: table_id.to_owned(),
            },
        );

        if let Some(response) = state.get_table.pop_front() {
            return response;
        }

        state
            .tables
            .get(&(dataset_id.to_owned(), table_id.to_owned()))
            .cloned()
            .ok_or_else(|| {
                ApiError::new(
                    404,
                    Some("notFound"),
                    format!("Not found: Table {project_id}:{dataset_id}.{table_id}"),
                )
            })
    }

    async fn insert_all(
        &self,
        _project_id: &str,
        _dataset_id: &str,
        table_id: &str,
        request: &InsertAllRequest,
    ) -> Result<InsertAllResponse, ApiError> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            FakeCall::InsertAll {
                table_id: table_id.to_owned(),
                request: request.clone(),
            },
        );

        state
            .insert_all
            .pop_front()
            .unwrap_or_else(|| Ok(InsertAllResponse::default()))
    }

    async fn insert_job(
        &self,
        project_id: &str,
        job: &Job,
        upload: Bytes,
    ) -> Result<JobReference, ApiError> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            FakeCall::InsertJob {
                job: job.clone(),
                upload,
            },
        );

        if let Some(response) = state.insert_job.pop_front() {
            return response;
        }

        Ok(job.job_reference.clone().unwrap_or_else(|| JobReference {
            project_id: project_id.to_owned(),
            job_id: format!("job_{}", state.calls.len()),
            location: None,
        }))
    }

    async fn get_job(
        &self,
        project_id: &str,
        job_id: &str,
        location: Option<&str>,
    ) -> Result<JobResource, ApiError> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            FakeCall::GetJob {
                job_id: job_id.to_owned(),
                location: location.map(str::to_owned),
            },
        );

        state
            .get_job
            .pop_front()
            .unwrap_or_else(|| Ok(job_done(project_id, job_id)))
    }
}

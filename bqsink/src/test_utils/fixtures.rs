use bqsink_config::shared::{AuthConfig, LoadConfig, TimePartitioningConfig, WriterConfig};

use crate::bigquery::{
    ErrorProto, InsertAllResponse, InsertError, JobReference, JobResource, JobStatus,
    TableFieldSchema, TableSchema,
};

/// Writer configuration with compute engine auth and every optional feature off.
pub fn writer_config() -> WriterConfig {
    WriterConfig {
        auth: AuthConfig::with_method("compute_engine"),
        timeouts: Default::default(),
        skip_invalid_rows: false,
        ignore_unknown_values: false,
        allow_retry_insert_errors: false,
        load: LoadConfig::default(),
        time_partitioning: None,
        clustering_fields: Vec::new(),
        location: None,
    }
}

/// Daily partitioning on ingestion time.
pub fn daily_partitioning() -> TimePartitioningConfig {
    TimePartitioningConfig {
        partition_type: "day".to_owned(),
        field: None,
        expiration_secs: None,
    }
}

/// Schema of an access log table.
pub fn access_log_fields() -> Vec<TableFieldSchema> {
    vec![
        TableFieldSchema::new("time", "TIMESTAMP").with_mode("REQUIRED"),
        TableFieldSchema::new("status", "INTEGER"),
        TableFieldSchema::new("path", "STRING"),
    ]
}

pub fn access_log_schema() -> TableSchema {
    TableSchema {
        fields: access_log_fields(),
    }
}

pub fn job_reference(project_id: &str, job_id: &str) -> JobReference {
    JobReference {
        project_id: project_id.to_owned(),
        job_id: job_id.to_owned(),
        location: None,
    }
}

fn job(project_id: &str, job_id: &str, status: JobStatus) -> JobResource {
    JobResource {
        job_reference: job_reference(project_id, job_id),
        status,
    }
}

pub fn job_running(project_id: &str, job_id: &str) -> JobResource {
    job(
        project_id,
        job_id,
        JobStatus {
            state: "RUNNING".to_owned(),
            error_result: None,
            errors: Vec::new(),
        },
    )
}

pub fn job_done(project_id: &str, job_id: &str) -> JobResource {
    job(
        project_id,
        job_id,
        JobStatus {
            state: "DONE".to_owned(),
            error_result: None,
            errors: Vec::new(),
        },
    )
}

/// Finished job whose terminal error has `reason`.
pub fn job_failed(project_id: &str, job_id: &str, reason: &str) -> JobResource {
    let error = ErrorProto {
        reason: Some(reason.to_owned()),
        message: Some(format!("job failed with {reason}")),
        ..Default::default()
    };

    job(
        project_id,
        job_id,
        JobStatus {
            state: "DONE".to_owned(),
            error_result: Some(error.clone()),
            errors: vec![error],
        },
    )
}

/// `insertAll` response rejecting row `index` with each of `reasons`.
pub fn insert_errors(index: u32, reasons: &[&str]) -> InsertAllResponse {
    InsertAllResponse {
        insert_errors: vec![InsertError {
            index,
            errors: reasons
                .iter()
                .map(|reason| ErrorProto {
                    reason: Some((*reason).to_owned()),
                    message: Some("row rejected".to_owned()),
                    ..Default::default()
                })
                .collect(),
        }],
    }
}

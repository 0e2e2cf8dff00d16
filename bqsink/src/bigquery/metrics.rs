use metrics::{Unit, describe_counter};
use std::sync::Once;

static REGISTER: Once = Once::new();

/// Authorized clients created because the cached one was missing, expired or invalidated.
pub const BQSINK_CLIENT_RESOLUTIONS_TOTAL: &str = "bqsink_client_resolutions_total";

/// Table creations retried after a retryable failure.
pub const BQSINK_CREATE_TABLE_RETRIES_TOTAL: &str = "bqsink_create_table_retries_total";

/// Row errors reported by streaming inserts.
pub const BQSINK_INSERT_ROW_ERRORS_TOTAL: &str = "bqsink_insert_row_errors_total";

/// Load jobs accepted by BigQuery.
pub const BQSINK_LOAD_JOBS_SUBMITTED_TOTAL: &str = "bqsink_load_jobs_submitted_total";

/// Load jobs that failed, labeled by `classification`.
pub const BQSINK_LOAD_JOB_FAILURES_TOTAL: &str = "bqsink_load_job_failures_total";

/// Register writer metrics. Safe to call multiple times.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        describe_counter!(
            BQSINK_CLIENT_RESOLUTIONS_TOTAL,
            Unit::Count,
            "Number of times an authorized BigQuery client was resolved"
        );
        describe_counter!(
            BQSINK_CREATE_TABLE_RETRIES_TOTAL,
            Unit::Count,
            "Number of table creation retries after retryable failures"
        );
        describe_counter!(
            BQSINK_INSERT_ROW_ERRORS_TOTAL,
            Unit::Count,
            "Number of row errors reported by streaming inserts"
        );
        describe_counter!(
            BQSINK_LOAD_JOBS_SUBMITTED_TOTAL,
            Unit::Count,
            "Number of load jobs submitted to BigQuery"
        );
        describe_counter!(
            BQSINK_LOAD_JOB_FAILURES_TOTAL,
            Unit::Count,
            "Number of failed load jobs, labeled by classification"
        );
    });
}

use bqsink::bigquery::{ApiError, InsertRow};
use bqsink::error::ErrorKind;
use bqsink::test_utils::fake_api::FakeCall;
use bqsink::test_utils::fixtures::{insert_errors, writer_config};
use serde_json::json;

use crate::support::{DATASET, PROJECT, TABLE, test_writer};

fn rows() -> Vec<InsertRow> {
    vec![
        InsertRow::new(json!({"time": "2024-01-01T00:00:00Z", "status": 200, "path": "/"})),
        InsertRow::new(json!({"time": "2024-01-01T00:00:01Z", "status": 404, "path": "/x"})),
    ]
}

#[tokio::test(start_paused = true)]
async fn sends_rows_with_configured_flags() {
    let mut config = writer_config();
    config.skip_invalid_rows = true;
    config.ignore_unknown_values = true;
    let t = test_writer(config);

    t.writer
        .insert_rows(PROJECT, DATASET, TABLE, rows(), Some("_20240101"))
        .await
        .unwrap();

    let calls = t.fake.calls();
    assert_eq!(calls.len(), 1);
    let FakeCall::InsertAll { table_id, request } = &calls[0].call else {
        panic!("unexpected call {:?}", calls[0].call);
    };
    assert_eq!(table_id, TABLE);
    assert_eq!(request.rows, rows());
    assert!(request.skip_invalid_rows);
    assert!(request.ignore_unknown_values);
    assert_eq!(request.template_suffix.as_deref(), Some("_20240101"));
}

#[tokio::test(start_paused = true)]
async fn row_errors_are_tolerated_unless_retry_is_allowed() {
    let t = test_writer(writer_config());
    t.fake
        .push_insert_all(Ok(insert_errors(1, &["backendError"])));

    t.writer
        .insert_rows(PROJECT, DATASET, TABLE, rows(), None)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn retryable_row_errors_fail_retryably() {
    let mut config = writer_config();
    config.allow_retry_insert_errors = true;
    let t = test_writer(config);
    t.fake.push_insert_all(Ok(insert_errors(0, &["timeout"])));

    let err = t
        .writer
        .insert_rows(PROJECT, DATASET, TABLE, rows(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RetryableError);
    assert!(err.classification().is_retryable());
}

#[tokio::test(start_paused = true)]
async fn one_retryable_reason_is_enough() {
    let mut config = writer_config();
    config.allow_retry_insert_errors = true;
    let t = test_writer(config);
    t.fake
        .push_insert_all(Ok(insert_errors(0, &["invalid", "rateLimitExceeded"])));

    let err = t
        .writer
        .insert_rows(PROJECT, DATASET, TABLE, rows(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RetryableError);
}

#[tokio::test(start_paused = true)]
async fn non_retryable_row_errors_fail_unretryably() {
    let mut config = writer_config();
    config.allow_retry_insert_errors = true;
    let t = test_writer(config);
    t.fake
        .push_insert_all(Ok(insert_errors(0, &["invalid", "stopped"])));

    let err = t
        .writer
        .insert_rows(PROJECT, DATASET, TABLE, rows(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnretryableError);
}

#[tokio::test(start_paused = true)]
async fn server_errors_are_retryable() {
    let t = test_writer(writer_config());
    t.fake.push_insert_all(Err(ApiError::new(
        503,
        Some("backendError"),
        "Service unavailable",
    )));

    let err = t
        .writer
        .insert_rows(PROJECT, DATASET, TABLE, rows(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RetryableError);
    assert_eq!(err.source_as::<ApiError>().and_then(|e| e.status), Some(503));
}

#[tokio::test(start_paused = true)]
async fn transport_failures_are_retryable() {
    let t = test_writer(writer_config());
    t.fake
        .push_insert_all(Err(ApiError::transport("connection reset by peer")));

    let err = t
        .writer
        .insert_rows(PROJECT, DATASET, TABLE, rows(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RetryableError);
}

#[tokio::test(start_paused = true)]
async fn permission_errors_are_unretryable() {
    let t = test_writer(writer_config());
    t.fake.push_insert_all(Err(ApiError::new(
        403,
        Some("accessDenied"),
        "Access Denied: Table proj:logs.access",
    )));

    let err = t
        .writer
        .insert_rows(PROJECT, DATASET, TABLE, rows(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnretryableError);
}

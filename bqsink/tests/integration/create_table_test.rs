use std::time::Duration;

use bqsink::bigquery::{ApiError, InsertRow, MAX_CREATE_TABLE_ATTEMPTS};
use bqsink::error::ErrorKind;
use bqsink::test_utils::fake_api::{FakeBigQuery, FakeCall};
use bqsink::test_utils::fixtures::{
    access_log_fields, access_log_schema, daily_partitioning, writer_config,
};
use serde_json::json;
use tokio::time::{Instant, sleep};

use crate::support::{DATASET, PROJECT, TABLE, assert_gap, test_writer, test_writer_with};

fn backend_error() -> ApiError {
    ApiError::new(503, Some("backendError"), "Backend error, try again")
}

#[tokio::test(start_paused = true)]
async fn creates_table_under_base_name_of_partition_decorator() {
    let t = test_writer(writer_config());

    t.writer
        .create_table(PROJECT, DATASET, "access$20240101", &access_log_fields())
        .await
        .unwrap();

    let calls = t.fake.insert_table_calls();
    assert_eq!(calls.len(), 1);
    let FakeCall::InsertTable { dataset_id, table } = &calls[0].call else {
        panic!("unexpected call {:?}", calls[0].call);
    };
    assert_eq!(dataset_id, DATASET);
    assert_eq!(table.table_reference.table_id, TABLE);
    assert_eq!(table.schema, access_log_schema());
    assert!(table.time_partitioning.is_none());
    assert!(table.clustering.is_none());
    assert!(t.fake.has_table(DATASET, TABLE));
}

#[tokio::test(start_paused = true)]
async fn applies_partitioning_and_clustering() {
    let mut config = writer_config();
    config.time_partitioning = Some(daily_partitioning());
    config.clustering_fields = vec!["status".to_owned()];
    let t = test_writer(config);

    t.writer
        .create_table(PROJECT, DATASET, TABLE, &access_log_fields())
        .await
        .unwrap();

    let calls = t.fake.insert_table_calls();
    let FakeCall::InsertTable { table, .. } = &calls[0].call else {
        panic!("unexpected call {:?}", calls[0].call);
    };
    let partitioning = table.time_partitioning.as_ref().unwrap();
    assert_eq!(partitioning.r#type, "DAY");
    assert_eq!(
        table.clustering.as_ref().and_then(|c| c.fields.clone()),
        Some(vec!["status".to_owned()])
    );
}

#[tokio::test(start_paused = true)]
async fn existing_table_counts_as_created() {
    let t = test_writer_with(
        writer_config(),
        FakeBigQuery::new().with_table(DATASET, TABLE, access_log_schema()),
    );

    t.writer
        .create_table(PROJECT, DATASET, TABLE, &access_log_fields())
        .await
        .unwrap();

    assert_eq!(t.fake.insert_table_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn retryable_failures_back_off_one_then_two_seconds() {
    let t = test_writer(writer_config());
    t.fake.push_insert_table(Err(backend_error()));
    t.fake.push_insert_table(Err(backend_error()));

    t.writer
        .create_table(PROJECT, DATASET, TABLE, &access_log_fields())
        .await
        .unwrap();

    let calls = t.fake.insert_table_calls();
    assert_eq!(calls.len(), 3);
    assert_gap(&calls[0], &calls[1], Duration::from_secs(1));
    assert_gap(&calls[1], &calls[2], Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_the_last_attempt() {
    let t = test_writer(writer_config());
    for _ in 0..MAX_CREATE_TABLE_ATTEMPTS {
        t.fake.push_insert_table(Err(backend_error()));
    }

    let started = Instant::now();
    let err = t
        .writer
        .create_table(PROJECT, DATASET, TABLE, &access_log_fields())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnretryableError);
    assert_eq!(err.source_as::<ApiError>().and_then(|e| e.status), Some(503));
    assert_eq!(
        t.fake.insert_table_calls().len(),
        MAX_CREATE_TABLE_ATTEMPTS as usize
    );
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn non_retryable_failure_is_not_retried() {
    let t = test_writer(writer_config());
    t.fake.push_insert_table(Err(ApiError::new(
        400,
        Some("invalid"),
        "Invalid field name \"bad-name\"",
    )));

    let err = t
        .writer
        .create_table(PROJECT, DATASET, TABLE, &access_log_fields())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnretryableError);
    assert_eq!(t.fake.insert_table_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn every_attempt_resolves_a_fresh_client() {
    let t = test_writer(writer_config());
    t.fake.push_insert_table(Err(backend_error()));

    t.writer
        .create_table(PROJECT, DATASET, TABLE, &access_log_fields())
        .await
        .unwrap();
    assert_eq!(t.connector.connects(), 2);

    // The client is also dropped after a successful creation.
    t.writer
        .insert_rows(PROJECT, DATASET, TABLE, vec![InsertRow::new(json!({"status": 200}))], None)
        .await
        .unwrap();
    assert_eq!(t.connector.connects(), 3);
}

#[tokio::test(start_paused = true)]
async fn backoff_does_not_block_other_operations() {
    let t = test_writer(writer_config());
    t.fake.push_insert_table(Err(backend_error()));
    t.fake.push_insert_table(Err(backend_error()));
    let fields = access_log_fields();

    let (created, insert_elapsed) = tokio::join!(
        t.writer.create_table(PROJECT, DATASET, TABLE, &fields),
        async {
            sleep(Duration::from_millis(500)).await;
            let started = Instant::now();
            t.writer
                .insert_rows(PROJECT, DATASET, TABLE, vec![InsertRow::new(json!({}))], None)
                .await
                .unwrap();
            started.elapsed()
        }
    );

    created.unwrap();
    assert_eq!(insert_elapsed, Duration::ZERO);
}

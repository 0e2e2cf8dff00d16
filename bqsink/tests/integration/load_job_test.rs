use std::time::Duration;

use bqsink::bigquery::{ApiError, JobReference, load_job_id};
use bqsink::error::ErrorKind;
use bqsink::test_utils::fake_api::{FakeBigQuery, FakeCall};
use bqsink::test_utils::fixtures::{
    access_log_fields, access_log_schema, daily_partitioning, job_failed, job_running,
    writer_config,
};
use bytes::Bytes;

use crate::support::{DATASET, PROJECT, TABLE, assert_gap, test_writer, test_writer_with};

const CHUNK: &str = "chunk-1";

fn upload() -> Bytes {
    Bytes::from_static(b"{\"status\":200}\n{\"status\":404}\n")
}

fn table_not_found() -> ApiError {
    ApiError::new(
        404,
        Some("notFound"),
        "Not found: Table proj:logs.access",
    )
}

#[tokio::test(start_paused = true)]
async fn omits_schema_when_destination_exists() {
    let t = test_writer_with(
        writer_config(),
        FakeBigQuery::new().with_table(DATASET, TABLE, access_log_schema()),
    );

    t.writer
        .create_load_job(CHUNK, PROJECT, DATASET, TABLE, upload(), &access_log_fields())
        .await
        .unwrap();

    let jobs = t.fake.submitted_jobs();
    assert_eq!(jobs.len(), 1);
    let load = &jobs[0].configuration.load;
    assert_eq!(load.destination_table.table_id, TABLE);
    assert_eq!(load.schema, None);
    assert_eq!(load.write_disposition, "WRITE_APPEND");
    assert_eq!(load.source_format, "NEWLINE_DELIMITED_JSON");
    assert_eq!(load.create_disposition, None);
    assert_eq!(load.max_bad_records, 0);
    assert!(jobs[0].job_reference.is_none());

    let uploads: Vec<Bytes> = t
        .fake
        .insert_job_calls()
        .into_iter()
        .filter_map(|recorded| match recorded.call {
            FakeCall::InsertJob { upload, .. } => Some(upload),
            _ => None,
        })
        .collect();
    assert_eq!(uploads, vec![upload()]);
}

#[tokio::test(start_paused = true)]
async fn sends_schema_when_destination_is_missing() {
    let t = test_writer(writer_config());

    t.writer
        .create_load_job(CHUNK, PROJECT, DATASET, TABLE, upload(), &access_log_fields())
        .await
        .unwrap();

    let jobs = t.fake.submitted_jobs();
    assert_eq!(
        jobs[0].configuration.load.schema,
        Some(access_log_schema())
    );
}

#[tokio::test(start_paused = true)]
async fn empty_schema_without_destination_fails() {
    let t = test_writer(writer_config());

    let err = t
        .writer
        .create_load_job(CHUNK, PROJECT, DATASET, TABLE, upload(), &[])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnretryableError);
    assert_eq!(err.description(), "Schema is empty");
    assert!(t.fake.submitted_jobs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn partitioned_loads_never_create_and_look_up_the_base_table() {
    let mut config = writer_config();
    config.time_partitioning = Some(daily_partitioning());
    let t = test_writer_with(
        config,
        FakeBigQuery::new().with_table(DATASET, TABLE, access_log_schema()),
    );

    t.writer
        .create_load_job(
            CHUNK,
            PROJECT,
            DATASET,
            "access$20240101",
            upload(),
            &access_log_fields(),
        )
        .await
        .unwrap();

    let lookups = t.fake.get_table_calls();
    let FakeCall::GetTable { table_id, .. } = &lookups[0].call else {
        panic!("unexpected call {:?}", lookups[0].call);
    };
    assert_eq!(table_id, TABLE);

    let load = &t.fake.submitted_jobs()[0].configuration.load;
    assert_eq!(load.destination_table.table_id, "access$20240101");
    assert_eq!(load.create_disposition.as_deref(), Some("CREATE_NEVER"));
    assert_eq!(load.schema, None);
}

#[tokio::test(start_paused = true)]
async fn duplicate_prevention_uses_deterministic_job_id() {
    let mut config = writer_config();
    config.load.prevent_duplicate_load = true;
    config.load.max_bad_records = 5;
    let t = test_writer(config);

    t.writer
        .create_load_job(CHUNK, PROJECT, DATASET, TABLE, upload(), &access_log_fields())
        .await
        .unwrap();

    let expected = load_job_id(CHUNK, DATASET, TABLE, &access_log_fields(), 5, false, None).unwrap();
    let job_reference = t.fake.submitted_jobs()[0].job_reference.clone().unwrap();
    assert_eq!(job_reference.job_id, expected);
    assert_eq!(job_reference.project_id, PROJECT);

    let FakeCall::GetJob { job_id, .. } = &t.fake.get_job_calls()[0].call else {
        panic!("expected a status lookup");
    };
    assert_eq!(job_id, &expected);
}

#[tokio::test(start_paused = true)]
async fn missing_table_is_created_and_the_chunk_retried_later() {
    let mut config = writer_config();
    config.load.auto_create_table = true;
    let t = test_writer(config);
    t.fake.push_insert_job(Err(table_not_found()));

    let err = t
        .writer
        .create_load_job(CHUNK, PROJECT, DATASET, TABLE, upload(), &access_log_fields())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TableCreatedRetryLater);
    assert!(err.classification().is_retryable());
    assert!(t.fake.has_table(DATASET, TABLE));
    assert!(t.fake.get_job_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_auto_creation_surfaces_the_creation_error() {
    let mut config = writer_config();
    config.load.auto_create_table = true;
    let t = test_writer(config);
    t.fake.push_insert_job(Err(table_not_found()));
    t.fake.push_insert_table(Err(ApiError::new(
        403,
        Some("accessDenied"),
        "Access Denied: Dataset proj:logs",
    )));

    let err = t
        .writer
        .create_load_job(CHUNK, PROJECT, DATASET, TABLE, upload(), &access_log_fields())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnretryableError);
    assert_eq!(err.description(), "Table creation failed");
}

#[tokio::test(start_paused = true)]
async fn missing_table_without_auto_creation_is_unretryable() {
    let t = test_writer(writer_config());
    t.fake.push_insert_job(Err(table_not_found()));

    let err = t
        .writer
        .create_load_job(CHUNK, PROJECT, DATASET, TABLE, upload(), &access_log_fields())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnretryableError);
    assert!(t.fake.insert_table_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn duplicate_job_waits_for_the_existing_one() {
    let mut config = writer_config();
    config.load.prevent_duplicate_load = true;
    let t = test_writer(config);
    let expected = load_job_id(CHUNK, DATASET, TABLE, &access_log_fields(), 0, false, None).unwrap();
    t.fake.push_insert_job(Err(ApiError::new(
        409,
        Some("duplicate"),
        format!("Already Exists: Job proj:US.{expected}"),
    )));
    t.fake.push_get_job(Ok(job_running(PROJECT, &expected)));

    t.writer
        .create_load_job(CHUNK, PROJECT, DATASET, TABLE, upload(), &access_log_fields())
        .await
        .unwrap();

    let polls = t.fake.get_job_calls();
    assert_eq!(polls.len(), 2);
    assert_gap(&polls[0], &polls[1], Duration::from_secs(10));
    for poll in &polls {
        let FakeCall::GetJob { job_id, .. } = &poll.call else {
            panic!("unexpected call {:?}", poll.call);
        };
        assert_eq!(job_id, &expected);
    }
}

#[tokio::test(start_paused = true)]
async fn conflict_without_job_id_is_not_treated_as_duplicate() {
    let t = test_writer(writer_config());
    t.fake.push_insert_job(Err(ApiError::new(
        409,
        Some("duplicate"),
        "Already Exists: Job proj:US.job_1",
    )));

    let err = t
        .writer
        .create_load_job(CHUNK, PROJECT, DATASET, TABLE, upload(), &access_log_fields())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnretryableError);
    assert!(t.fake.get_job_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn retryable_job_failure_changes_the_next_job_id() {
    let mut config = writer_config();
    config.load.prevent_duplicate_load = true;
    let t = test_writer(config);
    let fields = access_log_fields();
    let first = load_job_id(CHUNK, DATASET, TABLE, &fields, 0, false, None).unwrap();
    t.fake
        .push_get_job(Ok(job_failed(PROJECT, &first, "backendError")));

    let err = t
        .writer
        .create_load_job(CHUNK, PROJECT, DATASET, TABLE, upload(), &fields)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RetryableError);
    assert_eq!(t.writer.chunk_error_count(CHUNK).await, Some(1));

    t.writer
        .create_load_job(CHUNK, PROJECT, DATASET, TABLE, upload(), &fields)
        .await
        .unwrap();

    let second = load_job_id(CHUNK, DATASET, TABLE, &fields, 0, false, Some(1)).unwrap();
    let job_ids: Vec<String> = t
        .fake
        .submitted_jobs()
        .into_iter()
        .filter_map(|job| job.job_reference.map(|reference| reference.job_id))
        .collect();
    assert_eq!(job_ids, vec![first, second]);
    assert_eq!(t.writer.chunk_error_count(CHUNK).await, None);
}

#[tokio::test(start_paused = true)]
async fn polls_in_the_location_reported_at_submission() {
    let t = test_writer(writer_config());
    t.fake.push_insert_job(Ok(JobReference {
        project_id: PROJECT.to_owned(),
        job_id: "job_eu".to_owned(),
        location: Some("EU".to_owned()),
    }));

    t.writer
        .create_load_job(CHUNK, PROJECT, DATASET, TABLE, upload(), &access_log_fields())
        .await
        .unwrap();

    let FakeCall::GetJob { job_id, location } = &t.fake.get_job_calls()[0].call else {
        panic!("expected a status lookup");
    };
    assert_eq!(job_id, "job_eu");
    assert_eq!(location.as_deref(), Some("EU"));
}

#[tokio::test(start_paused = true)]
async fn configured_location_takes_precedence() {
    let mut config = writer_config();
    config.location = Some("asia-northeast1".to_owned());
    let t = test_writer(config);
    t.fake.push_insert_job(Ok(JobReference {
        project_id: PROJECT.to_owned(),
        job_id: "job_eu".to_owned(),
        location: Some("EU".to_owned()),
    }));

    t.writer
        .create_load_job(CHUNK, PROJECT, DATASET, TABLE, upload(), &access_log_fields())
        .await
        .unwrap();

    let FakeCall::GetJob { location, .. } = &t.fake.get_job_calls()[0].call else {
        panic!("expected a status lookup");
    };
    assert_eq!(location.as_deref(), Some("asia-northeast1"));
}

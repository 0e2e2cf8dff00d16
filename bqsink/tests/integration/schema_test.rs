use bqsink::bigquery::ApiError;
use bqsink::error::ErrorKind;
use bqsink::test_utils::fake_api::{FakeBigQuery, FakeCall};
use bqsink::test_utils::fixtures::{access_log_fields, access_log_schema, writer_config};

use crate::support::{DATASET, PROJECT, TABLE, test_writer, test_writer_with};

#[tokio::test(start_paused = true)]
async fn fetches_the_schema_of_the_base_table() {
    let t = test_writer_with(
        writer_config(),
        FakeBigQuery::new().with_table(DATASET, TABLE, access_log_schema()),
    );

    let fields = t
        .writer
        .fetch_schema(PROJECT, DATASET, "access$20240101")
        .await
        .unwrap();

    assert_eq!(fields, access_log_fields());
    let FakeCall::GetTable { table_id, .. } = &t.fake.get_table_calls()[0].call else {
        panic!("expected a table lookup");
    };
    assert_eq!(table_id, TABLE);
}

#[tokio::test(start_paused = true)]
async fn missing_table_is_unretryable_and_drops_the_client() {
    let t = test_writer(writer_config());

    let err = t
        .writer
        .fetch_schema(PROJECT, DATASET, TABLE)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnretryableError);
    assert_eq!(err.source_as::<ApiError>().and_then(|e| e.status), Some(404));

    t.fake
        .push_get_table(Err(ApiError::new(503, None, "Service unavailable")));
    let err = t
        .writer
        .fetch_schema(PROJECT, DATASET, TABLE)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RetryableError);

    assert_eq!(t.connector.connects(), 2);
}

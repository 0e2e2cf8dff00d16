mod create_table_test;
mod insert_rows_test;
mod load_job_test;
mod schema_test;

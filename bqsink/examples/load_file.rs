/*

Load File Example

Uploads a local file into a BigQuery table, either as a load job or by
streaming every line with `insertAll`.

The writer configuration is read from the `configuration/` directory of
the working directory
(`base.yaml` plus `dev.yaml` or `prod.yaml`, selected by APP_ENVIRONMENT)
and can be overridden with `APP_` prefixed environment variables, for
example `APP_LOAD__AUTO_CREATE_TABLE=true`.

Usage:
    cd bqsink && cargo run --example load_file -- \
        --project my-project \
        --dataset logs \
        --table access \
        --schema schema.json \
        --file access.ndjson

`--schema` points to a JSON array of fields in the BigQuery REST format,
for example `[{"name": "time", "type": "TIMESTAMP", "mode": "REQUIRED"}]`.
Pass `--stream` to use streaming inserts instead of a load job.

*/

use std::error::Error;
use std::path::PathBuf;

use bqsink::bigquery::{BigQueryWriter, InsertRow, TableFieldSchema};
use bqsink::config::load_config;
use bqsink::config::shared::WriterConfig;
use bqsink::error::ErrorKind;
use bqsink_telemetry::tracing::init_tracing;
use bytes::Bytes;
use clap::Parser;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "load_file", version, about, arg_required_else_help = true)]
struct AppArgs {
    /// Project owning the destination dataset
    #[arg(long)]
    project: String,
    /// Destination dataset
    #[arg(long)]
    dataset: String,
    /// Destination table, optionally with a `$YYYYMMDD` partition decorator
    #[arg(long)]
    table: String,
    /// File to upload
    #[arg(long)]
    file: PathBuf,
    /// JSON file holding the table schema
    #[arg(long)]
    schema: Option<PathBuf>,
    /// Identifier of the chunk, used to derive deterministic job ids
    #[arg(long, default_value = "load-file")]
    chunk_id: String,
    /// Stream newline delimited JSON rows instead of submitting a load job
    #[arg(long)]
    stream: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _log_flusher = init_tracing("load_file")?;

    if let Err(err) = main_impl().await {
        error!("{err}");
        std::process::exit(1);
    }

    Ok(())
}

async fn main_impl() -> Result<(), Box<dyn Error>> {
    let args = AppArgs::parse();
    let config = load_config::<WriterConfig>()?;
    let writer = BigQueryWriter::new(config)?;

    let fields: Vec<TableFieldSchema> = match &args.schema {
        Some(path) => serde_json::from_slice(&tokio::fs::read(path).await?)?,
        None => Vec::new(),
    };
    let contents = tokio::fs::read(&args.file).await?;

    if args.stream {
        let rows = contents
            .split(|byte| *byte == b'\n')
            .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
            .map(|line| serde_json::from_slice(line).map(InsertRow::new))
            .collect::<Result<Vec<_>, _>>()?;
        let row_count = rows.len();

        writer
            .insert_rows(&args.project, &args.dataset, &args.table, rows, None)
            .await?;
        info!(rows = row_count, table = %args.table, "streamed rows");

        return Ok(());
    }

    let upload = Bytes::from(contents);
    match writer
        .create_load_job(
            &args.chunk_id,
            &args.project,
            &args.dataset,
            &args.table,
            upload,
            &fields,
        )
        .await
    {
        Ok(()) => info!(table = %args.table, "load job finished"),
        Err(err) if err.kind() == ErrorKind::TableCreatedRetryLater => {
            warn!(table = %args.table, "destination table was created, run the load again");
        }
        Err(err) => return Err(err.into()),
    }

    Ok(())
}

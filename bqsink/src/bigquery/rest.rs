//! [`BigQueryApi`] over the BigQuery v2 REST API.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bqsink_config::shared::TimeoutConfig;
use bytes::{BufMut, Bytes, BytesMut};
use reqwest::{Method, RequestBuilder, Response, Url, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::bigquery::api::{ApiError, BigQueryApi, BigQueryConnector};
use crate::bigquery::auth::{AuthStrategy, Authorization, resolve_authorization};
use crate::bigquery::metrics::BQSINK_CLIENT_RESOLUTIONS_TOTAL;
use crate::bigquery::model::{
    ErrorProto, InsertAllRequest, InsertAllResponse, Job, JobReference, JobResource,
    TableDefinition, TableSchema,
};
use crate::error::{ErrorKind, SinkResult};
use crate::sink_error;

/// Root of the metadata and data endpoints.
pub const DEFAULT_API_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Root of the media upload endpoints.
pub const DEFAULT_UPLOAD_BASE_URL: &str = "https://bigquery.googleapis.com/upload/bigquery/v2";

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct TableResource {
    #[serde(default)]
    schema: Option<TableSchema>,
}

/// HTTP client for a single set of credentials.
pub struct RestBigQueryApi {
    http: reqwest::Client,
    authorization: Arc<Authorization>,
    api_base: Url,
    upload_base: Url,
}

impl RestBigQueryApi {
    /// Creates a client against the public Google endpoints.
    pub fn new(authorization: Authorization, timeouts: &TimeoutConfig) -> SinkResult<Self> {
        Self::with_base_urls(
            authorization,
            timeouts,
            DEFAULT_API_BASE_URL,
            DEFAULT_UPLOAD_BASE_URL,
        )
    }

    /// Creates a client against custom endpoints, for emulators and tests.
    pub fn with_base_urls(
        authorization: Authorization,
        timeouts: &TimeoutConfig,
        api_base: &str,
        upload_base: &str,
    ) -> SinkResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = timeouts.open_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = timeouts.read_timeout_secs {
            builder = builder.read_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = timeouts.send_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        let http = builder.build().map_err(|err| {
            sink_error!(
                ErrorKind::ConfigError,
                "Failed to build HTTP client",
                err.to_string(),
                source: err
            )
        })?;

        Ok(Self {
            http,
            authorization: Arc::new(authorization),
            api_base: parse_base_url(api_base)?,
            upload_base: parse_base_url(upload_base)?,
        })
    }

    fn endpoint(&self, base: &Url, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::transport(format!("`{base}` cannot be used as a base url")))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, ApiError> {
        let token = self.authorization.access_token().await?;
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|err| ApiError::transport(err.to_string()))?;

        let response = check_status(response).await?;
        let status = response.status().as_u16();

        response.json::<T>().await.map_err(|err| {
            ApiError::new(
                status,
                Some("invalidResponse"),
                format!("failed to decode response body: {err}"),
            )
        })
    }
}

fn parse_base_url(url: &str) -> SinkResult<Url> {
    Url::parse(url).map_err(|err| {
        sink_error!(
            ErrorKind::ConfigError,
            "Invalid BigQuery base url",
            format!("`{url}`: {err}"),
            source: err
        )
    })
}

/// Turns non-success responses into [`ApiError`]s using the Google error envelope.
async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let (reason, message) = match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => (
            envelope
                .error
                .errors
                .into_iter()
                .find_map(|item| item.reason),
            envelope.error.message,
        ),
        Err(_) => (None, body),
    };

    Err(ApiError {
        status: Some(status.as_u16()),
        reason,
        message,
    })
}

/// Builds a `multipart/related` body holding the job metadata followed by the payload.
fn multipart_related_body(boundary: &str, metadata: &[u8], payload: &[u8]) -> Bytes {
    let mut body = BytesMut::with_capacity(metadata.len() + payload.len() + 256);

    body.put_slice(format!("--{boundary}\r\n").as_bytes());
    body.put_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.put_slice(metadata);
    body.put_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.put_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.put_slice(payload);
    body.put_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    body.freeze()
}

#[async_trait]
impl BigQueryApi for RestBigQueryApi {
    async fn insert_table(
        &self,
        project_id: &str,
        dataset_id: &str,
        table: &TableDefinition,
    ) -> Result<(), ApiError> {
        let url = self.endpoint(
            &self.api_base,
            &["projects", project_id, "datasets", dataset_id, "tables"],
        )?;
        let request = self.request(Method::POST, url).await?.json(table);

        Self::send::<serde_json::Value>(request).await.map(|_| ())
    }

    async fn get_table(
        &self,
        project_id: &str,
        dataset_id: &str,
        table_id: &str,
    ) -> Result<TableSchema, ApiError> {
        let url = self.endpoint(
            &self.api_base,
            &["projects", project_id, "datasets", dataset_id, "tables", table_id],
        )?;
        let request = self.request(Method::GET, url).await?;

        let table: TableResource = Self::send(request).await?;
        Ok(table.schema.unwrap_or_default())
    }

    async fn insert_all(
        &self,
        project_id: &str,
        dataset_id: &str,
        table_id: &str,
        request: &InsertAllRequest,
    ) -> Result<InsertAllResponse, ApiError> {
        let url = self.endpoint(
            &self.api_base,
            &[
                "projects",
                project_id,
                "datasets",
                dataset_id,
                "tables",
                table_id,
                "insertAll",
            ],
        )?;
        let request = self.request(Method::POST, url).await?.json(request);

        Self::send(request).await
    }

    async fn insert_job(
        &self,
        project_id: &str,
        job: &Job,
        upload: Bytes,
    ) -> Result<JobReference, ApiError> {
        let mut url = self.endpoint(&self.upload_base, &["projects", project_id, "jobs"])?;
        url.query_pairs_mut().append_pair("uploadType", "multipart");

        let metadata = serde_json::to_vec(job).map_err(|err| {
            ApiError::new(400, Some("invalid"), format!("failed to encode job: {err}"))
        })?;
        let boundary = uuid::Uuid::new_v4().simple().to_string();
        let body = multipart_related_body(&boundary, &metadata, &upload);

        debug!(project_id, bytes = upload.len(), "uploading load job payload");

        let request = self
            .request(Method::POST, url)
            .await?
            .header(
                header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body);

        let job: JobResource = Self::send(request).await?;
        Ok(job.job_reference)
    }

    async fn get_job(
        &self,
        project_id: &str,
        job_id: &str,
        location: Option<&str>,
    ) -> Result<JobResource, ApiError> {
        let mut url = self.endpoint(&self.api_base, &["projects", project_id, "jobs", job_id])?;
        if let Some(location) = location {
            url.query_pairs_mut().append_pair("location", location);
        }
        let request = self.request(Method::GET, url).await?;

        Self::send(request).await
    }
}

impl fmt::Debug for RestBigQueryApi {
    /// Formats the client without credentials.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestBigQueryApi")
            .field("api_base", &self.api_base.as_str())
            .field("upload_base", &self.upload_base.as_str())
            .finish()
    }
}

/// Resolves credentials and builds a [`RestBigQueryApi`] for every connection request.
#[derive(Debug, Clone)]
pub struct RestConnector {
    api_base: String,
    upload_base: String,
}

impl RestConnector {
    pub fn new() -> Self {
        Self::with_base_urls(DEFAULT_API_BASE_URL, DEFAULT_UPLOAD_BASE_URL)
    }

    pub fn with_base_urls(api_base: impl Into<String>, upload_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            upload_base: upload_base.into(),
        }
    }
}

impl Default for RestConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BigQueryConnector for RestConnector {
    async fn connect(
        &self,
        auth: &AuthStrategy,
        timeouts: &TimeoutConfig,
    ) -> SinkResult<Arc<dyn BigQueryApi>> {
        let authorization = resolve_authorization(auth).await?;
        let api = RestBigQueryApi::with_base_urls(
            authorization,
            timeouts,
            &self.api_base,
            &self.upload_base,
        )?;

        metrics::counter!(BQSINK_CLIENT_RESOLUTIONS_TOTAL, "method" => auth.name()).increment(1);

        Ok(Arc::new(api))
    }
}

//! Maps remote failures onto the retry taxonomy shared by every writer operation.

use std::borrow::Cow;

use crate::bigquery::api::ApiError;
use crate::error::{ErrorKind, SinkError};
use crate::sink_error;

/// Reasons that make a table or job failure worth redelivering.
pub const RETRYABLE_ERROR_REASONS: &[&str] = &[
    "backendError",
    "internalError",
    "rateLimitExceeded",
    "tableUnavailable",
];

/// Reasons that make a streaming insert row error worth redelivering.
pub const RETRYABLE_INSERT_ERROR_REASONS: &[&str] = &[
    "timeout",
    "backendError",
    "internalError",
    "rateLimitExceeded",
];

/// HTTP statuses that indicate a transient server side failure.
pub const RETRYABLE_STATUS_CODES: &[u16] = &[500, 502, 503, 504];

/// Message BigQuery returns with a 400 while a region is temporarily read only.
const REGION_NOT_WRITABLE_MESSAGE: &str = "is not writable in the region";

/// How a caller should treat a failed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClassification {
    /// Redeliver the same chunk later.
    Retryable,
    /// Give up on the chunk.
    Unretryable,
    /// Fix the configuration; retrying cannot help.
    ConfigError,
}

impl ErrorClassification {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClassification::Retryable)
    }

    /// Label used for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClassification::Retryable => "retryable",
            ErrorClassification::Unretryable => "unretryable",
            ErrorClassification::ConfigError => "config_error",
        }
    }
}

/// Returns `true` when a table or job failure reason is transient.
pub fn is_retryable_reason(reason: Option<&str>) -> bool {
    reason.is_some_and(|reason| RETRYABLE_ERROR_REASONS.contains(&reason))
}

/// Returns `true` when a streaming insert row error reason is transient.
pub fn is_retryable_insert_reason(reason: Option<&str>) -> bool {
    reason.is_some_and(|reason| RETRYABLE_INSERT_ERROR_REASONS.contains(&reason))
}

/// Classifies a remote failure from its status, reason and message.
///
/// Transport failures (no status), 5xx statuses from [`RETRYABLE_STATUS_CODES`], a read only
/// region and any reason from [`RETRYABLE_ERROR_REASONS`] are retryable. Everything else is not.
pub fn classify_api_error(error: &ApiError) -> ErrorClassification {
    let retryable = match error.status {
        None => true,
        Some(status) if RETRYABLE_STATUS_CODES.contains(&status) => true,
        Some(400) if error.message.contains(REGION_NOT_WRITABLE_MESSAGE) => true,
        Some(_) => is_retryable_reason(error.reason.as_deref()),
    };

    if retryable {
        ErrorClassification::Retryable
    } else {
        ErrorClassification::Unretryable
    }
}

/// Classifies any [`SinkError`] by its kind.
pub fn classify_error(error: &SinkError) -> ErrorClassification {
    match error.kind() {
        ErrorKind::RetryableError | ErrorKind::TableCreatedRetryLater => {
            ErrorClassification::Retryable
        }
        ErrorKind::ConfigError => ErrorClassification::ConfigError,
        ErrorKind::UnretryableError
        | ErrorKind::AuthenticationError
        | ErrorKind::IoError
        | ErrorKind::SerializationError => ErrorClassification::Unretryable,
    }
}

/// Wraps a remote failure into a [`SinkError`] whose kind follows [`classify_api_error`].
///
/// The [`ApiError`] stays attached as the source.
#[track_caller]
pub fn api_error_to_sink_error(description: &'static str, error: ApiError) -> SinkError {
    let kind = match classify_api_error(&error) {
        ErrorClassification::Retryable => ErrorKind::RetryableError,
        ErrorClassification::Unretryable | ErrorClassification::ConfigError => {
            ErrorKind::UnretryableError
        }
    };

    let detail: Cow<'static, str> = Cow::Owned(error.to_string());
    sink_error!(kind, description, detail = detail, source: error)
}

impl From<ApiError> for SinkError {
    #[track_caller]
    fn from(error: ApiError) -> SinkError {
        api_error_to_sink_error("BigQuery request failed", error)
    }
}

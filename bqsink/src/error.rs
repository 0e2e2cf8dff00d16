//! Error types and result definitions for the BigQuery write path.
//!
//! [`SinkError`] carries a [`ErrorKind`], a static description, optional dynamic detail, an
//! optional source error and the callsite it was created at. The kind is what callers use to
//! decide whether a chunk should be redelivered, see [`SinkError::classification`].

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use crate::bigquery::classify::{ErrorClassification, classify_error};

/// Convenient result type for write path operations.
pub type SinkResult<T> = Result<T, SinkError>;

/// Detailed payload stored behind every [`SinkError`].
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type of the write path.
#[derive(Debug, Clone)]
pub struct SinkError {
    payload: Box<ErrorPayload>,
}

/// Categories of failures surfaced by the writer.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Invalid static configuration. Never retried.
    ConfigError,
    /// Remote condition expected to clear when the chunk is redelivered.
    RetryableError,
    /// Permanent failure. The chunk must not be redelivered as is.
    UnretryableError,
    /// The destination table was just created by a load job submission. Redeliver the chunk.
    TableCreatedRetryLater,
    /// Credentials could not be loaded or exchanged for a token.
    AuthenticationError,

    /// A credential file could not be read.
    IoError,
    /// A request body or job id key could not be encoded.
    SerializationError,
}

impl SinkError {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.payload.kind
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> &str {
        &self.payload.description
    }

    /// Returns the dynamic detail, if any.
    pub fn detail(&self) -> Option<&str> {
        self.payload.detail.as_deref()
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        self.payload.location
    }

    /// Returns how the caller should treat the failed chunk.
    pub fn classification(&self) -> ErrorClassification {
        classify_error(self)
    }

    /// Attaches an originating error and returns the modified instance.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.payload.source = Some(Arc::new(source));
        self
    }

    /// Returns the attached source downcast to `E`, if it has that type.
    pub fn source_as<E>(&self) -> Option<&E>
    where
        E: error::Error + 'static,
    {
        self.payload
            .source
            .as_deref()
            .and_then(|source| source.downcast_ref::<E>())
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        SinkError {
            payload: Box::new(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

/// Errors compare by kind only.
impl PartialEq for SinkError {
    fn eq(&self, other: &SinkError) -> bool {
        self.payload.kind == other.payload.kind
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let payload = &self.payload;
        let location = payload.location;
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            payload.kind,
            payload.description,
            location.file(),
            location.line(),
            location.column()
        )?;

        write_block("Detail", payload.detail.as_deref(), f)?;

        let backtrace = payload.backtrace.to_string();
        if !backtrace.trim().is_empty() {
            write_block("Backtrace", Some(&backtrace), f)?;
        }

        Ok(())
    }
}

impl error::Error for SinkError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.payload
            .source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn error::Error + 'static))
    }
}

/// Writes an indented, titled block.
fn write_block(title: &str, body: Option<&str>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let Some(body) = body else {
        return Ok(());
    };

    if body.trim().is_empty() {
        return write!(f, "\n  {title}: <empty>");
    }

    write!(f, "\n  {title}:")?;
    for line in body.lines() {
        if line.trim().is_empty() {
            write!(f, "\n    ")?;
        } else {
            write!(f, "\n    {line}")?;
        }
    }

    Ok(())
}

/// Creates a [`SinkError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for SinkError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> SinkError {
        SinkError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`SinkError`] from an error kind, static description and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for SinkError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> SinkError {
        SinkError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

impl From<std::io::Error> for SinkError {
    #[track_caller]
    fn from(err: std::io::Error) -> SinkError {
        let detail = err.to_string();
        SinkError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

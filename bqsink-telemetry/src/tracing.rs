//! Global tracing subscriber initialization.
//!
//! Development builds log human-readable lines, production builds log JSON objects. Both write
//! through a non-blocking stdout writer whose buffer is flushed when the returned [`LogFlusher`]
//! is dropped.

use std::sync::Once;

use bqsink_config::Environment;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to determine runtime environment: {0}")]
    Environment(#[from] std::io::Error),

    #[error("failed to install global tracing subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Flushes buffered log lines when dropped.
///
/// Keep it alive until the process exits.
#[must_use = "dropping the flusher stops log output"]
pub struct LogFlusher {
    _guard: WorkerGuard,
}

/// Installs the global subscriber for `app_name`, choosing the format from `APP_ENVIRONMENT`.
///
/// The filter comes from `RUST_LOG` and defaults to `info` for everything plus `app_name`.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    let environment = Environment::load()?;
    init_tracing_for(app_name, environment)
}

/// Same as [`init_tracing`] with an explicit environment.
pub fn init_tracing_for(
    app_name: &str,
    environment: Environment,
) -> Result<LogFlusher, TracingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(app_name)));

    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    if environment.is_prod() {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(writer),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(writer))
            .try_init()?;
    }

    tracing::info!(app_name, %environment, "tracing initialized");

    Ok(LogFlusher { _guard: guard })
}

/// Installs a subscriber that writes through the test harness, so output shows only for
/// failing tests. Safe to call from every test.
///
/// The filter comes from `RUST_LOG` and defaults to `info`.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // Another test binary harness may have installed a subscriber already.
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}

fn default_directives(app_name: &str) -> String {
    format!("info,{}=info", app_name.replace('-', "_"))
}

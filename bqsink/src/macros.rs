//! Macros for building and returning [`crate::error::SinkError`] values.

/// Builds a [`crate::error::SinkError`].
///
/// Accepts a kind and a static description, optionally followed by a detail and a
/// `source:` error. `detail = expr` moves an owned value in; a bare third expression is
/// rendered through `to_string()`.
///
/// ```ignore
/// sink_error!(ErrorKind::ConfigError, "Unknown auth method", detail = method.clone());
/// sink_error!(ErrorKind::RetryableError, "Insert failed", api_error.message, source: api_error);
/// ```
#[macro_export]
macro_rules! sink_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::SinkError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        $crate::error::SinkError::from(($kind, $desc)).with_source($source)
    };
    ($kind:expr, $desc:expr, detail = $detail:expr) => {
        $crate::error::SinkError::from(($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr, source: $source:expr) => {
        $crate::error::SinkError::from(($kind, $desc, $detail)).with_source($source)
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::SinkError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        $crate::error::SinkError::from(($kind, $desc, $detail.to_string())).with_source($source)
    };
}

/// Returns early with a [`crate::error::SinkError`] built by [`sink_error!`].
#[macro_export]
macro_rules! bail {
    ($($arg:tt)+) => {
        return ::core::result::Result::Err($crate::sink_error!($($arg)+))
    };
}

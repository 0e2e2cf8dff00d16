use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A field holds a value outside of its allowed range.
    #[error("Invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// Too many clustering fields were configured.
    #[error("`clustering_fields` accepts at most {max} fields, got {actual}")]
    TooManyClusteringFields { max: usize, actual: usize },
}

//! Custom error types for the knowledge observatory

use thiserror::Error;

/// Main error type for observatory operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Timed out after {after_ms}ms waiting for {what}")]
    Timeout { what: ErrorKind, after_ms: u64 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error classes surfaced to callers of the service layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Embedding,
    Store,
    Schema,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Embedding => write!(f, "embedder"),
            ErrorKind::Store => write!(f, "store"),
            ErrorKind::Schema => write!(f, "schema"),
            ErrorKind::Cancelled => write!(f, "cancellation"),
        }
    }
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound(message.into())
    }

    /// Classify this error for the HTTP boundary
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Embedding(_) => ErrorKind::Embedding,
            Error::Schema(_) => ErrorKind::Schema,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Timeout { what, .. } => *what,
            Error::Config(_)
            | Error::Store(_)
            | Error::Database(_)
            | Error::Http(_)
            | Error::UrlParse(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::Io(_) => ErrorKind::Store,
        }
    }
}

/// Result type alias for the observatory
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::validation("bad").kind(), ErrorKind::Validation);
        assert_eq!(Error::not_found("gone").kind(), ErrorKind::NotFound);
        assert_eq!(Error::Store("down".into()).kind(), ErrorKind::Store);
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            Error::Database(sqlx::Error::RowNotFound).kind(),
            ErrorKind::Store
        );
        assert_eq!(
            Error::Timeout {
                what: ErrorKind::Embedding,
                after_ms: 30_000
            }
            .kind(),
            ErrorKind::Embedding
        );
    }

    #[test]
    fn test_validation_message_is_bare() {
        let err = Error::validation("namespace is required");
        assert_eq!(err.to_string(), "namespace is required");
    }
}

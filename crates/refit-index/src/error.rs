//! Error types for refit-index.

/// Errors raised by repository discovery and fetch collaborators.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GitHub API returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("GitHub API rate limit exceeded")]
    RateLimited,

    /// The repository listing succeeded but no source file could be read.
    #[error("no source files could be fetched")]
    NoFiles,

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("{0}")]
    Other(String),
}

/// Errors that can occur during indexing, retrieval, and ingestion.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The embedding function or persisted store could not be initialized.
    #[error("embedding index unavailable: {0}")]
    Unavailable(String),

    /// `SQLite` database error.
    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// LLM provider error (embedding).
    #[error("embedding failed: {0}")]
    Llm(#[from] refit_llm::LlmError),

    #[error("repository source error: {0}")]
    Source(#[from] SourceError),

    /// Stored vector dimensionality does not match the embedding function.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Integer conversion error.
    #[error("integer conversion failed: {0}")]
    IntConversion(#[from] std::num::TryFromIntError),

    #[error("{0}")]
    Other(String),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;

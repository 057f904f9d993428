use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("embedding dimension mismatch: store opened with {expected}, got {actual}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid row data: {0}")]
    InvalidRow(String),
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// Schema migrations are applied lazily and tests intentionally query a
/// repository before `CatalogStore::open` has created later tables (spec
/// §4.3's pre-migration contract). Repository methods check this rather
/// than let the raw sqlx error propagate.
pub(crate) fn is_missing_table_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.message().contains("no such table"),
        _ => false,
    }
}

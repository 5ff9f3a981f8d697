use thiserror::Error;

/// SQLSTATE raised by PostgreSQL on a unique constraint violation.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("PostgreSQL error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Data conversion error: {0}")]
    ConversionError(String),
}

impl From<StoreError> for common::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConfigError(msg) => common::Error::Config(msg),
            other => common::Error::Database(other.to_string()),
        }
    }
}

/// True when the driver reports a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

/// Classify a driver error raised by an insert: duplicates become the
/// caller-supplied domain error, everything else passes through.
pub(crate) fn classify_insert(
    err: sqlx::Error,
    already_exists: impl FnOnce() -> common::Error,
) -> common::Error {
    if is_unique_violation(&err) {
        already_exists()
    } else {
        StoreError::from(err).into()
    }
}

/// Classify a driver error raised by a single-row read.
pub(crate) fn classify_read(
    err: sqlx::Error,
    not_found: impl FnOnce() -> common::Error,
) -> common::Error {
    match err {
        sqlx::Error::RowNotFound => not_found(),
        other => StoreError::from(other).into(),
    }
}

//! Common error types for the motif mining tools

use thiserror::Error;

/// Common result type for motif operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the mining components
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// An occurrence references a parameter Configuration that does not exist
    #[error("Configuration not found: {0}")]
    ConfigurationNotFound(i64),

    /// A job found nothing to work on
    #[error("Source is empty: {0}")]
    SourceEmpty(String),

    /// A UNIQUE or CHECK constraint failed while writing a derived table
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Another job holds the advisory lock for a derived table
    #[error("Table '{table}' is locked by {holder}")]
    LockHeld { table: String, holder: String },

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify a sqlx error, promoting SQLite constraint failures to
    /// [`Error::ConstraintViolation`].
    pub fn from_db(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            let message = db_err.message();
            if message.contains("UNIQUE constraint failed")
                || message.contains("CHECK constraint failed")
            {
                return Error::ConstraintViolation(message.to_string());
            }
        }
        Error::Database(err)
    }

    /// True for errors that abort a batch but leave it safe to retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Io(_) => true,
            Error::Database(db_err) => db_err.to_string().contains("database is locked"),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_held_message_names_table_and_holder() {
        let err = Error::LockHeld {
            table: "shared_patterns".to_string(),
            holder: "rebuild-pairs@42".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Table 'shared_patterns' is locked by rebuild-pairs@42"
        );
    }

    #[test]
    fn test_io_errors_are_retryable() {
        let err = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(err.is_retryable());
        assert!(!Error::SourceEmpty("pattern_occurrences".into()).is_retryable());
    }
}

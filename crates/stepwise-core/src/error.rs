use thiserror::Error;

/// Core error type for stepwise operations.
#[derive(Error, Debug)]
pub enum StepwiseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias using StepwiseError.
pub type Result<T> = std::result::Result<T, StepwiseError>;

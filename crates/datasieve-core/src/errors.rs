use thiserror::Error;

/// Coarse classification used by the engine to decide between aborting the
/// run and converting the error into a failed result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ErrorKind {
    Configuration,
    Schema,
    Resource,
    Data,
}

#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid or missing parameter, detected before any chunk is read
    #[error("Configuration error: {0}")]
    Config(String),

    /// Column not found in the current chunk
    #[error("Column '{column}' not found in chunk (available: {})", available.join(", "))]
    ColumnNotFound {
        column: String,
        available: Vec<String>,
    },

    /// The spillover store failed
    #[error("Spill store error: {0}")]
    Store(String),

    /// A bounded structure could not grow any further
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The Arrow kernel produced an error (e.g., unsupported cast)
    #[error("Arrow computation error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),

    /// Parquet decoding error
    #[error("Parquet error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),

    /// CSV reading or IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A value defeated a statistic or a rule
    #[error("Data error: {0}")]
    Data(String),
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Store(e.to_string())
    }
}

impl CoreError {
    pub fn config(message: impl Into<String>) -> Self {
        CoreError::Config(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Config(_) => ErrorKind::Configuration,
            CoreError::ColumnNotFound { .. } => ErrorKind::Schema,
            CoreError::Store(_)
            | CoreError::ResourceExhausted(_)
            | CoreError::IoError(_)
            | CoreError::ParquetError(_) => ErrorKind::Resource,
            CoreError::ArrowError(_) | CoreError::Data(_) => ErrorKind::Data,
        }
    }

    /// Only configuration errors unwind past the engine.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Extraction failed: {reason}")]
    Extraction { reason: String },

    #[error("No transaction history and no bootstrap date configured")]
    WatermarkUndefined,

    #[error("Load failed, batch rolled back: {0}")]
    Load(#[source] rusqlite::Error),

    #[error("Aggregation failed after committed load: {0}")]
    Aggregation(#[source] Box<EtlError>),

    #[error("Invalid amount '{value}': {reason}")]
    InvalidAmount { value: String, reason: String },

    #[error("Invalid timestamp '{value}'")]
    InvalidTimestamp { value: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EtlError {
    pub fn extraction(reason: impl Into<String>) -> Self {
        Self::Extraction { reason: reason.into() }
    }
}

pub type EtlResult<T> = Result<T, EtlError>;

use crate::facilities::ResourceField;
use shared::error::ClientError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("failed to serialize value for {key}: {source}")]
    Serialize {
        key: String,
        source: serde_json::Error,
    },
}

/// Failure of one of the external collaborators. Never fatal to the core.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("incident key {0} has no column on the remote sheet to delete by")]
    UntargetableKey(String),
}

#[derive(Debug, Error)]
pub enum ResourceUpdateError {
    #[error("unknown facility {0}")]
    UnknownFacility(String),
    #[error("facility {id} has no unit {unit}")]
    UnknownUnit { id: String, unit: usize },
    #[error("{field} level {value} is outside 0..=100")]
    OutOfRange { field: ResourceField, value: i64 },
    #[error("failed to persist resource state: {0}")]
    Persist(#[from] StoreError),
}

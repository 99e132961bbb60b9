use thiserror::Error;

use crate::error::{CoreError, ErrorCode};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("document not found: {collection}/{id}")]
    NotFound { collection: &'static str, id: String },

    #[error("duplicate key in {collection}: {key}")]
    DuplicateKey { collection: &'static str, key: String },

    #[error("concurrent update on {collection}/{id}")]
    RevisionConflict { collection: &'static str, id: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { collection, id } => {
                CoreError::new(ErrorCode::NotFound, format!("{collection}/{id} not found"))
            }
            StoreError::DuplicateKey { collection, key } => CoreError::new(
                ErrorCode::Conflict,
                format!("duplicate key in {collection}: {key}"),
            ),
            StoreError::RevisionConflict { collection, id } => CoreError::new(
                ErrorCode::Conflict,
                format!("concurrent update on {collection}/{id}"),
            ),
            other => CoreError::new(ErrorCode::DatabaseError, other.to_string()),
        }
    }
}

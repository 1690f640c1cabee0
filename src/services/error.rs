use thiserror::Error;

use super::recommendation_engine::EngineError;
use crate::database::DatabaseError;
use crate::validation::ValidationError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

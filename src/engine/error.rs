use thiserror::Error;

use crate::model::ReservationId;
use crate::persist::PersistError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    Validation(&'static str),
    #[error("conflict with reservation: {0}")]
    Conflict(ReservationId),
    #[error("unknown resource: {0}")]
    UnknownResource(String),
    #[error("resource already registered: {0}")]
    DuplicateResource(String),
    #[error("reservation not found: {0}")]
    NotFound(ReservationId),
    #[error("reservation already cancelled: {0}")]
    AlreadyCancelled(ReservationId),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistError),
}

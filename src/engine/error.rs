use thiserror::Error;
use ulid::Ulid;

use crate::model::{OccupantRef, OccupantStatus};

use super::transitions::Action;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("cannot {action} {occupant}: status is {from}")]
    InvalidTransition {
        occupant: OccupantRef,
        from: OccupantStatus,
        action: Action,
    },
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("no seat labelled {0:?} at this location")]
    UnknownSeatLabel(String),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("seat {seat_id} conflicts with active allocation {allocation_id}")]
    Conflict { seat_id: Ulid, allocation_id: Ulid },
    #[error("capacity exceeded: party of {requested}, {available} seats available ({reason})")]
    CapacityExceeded {
        requested: u32,
        available: i64,
        reason: String,
    },
    #[error("tenant context required: {0}")]
    TenantContextMissing(&'static str),
    #[error("cannot delete {0}: still referenced")]
    HasChildren(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    /// SQLSTATE reported to pgwire clients.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "22023",
            EngineError::InvalidTransition { .. } => "55000",
            EngineError::NotFound(_) | EngineError::UnknownSeatLabel(_) => "P0002",
            EngineError::AlreadyExists(_) => "23505",
            EngineError::Conflict { .. } => "40001",
            EngineError::CapacityExceeded { .. } => "53400",
            EngineError::TenantContextMissing(_) => "08004",
            EngineError::HasChildren(_) => "23503",
            EngineError::LimitExceeded(_) => "54000",
            EngineError::WalError(_) => "58030",
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }
}

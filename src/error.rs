//! Service errors.
//!
//! Every inbound operation returns [`DuelError`]. Validation and conflict
//! errors leave no partial effect. `TransientStore` means the whole write
//! group was rolled back and the same call may be retried.

use crate::network::channel::ChannelError;
use crate::network::protocol::{ErrorCode, ServerError};
use crate::session::model::TransitionError;
use crate::store::StoreError;

/// Error taxonomy for core operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DuelError {
    /// Bad mode, board size or missing field. Rejected before any state change.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown session or user.
    #[error("not found: {0}")]
    NotFound(String),

    /// Session already terminal, duplicate enqueue, user already playing.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Atomic write failed and was rolled back.
    #[error("store unavailable: {0}")]
    TransientStore(String),

    /// Delivery to a participant failed.
    #[error("delivery failed: {0}")]
    Channel(#[from] ChannelError),
}

impl DuelError {
    /// Only a rolled-back store write is worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DuelError::TransientStore(_))
    }

    /// Wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            DuelError::Validation(_) => ErrorCode::InvalidInput,
            DuelError::NotFound(_) => ErrorCode::NotFound,
            DuelError::Conflict(_) => ErrorCode::Conflict,
            DuelError::TransientStore(_) | DuelError::Channel(_) => ErrorCode::InternalError,
        }
    }

    /// Wire error payload.
    pub fn to_server_error(&self) -> ServerError {
        ServerError { code: self.code(), message: self.to_string(), retryable: self.is_retryable() }
    }
}

impl From<StoreError> for DuelError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::SessionNotFound(_) => DuelError::NotFound(e.to_string()),
            StoreError::StatusConflict { .. } | StoreError::DuplicateSession(_) => {
                DuelError::Conflict(e.to_string())
            }
            StoreError::Unavailable(_) => DuelError::TransientStore(e.to_string()),
        }
    }
}

impl From<TransitionError> for DuelError {
    fn from(e: TransitionError) -> Self {
        DuelError::Conflict(e.to_string())
    }
}

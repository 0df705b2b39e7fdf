//! Room coordinator error types.
//!
//! All coordinator operations report failures synchronously through
//! `RoomError`. Client-caused errors (`Forbidden`, `InvalidArgument`,
//! `DuplicateIdentity`) are returned to the originating caller only and
//! never broadcast. `RoomClosed` and `RoomNotFound` tell the caller to
//! drop its room reference and re-resolve via the registry.

use axum::http::StatusCode;
use thiserror::Error;

/// Room coordinator error type.
#[derive(Debug, Error)]
pub enum RoomError {
    /// Room id is not known to the registry.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Room has ended (terminal state) and accepts no further mutations.
    #[error("Room is closed")]
    RoomClosed,

    /// Identity is already connected to this room.
    #[error("Duplicate identity: {0}")]
    DuplicateIdentity(String),

    /// Requester lacks the role required for a privileged action.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Participant or poll not found (or poll no longer active).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed poll definition or vote.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Command could not be enqueued within the configured timeout.
    #[error("Command timed out")]
    Timeout,

    /// Internal error (channel failures, actor shutdown races).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RoomError {
    /// Returns the HTTP status for this error on the registry surface.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            RoomError::RoomNotFound(_) | RoomError::NotFound(_) => StatusCode::NOT_FOUND,
            RoomError::RoomClosed => StatusCode::GONE,
            RoomError::DuplicateIdentity(_) => StatusCode::CONFLICT,
            RoomError::Forbidden(_) => StatusCode::FORBIDDEN,
            RoomError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            RoomError::Timeout => StatusCode::SERVICE_UNAVAILABLE,
            RoomError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RoomError::RoomNotFound(_) => "Room not found".to_string(),
            RoomError::RoomClosed => "Room has ended".to_string(),
            RoomError::DuplicateIdentity(_) => "Identity already connected".to_string(),
            RoomError::Timeout => "Room is busy, please retry".to_string(),
            RoomError::Internal(_) => "An internal error occurred".to_string(),
            RoomError::Forbidden(msg)
            | RoomError::NotFound(msg)
            | RoomError::InvalidArgument(msg) => msg.clone(),
        }
    }
}

//! Error kinds surfaced by the core, aggregated behind [`CoreError`] for the
//! external control API while each module keeps its own narrow enum for
//! internal matching.

use thiserror::Error;

/// Frame codec failures (`FramingError` / `UnknownFrameType`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is not a well-formed OCPP-J array: {0}")]
    Framing(String),
    #[error("unknown OCPP-J message type {0}")]
    UnknownFrameType(i64),
}

/// Pending-call registry failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PendingError {
    #[error("pending-call registry is full (ceiling {ceiling})")]
    TooManyPending { ceiling: usize },
    #[error("message id {0} is already pending")]
    DuplicateMessageId(String),
    #[error("no response to action {action} (id {message_id}) before deadline")]
    CallTimeout { message_id: String, action: String },
    #[error("call {message_id} cancelled by session close")]
    Cancelled { message_id: String },
}

/// Session-level failures.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("websocket handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("socket closed: {0}")]
    SocketClosed(String),
    #[error("session inbox is full")]
    Busy,
    #[error("operation cancelled by session close")]
    Cancelled,
    #[error("no handler registered for action {0}")]
    UnknownAction(String),
    #[error("payload failed validation: {0}")]
    ValidationError(String),
    #[error("handler raised unexpectedly: {0}")]
    InternalError(String),
    #[error(transparent)]
    Pending(#[from] PendingError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Charging-profile engine failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProfileError {
    #[error("profile rejected: {0}")]
    Rejected(String),
    #[error("no transaction id {0} is active on this connector")]
    UnknownTransaction(i32),
}

/// Pool/ramp-controller failures.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("session {0} not found")]
    UnknownSession(String),
    #[error("session inbox is full")]
    Busy,
    #[error("available-memory heuristic below configured floor, refusing StartBatch")]
    MemoryFloor,
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Top-level error type returned across the external control API.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Pending(#[from] PendingError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

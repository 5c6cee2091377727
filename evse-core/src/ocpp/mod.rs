//! OCPP-J 1.6 protocol layer:
//! - `types`: request/response payloads and value types
//! - `messages`: CALL/CALLRESULT/CALLERROR framing
//! - `pending`: outbound call tracking
//! - `actions`: table-driven inbound action dispatch
//! - `session`: the session state machine
//! - `client`: WebSocket transport and the per-session actor loop

pub mod actions;
pub mod client;
pub mod messages;
pub mod pending;
pub mod session;
pub mod types;

pub use client::{spawn_session, SessionHandle, OCPP_SUBPROTOCOL};
pub use messages::{Action, Call, CallError, CallResult, ErrorCode, OcppMessage};
pub use pending::{CallOutcome, PendingRegistry};
pub use session::{Session, SessionCommand, SessionSnapshot, SessionState, TimerKind};

pub mod action;
pub mod activity;
pub mod command;
pub mod effect;
pub mod event;
pub mod handlers;
pub mod lifecycle;
pub mod merge;
pub mod message;
pub mod part;
pub mod permission;
pub mod reduce;
pub mod runtime;
pub mod state;
pub mod types;

#[cfg(test)]
mod tests;

pub use action::{Action, Moment};
pub use activity::ActivityPhase;
pub use effect::{Effect, SessionNotice, TimerKind};
pub use event::BackendEvent;
pub use lifecycle::{CompletionCause, StreamPhase};
pub use message::{FinishReason, Message, MessageInfo};
pub use part::{Part, PartBody, ToolStatus};
pub use permission::{EditMode, PermissionRequest, PermissionResponse, QuestionRequest};
pub use reduce::reduce;
pub use runtime::{
    AbortOutcome, ForkOutcome, RevertOutcome, SendRequest, SessionError, SessionHandle,
    SessionManager, spawn_session_actor,
};
pub use state::{SessionSnapshot, SessionState};
pub use types::{MessageId, PartId, PermissionId, QuestionId, Role, SessionId, SessionInfo};

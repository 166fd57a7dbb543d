use tokio::time::Instant;

use super::activity::ActivityPhase;
use super::permission::{PermissionRequest, PermissionResponse, QuestionRequest};
use super::types::{MessageId, PermissionId, QuestionId, SessionInfo};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Per-message inactivity window.
    Inactivity(MessageId),
    UserBatchFlush,
    Cooldown,
    /// Waits for the first assistant part after an acknowledged send.
    ReplyWatchdog,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Starts the timer, replacing any pending one of the same kind.
    ScheduleTimer {
        kind: TimerKind,
        deadline: Instant,
    },
    CancelTimer {
        kind: TimerKind,
    },
    Notify(SessionNotice),
    ReplyPermission {
        permission_id: PermissionId,
        response: PermissionResponse,
    },
    /// Cancels the outstanding send token.
    CancelSend,
}

/// Change notification for subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    MessageUpdated(MessageId),
    MessageRemoved(MessageId),
    /// The list changed wholesale (fetch, revert).
    MessagesReset,
    StreamingChanged {
        streaming_message_id: Option<MessageId>,
        is_streaming: bool,
    },
    ActivityChanged(ActivityPhase),
    SessionUpdated(SessionInfo),
    PermissionQueued(PermissionRequest),
    PermissionAutoApproved(PermissionId),
    PermissionResolved(PermissionId),
    QuestionQueued(QuestionRequest),
    QuestionResolved(QuestionId),
    DraftRestored,
    CommandFailed { command: String, error: String },
}

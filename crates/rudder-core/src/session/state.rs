use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

use super::activity::{ActivityMachine, ActivityPhase};
use super::lifecycle::StreamLifecycle;
use super::message::{Message, PendingUserMessageMeta};
use super::part::Part;
use super::permission::{
    EditMode, PermissionGate, PermissionRequest, QuestionRequest, effective_edit_mode,
};
use super::types::{MessageId, SessionInfo};
use crate::backend::Attachment;
use crate::config::EngineConfig;

/// A user-role part waiting for the batch window to close.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedUserPart {
    pub message_id: MessageId,
    pub part: Part,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPush {
    /// The queue was empty; the flush timer needs starting.
    First,
    Queued,
    /// Capacity reached; flush now.
    Full,
}

/// Bounded queue of user-role parts, flushed together after a short window.
#[derive(Debug, Clone)]
pub struct UserPartBatch {
    queue: VecDeque<QueuedUserPart>,
    capacity: usize,
}

impl UserPartBatch {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, item: QueuedUserPart) -> BatchPush {
        let was_empty = self.queue.is_empty();
        self.queue.push_back(item);
        if self.queue.len() >= self.capacity {
            BatchPush::Full
        } else if was_empty {
            BatchPush::First
        } else {
            BatchPush::Queued
        }
    }

    pub fn contains(&self, message_id: &MessageId) -> bool {
        self.queue.iter().any(|item| &item.message_id == message_id)
    }

    pub fn retain_messages(&mut self, keep: impl Fn(&MessageId) -> bool) {
        self.queue.retain(|item| keep(&item.message_id));
    }

    pub fn drain(&mut self) -> Vec<QueuedUserPart> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Submission kept until the backend acknowledges it, so a hard failure can restore it.
#[derive(Debug, Clone, PartialEq)]
pub struct InFlightSend {
    pub seq: u64,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingInput {
    pub text: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// Everything the engine owns for one active session.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session: SessionInfo,
    pub config: Arc<EngineConfig>,

    /// Ordered, at most one entry per id.
    pub messages: IndexMap<MessageId, Message>,
    pub lifecycle: StreamLifecycle,
    pub activity: ActivityMachine,
    pub gate: PermissionGate,

    pub streaming_message_id: Option<MessageId>,
    pub is_streaming: bool,

    pub pending_user_meta: Option<PendingUserMessageMeta>,
    pub user_batch: UserPartBatch,
    pub in_flight: Option<InFlightSend>,
    pub send_seq: u64,

    pub pending_input: Option<String>,
    pub pending_attachments: Vec<Attachment>,

    pub selected_agent: Option<String>,
    pub edit_mode_override: Option<EditMode>,

    pub loaded_limit: usize,
    pub has_more: bool,
}

impl SessionState {
    pub fn new(session: SessionInfo, config: Arc<EngineConfig>) -> Self {
        let capacity = config.stream.user_batch_capacity;
        Self {
            session,
            config,
            messages: IndexMap::new(),
            lifecycle: StreamLifecycle::new(),
            activity: ActivityMachine::new(),
            gate: PermissionGate::new(),
            streaming_message_id: None,
            is_streaming: false,
            pending_user_meta: None,
            user_batch: UserPartBatch::new(capacity),
            in_flight: None,
            send_seq: 0,
            pending_input: None,
            pending_attachments: Vec::new(),
            selected_agent: None,
            edit_mode_override: None,
            loaded_limit: 0,
            has_more: false,
        }
    }

    pub fn effective_edit_mode(&self) -> EditMode {
        effective_edit_mode(
            &self.config.permissions,
            self.selected_agent.as_deref(),
            self.edit_mode_override,
        )
    }

    pub fn activity_phase(&self) -> ActivityPhase {
        self.activity.phase()
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.get(id)
    }

    pub fn take_pending_input(&mut self) -> PendingInput {
        PendingInput {
            text: self.pending_input.take(),
            attachments: std::mem::take(&mut self.pending_attachments),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session: self.session.clone(),
            messages: self.messages.values().cloned().collect(),
            streaming_message_id: self.streaming_message_id.clone(),
            is_streaming: self.is_streaming,
            activity: self.activity.phase(),
            permissions: self.gate.permissions().cloned().collect(),
            questions: self.gate.questions().cloned().collect(),
            pending_input: self.pending_input.clone(),
            pending_attachments: self.pending_attachments.clone(),
            selected_agent: self.selected_agent.clone(),
            edit_mode: self.effective_edit_mode(),
            has_more: self.has_more,
        }
    }
}

/// Read-only view handed to presentation layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session: SessionInfo,
    pub messages: Vec<Message>,
    pub streaming_message_id: Option<MessageId>,
    pub is_streaming: bool,
    pub activity: ActivityPhase,
    pub permissions: Vec<PermissionRequest>,
    pub questions: Vec<QuestionRequest>,
    pub pending_input: Option<String>,
    pub pending_attachments: Vec<Attachment>,
    pub selected_agent: Option<String>,
    pub edit_mode: EditMode,
    pub has_more: bool,
}

impl SessionSnapshot {
    pub fn revert_pointer(&self) -> Option<&MessageId> {
        self.session.revert_pointer.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(id: &str) -> QueuedUserPart {
        QueuedUserPart {
            message_id: MessageId::from(id),
            part: Part::text("x"),
        }
    }

    #[test]
    fn batch_reports_first_and_full() {
        let mut batch = UserPartBatch::new(3);
        assert_eq!(batch.push(queued("u1")), BatchPush::First);
        assert_eq!(batch.push(queued("u1")), BatchPush::Queued);
        assert_eq!(batch.push(queued("u2")), BatchPush::Full);
        assert!(batch.contains(&MessageId::from("u2")));

        let drained = batch.drain();
        assert_eq!(drained.len(), 3);
        assert!(batch.is_empty());
        assert_eq!(batch.push(queued("u3")), BatchPush::First);
    }

    #[test]
    fn take_pending_input_consumes_draft() {
        let mut state = SessionState::new(SessionInfo::new("s1"), Arc::default());
        state.pending_input = Some("retry this".to_string());
        state.pending_attachments.push(Attachment {
            mime: "image/png".to_string(),
            url: "file:///tmp/a.png".to_string(),
            filename: None,
        });

        let taken = state.take_pending_input();
        assert_eq!(taken.text.as_deref(), Some("retry this"));
        assert_eq!(taken.attachments.len(), 1);
        assert_eq!(state.take_pending_input(), PendingInput::default());
    }
}

use serde::{Deserialize, Serialize};

use super::message::Message;
use super::part::Part;
use super::permission::{PermissionRequest, QuestionRequest};
use super::types::{MessageId, PartId, PermissionId, QuestionId, Role, SessionId, SessionInfo};

/// Inbound update from the backend event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BackendEvent {
    PartUpdated {
        session_id: SessionId,
        message_id: MessageId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
        part: Part,
    },
    PartRemoved {
        session_id: SessionId,
        message_id: MessageId,
        part_id: PartId,
    },
    /// Message info, and optionally parts, as known to the backend.
    MessageUpdated {
        session_id: SessionId,
        message: Message,
    },
    MessageRemoved {
        session_id: SessionId,
        message_id: MessageId,
    },
    SessionUpdated {
        session: SessionInfo,
    },
    SessionIdle {
        session_id: SessionId,
    },
    PermissionAsked {
        request: PermissionRequest,
    },
    PermissionReplied {
        session_id: SessionId,
        permission_id: PermissionId,
    },
    QuestionAsked {
        request: QuestionRequest,
    },
    QuestionReplied {
        session_id: SessionId,
        question_id: QuestionId,
    },
    QuestionRejected {
        session_id: SessionId,
        question_id: QuestionId,
    },
}

impl BackendEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            BackendEvent::PartUpdated { session_id, .. }
            | BackendEvent::PartRemoved { session_id, .. }
            | BackendEvent::MessageUpdated { session_id, .. }
            | BackendEvent::MessageRemoved { session_id, .. }
            | BackendEvent::SessionIdle { session_id }
            | BackendEvent::PermissionReplied { session_id, .. }
            | BackendEvent::QuestionReplied { session_id, .. }
            | BackendEvent::QuestionRejected { session_id, .. } => session_id,
            BackendEvent::SessionUpdated { session } => &session.id,
            BackendEvent::PermissionAsked { request } => &request.session_id,
            BackendEvent::QuestionAsked { request } => &request.session_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BackendEvent::PartUpdated { .. } => "part-updated",
            BackendEvent::PartRemoved { .. } => "part-removed",
            BackendEvent::MessageUpdated { .. } => "message-updated",
            BackendEvent::MessageRemoved { .. } => "message-removed",
            BackendEvent::SessionUpdated { .. } => "session-updated",
            BackendEvent::SessionIdle { .. } => "session-idle",
            BackendEvent::PermissionAsked { .. } => "permission-asked",
            BackendEvent::PermissionReplied { .. } => "permission-replied",
            BackendEvent::QuestionAsked { .. } => "question-asked",
            BackendEvent::QuestionReplied { .. } => "question-replied",
            BackendEvent::QuestionRejected { .. } => "question-rejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::part::PartBody;

    #[test]
    fn part_updated_parses_from_stream_json() {
        let line = r#"{"type":"part-updated","session_id":"s1","message_id":"m1","role":"assistant","part":{"type":"text","text":"Hi"}}"#;
        let event: BackendEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.session_id().as_str(), "s1");
        assert_eq!(event.kind(), "part-updated");
        let BackendEvent::PartUpdated { role, part, .. } = event else {
            panic!("wrong variant");
        };
        assert_eq!(role, Some(Role::Assistant));
        assert!(matches!(part.body, PartBody::Text { ref text, .. } if text == "Hi"));
    }

    #[test]
    fn message_updated_carries_role_tagged_info() {
        let line = r#"{"type":"message-updated","session_id":"s1","message":{"id":"m1","created_at":5,"role":"assistant","finish":"stop"}}"#;
        let event: BackendEvent = serde_json::from_str(line).unwrap();
        let BackendEvent::MessageUpdated { message, .. } = event else {
            panic!("wrong variant");
        };
        assert!(message.is_finished_with_stop());
        assert!(message.parts.is_empty());
    }
}

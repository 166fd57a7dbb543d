//! Message types for the session stream.
//!
//! Role-specific metadata lives in [`MessageInfo`]: a user message carries the
//! agent/model selection it was sent with, an assistant message carries its
//! finish and abort state.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::part::{Part, PartBody};
use super::types::{MessageId, Role, Timestamp};

/// Terminal marker on an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Error,
    Other(String),
}

impl FinishReason {
    pub fn is_stop(&self) -> bool {
        matches!(self, FinishReason::Stop)
    }
}

impl From<String> for FinishReason {
    fn from(value: String) -> Self {
        match value.as_str() {
            "stop" => FinishReason::Stop,
            "tool-calls" => FinishReason::ToolCalls,
            "length" => FinishReason::Length,
            "error" => FinishReason::Error,
            _ => FinishReason::Other(value),
        }
    }
}

impl From<&str> for FinishReason {
    fn from(value: &str) -> Self {
        FinishReason::from(value.to_string())
    }
}

impl From<FinishReason> for String {
    fn from(value: FinishReason) -> Self {
        value.to_string()
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishReason::Stop => f.write_str("stop"),
            FinishReason::ToolCalls => f.write_str("tool-calls"),
            FinishReason::Length => f.write_str("length"),
            FinishReason::Error => f.write_str("error"),
            FinishReason::Other(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<FinishReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum MessageInfo {
    User(UserInfo),
    Assistant(AssistantInfo),
}

impl MessageInfo {
    pub fn role(&self) -> Role {
        match self {
            MessageInfo::User(_) => Role::User,
            MessageInfo::Assistant(_) => Role::Assistant,
        }
    }

    /// Field-wise merge where every field `incoming` sets wins.
    pub fn merge(&mut self, incoming: MessageInfo) {
        match (self, incoming) {
            (MessageInfo::User(existing), MessageInfo::User(incoming)) => {
                merge_field(&mut existing.agent_mode, incoming.agent_mode);
                merge_field(&mut existing.provider_id, incoming.provider_id);
                merge_field(&mut existing.model_id, incoming.model_id);
                merge_field(&mut existing.variant, incoming.variant);
            }
            (MessageInfo::Assistant(existing), MessageInfo::Assistant(incoming)) => {
                merge_field(&mut existing.finish, incoming.finish);
                merge_field(&mut existing.aborted_at, incoming.aborted_at);
                merge_field(&mut existing.status, incoming.status);
                merge_field(&mut existing.agent_mode, incoming.agent_mode);
                merge_field(&mut existing.provider_id, incoming.provider_id);
                merge_field(&mut existing.model_id, incoming.model_id);
            }
            (existing, incoming) => *existing = incoming,
        }
    }
}

fn merge_field<T>(slot: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *slot = incoming;
    }
}

/// Metadata staged when the user submits, applied when the backend echoes the message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUserMessageMeta {
    pub agent_mode: Option<String>,
    pub provider_id: Option<String>,
    pub model_id: Option<String>,
    pub variant: Option<String>,
}

impl From<PendingUserMessageMeta> for UserInfo {
    fn from(meta: PendingUserMessageMeta) -> Self {
        Self {
            agent_mode: meta.agent_mode,
            provider_id: meta.provider_id,
            model_id: meta.model_id,
            variant: meta.variant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub created_at: Timestamp,
    #[serde(flatten)]
    pub info: MessageInfo,
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default)]
    pub streaming: bool,
}

impl Message {
    pub fn user(id: impl Into<MessageId>, created_at: Timestamp, info: UserInfo) -> Self {
        Self {
            id: id.into(),
            created_at,
            info: MessageInfo::User(info),
            parts: Vec::new(),
            streaming: false,
        }
    }

    pub fn assistant(id: impl Into<MessageId>, created_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            created_at,
            info: MessageInfo::Assistant(AssistantInfo::default()),
            parts: Vec::new(),
            streaming: false,
        }
    }

    pub fn with_parts(mut self, parts: Vec<Part>) -> Self {
        self.parts = parts;
        self
    }

    pub fn with_finish(mut self, finish: FinishReason) -> Self {
        if let MessageInfo::Assistant(info) = &mut self.info {
            info.finish = Some(finish);
        }
        self
    }

    pub fn role(&self) -> Role {
        self.info.role()
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self.info, MessageInfo::Assistant(_))
    }

    pub fn finish(&self) -> Option<&FinishReason> {
        match &self.info {
            MessageInfo::Assistant(info) => info.finish.as_ref(),
            MessageInfo::User(_) => None,
        }
    }

    pub fn is_finished_with_stop(&self) -> bool {
        self.finish().is_some_and(FinishReason::is_stop)
    }

    pub fn aborted_at(&self) -> Option<Timestamp> {
        match &self.info {
            MessageInfo::Assistant(info) => info.aborted_at,
            MessageInfo::User(_) => None,
        }
    }

    /// Total prose length across parts, the merge engine's completeness proxy.
    pub fn text_len(&self) -> usize {
        self.parts.iter().map(Part::text_len).sum()
    }

    /// Concatenated user-visible text, skipping synthetic parts.
    pub fn visible_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match &part.body {
                PartBody::Text { text, synthetic } if *synthetic != Some(true) => {
                    Some(text.as_str())
                }
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_round_trips_through_strings() {
        assert_eq!(FinishReason::from("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from("tool-calls"), FinishReason::ToolCalls);
        assert_eq!(
            FinishReason::from("content-filter"),
            FinishReason::Other("content-filter".to_string())
        );
        assert_eq!(FinishReason::ToolCalls.to_string(), "tool-calls");
    }

    #[test]
    fn info_merge_prefers_fields_set_by_incoming() {
        let mut info = MessageInfo::Assistant(AssistantInfo {
            finish: Some(FinishReason::Stop),
            model_id: Some("model-a".to_string()),
            ..AssistantInfo::default()
        });
        info.merge(MessageInfo::Assistant(AssistantInfo {
            provider_id: Some("provider".to_string()),
            model_id: Some("model-b".to_string()),
            ..AssistantInfo::default()
        }));

        let MessageInfo::Assistant(info) = info else {
            panic!("role changed");
        };
        assert_eq!(info.finish, Some(FinishReason::Stop));
        assert_eq!(info.model_id.as_deref(), Some("model-b"));
        assert_eq!(info.provider_id.as_deref(), Some("provider"));
    }

    #[test]
    fn visible_text_skips_synthetic_parts() {
        let message = Message::user("m1", 0, UserInfo::default()).with_parts(vec![
            Part::text("fix the build"),
            Part::new(PartBody::Text {
                text: "<file attached>".to_string(),
                synthetic: Some(true),
            }),
        ]);
        assert_eq!(message.visible_text(), "fix the build");
    }

    #[test]
    fn message_json_carries_role_tag() {
        let message = Message::assistant("m1", 10).with_finish(FinishReason::Stop);
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["finish"], "stop");

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, message);
    }
}

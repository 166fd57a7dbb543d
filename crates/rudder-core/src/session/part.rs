//! Message parts and their merge rules.
//!
//! A part is one typed fragment of a message. Parts are matched across updates by
//! their [`PartKey`]: the explicit id when the backend sends one, otherwise a key
//! derived from the part type, step reason and tool call id. Keyless text parts
//! are streaming deltas and have no key at all.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::{PartId, Timestamp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<PartId>,
    #[serde(flatten)]
    pub body: PartBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PartBody {
    Text {
        text: String,
        /// Marks text injected by the backend rather than typed by a person.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        synthetic: Option<bool>,
    },
    Reasoning {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        started_at: Option<Timestamp>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ended_at: Option<Timestamp>,
    },
    Tool {
        call_id: String,
        tool: String,
        state: ToolState,
    },
    StepStart,
    StepFinish {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default)]
        aborted: bool,
    },
    File {
        mime: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ToolStatus {
    Pending,
    Running,
    Done,
    Aborted,
}

impl ToolStatus {
    pub fn is_open(self) -> bool {
        matches!(self, ToolStatus::Pending | ToolStatus::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolState {
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl ToolState {
    pub fn with_status(status: ToolStatus) -> Self {
        Self {
            status,
            input: None,
            output: None,
            error: None,
            title: None,
        }
    }
}

/// Identity used to recognise two updates of the same logical part.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PartKey {
    Id(PartId),
    Derived(String),
}

impl fmt::Display for PartKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartKey::Id(id) => write!(f, "id:{id}"),
            PartKey::Derived(key) => write!(f, "derived:{key}"),
        }
    }
}

impl Part {
    pub fn new(body: PartBody) -> Self {
        Self { id: None, body }
    }

    pub fn with_id(id: impl Into<PartId>, body: PartBody) -> Self {
        Self {
            id: Some(id.into()),
            body,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(PartBody::Text {
            text: text.into(),
            synthetic: None,
        })
    }

    pub fn kind(&self) -> &'static str {
        self.body.kind()
    }

    pub fn stable_key(&self) -> Option<PartKey> {
        if let Some(id) = &self.id {
            return Some(PartKey::Id(id.clone()));
        }
        let (reason, call_id) = match &self.body {
            PartBody::Text { .. } => return None,
            PartBody::StepFinish { reason, .. } => (reason.as_deref(), None),
            PartBody::Tool { call_id, .. } => (None, Some(call_id.as_str())),
            PartBody::Reasoning { .. } | PartBody::StepStart | PartBody::File { .. } => {
                (None, None)
            }
        };
        Some(PartKey::Derived(format!(
            "{}:{}:{}",
            self.kind(),
            reason.unwrap_or_default(),
            call_id.unwrap_or_default()
        )))
    }

    pub fn is_keyless_text(&self) -> bool {
        self.id.is_none() && matches!(self.body, PartBody::Text { .. })
    }

    /// Characters of prose carried by this part.
    pub fn text_len(&self) -> usize {
        match &self.body {
            PartBody::Text { text, .. } | PartBody::Reasoning { text, .. } => text.chars().count(),
            _ => 0,
        }
    }

    /// Shallow patch: incoming values win, absent incoming values keep the existing ones.
    pub fn patch(&mut self, incoming: Part) {
        if incoming.id.is_some() {
            self.id = incoming.id;
        }
        self.body.patch(incoming.body);
    }

    /// True for tool calls still in flight, reasoning without an end time, and step starts.
    pub fn is_unfinished(&self) -> bool {
        match &self.body {
            PartBody::Tool { state, .. } => state.status.is_open(),
            PartBody::Reasoning { ended_at, .. } => ended_at.is_none(),
            PartBody::StepStart => true,
            _ => false,
        }
    }
}

impl PartBody {
    pub fn kind(&self) -> &'static str {
        match self {
            PartBody::Text { .. } => "text",
            PartBody::Reasoning { .. } => "reasoning",
            PartBody::Tool { .. } => "tool",
            PartBody::StepStart => "step-start",
            PartBody::StepFinish { .. } => "step-finish",
            PartBody::File { .. } => "file",
        }
    }

    fn patch(&mut self, incoming: PartBody) {
        match (self, incoming) {
            (
                PartBody::Text { text, synthetic },
                PartBody::Text {
                    text: new_text,
                    synthetic: new_synthetic,
                },
            ) => {
                *text = new_text;
                patch_option(synthetic, new_synthetic);
            }
            (
                PartBody::Reasoning {
                    text,
                    started_at,
                    ended_at,
                },
                PartBody::Reasoning {
                    text: new_text,
                    started_at: new_started,
                    ended_at: new_ended,
                },
            ) => {
                *text = new_text;
                patch_option(started_at, new_started);
                patch_option(ended_at, new_ended);
            }
            (
                PartBody::Tool {
                    call_id,
                    tool,
                    state,
                },
                PartBody::Tool {
                    call_id: new_call_id,
                    tool: new_tool,
                    state: new_state,
                },
            ) => {
                *call_id = new_call_id;
                *tool = new_tool;
                state.status = new_state.status;
                patch_option(&mut state.input, new_state.input);
                patch_option(&mut state.output, new_state.output);
                patch_option(&mut state.error, new_state.error);
                patch_option(&mut state.title, new_state.title);
            }
            (
                PartBody::StepFinish { reason, aborted },
                PartBody::StepFinish {
                    reason: new_reason,
                    aborted: new_aborted,
                },
            ) => {
                patch_option(reason, new_reason);
                *aborted |= new_aborted;
            }
            (
                PartBody::File {
                    mime,
                    url,
                    filename,
                },
                PartBody::File {
                    mime: new_mime,
                    url: new_url,
                    filename: new_filename,
                },
            ) => {
                *mime = new_mime;
                *url = new_url;
                patch_option(filename, new_filename);
            }
            (existing, incoming) => *existing = incoming,
        }
    }
}

fn patch_option<T>(slot: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *slot = incoming;
    }
}

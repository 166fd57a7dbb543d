//! Backend-client collaborator.
//!
//! The engine never talks to the network itself; it drives an implementation of
//! [`BackendClient`] and classifies its failures with [`BackendError::severity`].

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::message::Message;
use crate::session::permission::PermissionResponse;
use crate::session::types::{MessageId, PermissionId, QuestionId, SessionId, SessionInfo};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Request timed out: {details}")]
    Timeout { details: String },
    #[error("Network error: {details}")]
    Network { details: String },
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Unauthorized: {details}")]
    Unauthorized { details: String },
    #[error("Invalid response: {details}")]
    InvalidResponse { details: String },
    #[error("{message}")]
    Remote { message: String },
}

/// How a failed send is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    /// The backend may still deliver the reply; the failure is swallowed.
    Soft,
    /// The submission is rolled back and the failure surfaced.
    Hard,
}

static SOFT_MESSAGE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?i)gateway time-?out|still processing|timed? ?out|connection (reset|refused|closed)|network|socket hang up|fetch failed",
    )
    .ok()
});

fn is_soft_message(message: &str) -> bool {
    SOFT_MESSAGE
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(message))
}

impl BackendError {
    pub fn severity(&self) -> Severity {
        let soft = match self {
            BackendError::Timeout { .. } | BackendError::Network { .. } => true,
            BackendError::Http { status, message } => {
                matches!(status, 408 | 502 | 503 | 504) || is_soft_message(message)
            }
            BackendError::Remote { message } => is_soft_message(message),
            BackendError::Unauthorized { .. } | BackendError::InvalidResponse { .. } => false,
        };
        if soft { Severity::Soft } else { Severity::Hard }
    }

    pub fn is_soft(&self) -> bool {
        self.severity() == Severity::Soft
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub provider_id: String,
    pub model_id: String,
}

impl ModelSelection {
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub mime: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub text: String,
    pub model: ModelSelection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

#[async_trait]
pub trait BackendClient: Send + Sync + 'static {
    async fn send_message(
        &self,
        session_id: &SessionId,
        request: PromptRequest,
    ) -> Result<(), BackendError>;

    async fn summarize_session(
        &self,
        session_id: &SessionId,
        model: &ModelSelection,
    ) -> Result<(), BackendError>;

    async fn init_session(
        &self,
        session_id: &SessionId,
        model: &ModelSelection,
    ) -> Result<(), BackendError>;

    async fn abort_session(&self, session_id: &SessionId) -> Result<(), BackendError>;

    /// Rewinds the session to `message_id`; the returned info carries the revert pointer.
    async fn revert_session(
        &self,
        session_id: &SessionId,
        message_id: &MessageId,
    ) -> Result<SessionInfo, BackendError>;

    async fn unrevert_session(&self, session_id: &SessionId) -> Result<SessionInfo, BackendError>;

    async fn fork_session(
        &self,
        session_id: &SessionId,
        message_id: &MessageId,
    ) -> Result<SessionInfo, BackendError>;

    async fn get_session_messages(
        &self,
        session_id: &SessionId,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, BackendError>;

    async fn reply_to_permission(
        &self,
        session_id: &SessionId,
        permission_id: &PermissionId,
        response: PermissionResponse,
    ) -> Result<(), BackendError>;

    async fn reply_to_question(
        &self,
        session_id: &SessionId,
        question_id: &QuestionId,
        answers: Vec<Vec<String>>,
    ) -> Result<(), BackendError>;

    async fn reject_question(
        &self,
        session_id: &SessionId,
        question_id: &QuestionId,
    ) -> Result<(), BackendError>;
}

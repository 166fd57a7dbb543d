//! Test utilities for rudder-core
//!
//! An in-memory [`BackendClient`] that records every call and can be scripted
//! to fail or stall, plus small event builders.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::backend::{BackendClient, BackendError, ModelSelection, PromptRequest};
use crate::session::event::BackendEvent;
use crate::session::message::Message;
use crate::session::part::Part;
use crate::session::permission::{PermissionRequest, PermissionResponse};
use crate::session::types::{MessageId, PermissionId, QuestionId, Role, SessionId, SessionInfo};

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    SendMessage(PromptRequest),
    Summarize(ModelSelection),
    Init(ModelSelection),
    Abort,
    Revert(MessageId),
    Unrevert,
    Fork(MessageId),
    GetMessages(Option<usize>),
    ReplyPermission(PermissionId, PermissionResponse),
    ReplyQuestion(QuestionId, Vec<Vec<String>>),
    RejectQuestion(QuestionId),
}

impl BackendCall {
    pub fn name(&self) -> &'static str {
        match self {
            BackendCall::SendMessage(_) => "send_message",
            BackendCall::Summarize(_) => "summarize_session",
            BackendCall::Init(_) => "init_session",
            BackendCall::Abort => "abort_session",
            BackendCall::Revert(_) => "revert_session",
            BackendCall::Unrevert => "unrevert_session",
            BackendCall::Fork(_) => "fork_session",
            BackendCall::GetMessages(_) => "get_session_messages",
            BackendCall::ReplyPermission(..) => "reply_to_permission",
            BackendCall::ReplyQuestion(..) => "reply_to_question",
            BackendCall::RejectQuestion(_) => "reject_question",
        }
    }
}

#[derive(Default)]
struct MockState {
    calls: Vec<(SessionId, BackendCall)>,
    failures: HashMap<&'static str, BackendError>,
    messages: HashMap<SessionId, Vec<Message>>,
    send_delay: Option<Duration>,
}

/// In-memory backend for tests. Clones share state.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call of `method` fail with `error` until cleared.
    pub async fn fail(&self, method: &'static str, error: BackendError) {
        self.state.lock().await.failures.insert(method, error);
    }

    pub async fn clear_failure(&self, method: &'static str) {
        self.state.lock().await.failures.remove(method);
    }

    /// Delays the acknowledgement of every prompt dispatch.
    pub async fn set_send_delay(&self, delay: Duration) {
        self.state.lock().await.send_delay = Some(delay);
    }

    /// Stored history returned by `get_session_messages`.
    pub async fn set_messages(&self, session_id: &SessionId, messages: Vec<Message>) {
        self.state
            .lock()
            .await
            .messages
            .insert(session_id.clone(), messages);
    }

    pub async fn calls(&self) -> Vec<(SessionId, BackendCall)> {
        self.state.lock().await.calls.clone()
    }

    pub async fn calls_named(&self, method: &str) -> Vec<BackendCall> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|(_, call)| call.name() == method)
            .map(|(_, call)| call.clone())
            .collect()
    }

    async fn record(&self, session_id: &SessionId, call: BackendCall) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        let failure = state.failures.get(call.name()).cloned();
        state.calls.push((session_id.clone(), call));
        failure.map_or(Ok(()), Err)
    }

    fn session_info(session_id: &SessionId, revert_pointer: Option<MessageId>) -> SessionInfo {
        let mut info = SessionInfo::new(session_id.clone());
        info.revert_pointer = revert_pointer;
        info
    }
}

#[async_trait]
impl BackendClient for MockBackend {
    async fn send_message(
        &self,
        session_id: &SessionId,
        request: PromptRequest,
    ) -> Result<(), BackendError> {
        let delay = self.state.lock().await.send_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.record(session_id, BackendCall::SendMessage(request))
            .await
    }

    async fn summarize_session(
        &self,
        session_id: &SessionId,
        model: &ModelSelection,
    ) -> Result<(), BackendError> {
        self.record(session_id, BackendCall::Summarize(model.clone()))
            .await
    }

    async fn init_session(
        &self,
        session_id: &SessionId,
        model: &ModelSelection,
    ) -> Result<(), BackendError> {
        self.record(session_id, BackendCall::Init(model.clone()))
            .await
    }

    async fn abort_session(&self, session_id: &SessionId) -> Result<(), BackendError> {
        self.record(session_id, BackendCall::Abort).await
    }

    async fn revert_session(
        &self,
        session_id: &SessionId,
        message_id: &MessageId,
    ) -> Result<SessionInfo, BackendError> {
        self.record(session_id, BackendCall::Revert(message_id.clone()))
            .await?;
        Ok(Self::session_info(session_id, Some(message_id.clone())))
    }

    async fn unrevert_session(&self, session_id: &SessionId) -> Result<SessionInfo, BackendError> {
        self.record(session_id, BackendCall::Unrevert).await?;
        Ok(Self::session_info(session_id, None))
    }

    async fn fork_session(
        &self,
        session_id: &SessionId,
        message_id: &MessageId,
    ) -> Result<SessionInfo, BackendError> {
        self.record(session_id, BackendCall::Fork(message_id.clone()))
            .await?;
        let forked = SessionId::from(format!("ses_{}", uuid::Uuid::new_v4().simple()));
        Ok(Self::session_info(&forked, None))
    }

    async fn get_session_messages(
        &self,
        session_id: &SessionId,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, BackendError> {
        self.record(session_id, BackendCall::GetMessages(limit))
            .await?;
        let state = self.state.lock().await;
        let stored = state.messages.get(session_id).cloned().unwrap_or_default();
        let skip = limit.map_or(0, |limit| stored.len().saturating_sub(limit));
        Ok(stored.into_iter().skip(skip).collect())
    }

    async fn reply_to_permission(
        &self,
        session_id: &SessionId,
        permission_id: &PermissionId,
        response: PermissionResponse,
    ) -> Result<(), BackendError> {
        self.record(
            session_id,
            BackendCall::ReplyPermission(permission_id.clone(), response),
        )
        .await
    }

    async fn reply_to_question(
        &self,
        session_id: &SessionId,
        question_id: &QuestionId,
        answers: Vec<Vec<String>>,
    ) -> Result<(), BackendError> {
        self.record(
            session_id,
            BackendCall::ReplyQuestion(question_id.clone(), answers),
        )
        .await
    }

    async fn reject_question(
        &self,
        session_id: &SessionId,
        question_id: &QuestionId,
    ) -> Result<(), BackendError> {
        self.record(session_id, BackendCall::RejectQuestion(question_id.clone()))
            .await
    }
}

pub fn part_updated(session_id: &str, message_id: &str, role: Role, part: Part) -> BackendEvent {
    BackendEvent::PartUpdated {
        session_id: session_id.into(),
        message_id: message_id.into(),
        role: Some(role),
        part,
    }
}

pub fn permission_request(id: &str, session_id: &str, kind: &str) -> PermissionRequest {
    PermissionRequest {
        id: id.into(),
        session_id: session_id.into(),
        kind: kind.to_string(),
        title: format!("{kind} request"),
        patterns: Vec::new(),
        message_id: None,
        call_id: None,
        metadata: serde_json::Value::Null,
    }
}

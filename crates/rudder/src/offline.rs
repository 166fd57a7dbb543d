use async_trait::async_trait;
use rudder_core::backend::{BackendClient, BackendError, ModelSelection, PromptRequest};
use rudder_core::session::{
    Message, MessageId, PermissionId, PermissionResponse, QuestionId, SessionId, SessionInfo,
};
use tracing::debug;

/// Backend used for replays: there is no server, so every remote call is refused
/// except the ones whose local half is complete on its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineBackend;

fn offline(call: &str) -> BackendError {
    BackendError::Remote {
        message: format!("{call} is unavailable while replaying offline"),
    }
}

#[async_trait]
impl BackendClient for OfflineBackend {
    async fn send_message(
        &self,
        _session_id: &SessionId,
        _request: PromptRequest,
    ) -> Result<(), BackendError> {
        Err(offline("send"))
    }

    async fn summarize_session(
        &self,
        _session_id: &SessionId,
        _model: &ModelSelection,
    ) -> Result<(), BackendError> {
        Err(offline("summarize"))
    }

    async fn init_session(
        &self,
        _session_id: &SessionId,
        _model: &ModelSelection,
    ) -> Result<(), BackendError> {
        Err(offline("init"))
    }

    async fn abort_session(&self, session_id: &SessionId) -> Result<(), BackendError> {
        debug!(target: "rudder::offline", session_id = %session_id, "Ignoring remote abort");
        Ok(())
    }

    async fn revert_session(
        &self,
        _session_id: &SessionId,
        _message_id: &MessageId,
    ) -> Result<SessionInfo, BackendError> {
        Err(offline("revert"))
    }

    async fn unrevert_session(&self, _session_id: &SessionId) -> Result<SessionInfo, BackendError> {
        Err(offline("unrevert"))
    }

    async fn fork_session(
        &self,
        _session_id: &SessionId,
        _message_id: &MessageId,
    ) -> Result<SessionInfo, BackendError> {
        Err(offline("fork"))
    }

    async fn get_session_messages(
        &self,
        _session_id: &SessionId,
        _limit: Option<usize>,
    ) -> Result<Vec<Message>, BackendError> {
        Ok(Vec::new())
    }

    async fn reply_to_permission(
        &self,
        session_id: &SessionId,
        permission_id: &PermissionId,
        response: PermissionResponse,
    ) -> Result<(), BackendError> {
        debug!(
            target: "rudder::offline",
            session_id = %session_id,
            permission_id = %permission_id,
            response = %response,
            "Dropping permission reply"
        );
        Ok(())
    }

    async fn reply_to_question(
        &self,
        _session_id: &SessionId,
        _question_id: &QuestionId,
        _answers: Vec<Vec<String>>,
    ) -> Result<(), BackendError> {
        Err(offline("question reply"))
    }

    async fn reject_question(
        &self,
        _session_id: &SessionId,
        _question_id: &QuestionId,
    ) -> Result<(), BackendError> {
        Err(offline("question reject"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refuses_sends_but_accepts_aborts() {
        let backend = OfflineBackend;
        let session_id = SessionId::from("s1");
        let request = PromptRequest {
            text: "hi".to_string(),
            model: ModelSelection::new("p", "m"),
            agent: None,
            variant: None,
            attachments: Vec::new(),
        };

        let error = backend.send_message(&session_id, request).await.unwrap_err();
        assert!(!error.is_soft());
        assert!(backend.abort_session(&session_id).await.is_ok());
        assert!(
            backend
                .get_session_messages(&session_id, Some(10))
                .await
                .unwrap()
                .is_empty()
        );
    }
}

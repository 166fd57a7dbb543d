//! Owner of the single active session.
//!
//! Switching sessions shuts the previous actor down (timers, outstanding send and
//! lifecycle entries go with it) before the next actor starts.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::session_actor::{ForkOutcome, SessionError, SessionHandle, spawn_session_actor};
use crate::backend::BackendClient;
use crate::config::EngineConfig;
use crate::session::event::BackendEvent;
use crate::session::types::{MessageId, SessionId, SessionInfo};

/// The actor currently bound to the UI.
struct ActiveSession {
    handle: SessionHandle,
    task: JoinHandle<()>,
}

pub struct SessionManager {
    backend: Arc<dyn BackendClient>,
    config: Arc<EngineConfig>,
    active: Option<ActiveSession>,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn BackendClient>, config: Arc<EngineConfig>) -> Self {
        Self {
            backend,
            config,
            active: None,
        }
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    /// Handle of the active session, if any.
    pub fn active(&self) -> Option<&SessionHandle> {
        self.active.as_ref().map(|active| &active.handle)
    }

    pub fn active_session_id(&self) -> Option<&SessionId> {
        self.active().map(SessionHandle::session_id)
    }

    /// Makes `session` the active session, tearing down the previous one first.
    pub async fn activate(&mut self, session: SessionInfo) -> SessionHandle {
        if self.active_session_id() == Some(&session.id)
            && let Some(handle) = self.active()
        {
            return handle.clone();
        }

        self.deactivate().await;
        info!(
            target: "session.manager",
            session_id = %session.id,
            "Activating session"
        );
        let (handle, task) =
            spawn_session_actor(session, self.config.clone(), self.backend.clone());
        self.active = Some(ActiveSession {
            handle: handle.clone(),
            task,
        });
        handle
    }

    /// Stops the active session and waits for its actor to exit.
    pub async fn deactivate(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let session_id = active.handle.session_id().clone();
        if let Err(e) = active.handle.shutdown().await {
            debug!(
                target: "session.manager",
                session_id = %session_id,
                error = %e,
                "Session actor already gone"
            );
        }
        if let Err(e) = active.task.await {
            warn!(
                target: "session.manager",
                session_id = %session_id,
                error = %e,
                "Session actor task failed"
            );
        }
    }

    /// Forwards a backend event to the active session. Events for any other
    /// session are dropped.
    pub async fn route_event(&self, event: BackendEvent) -> Result<bool, SessionError> {
        let Some(handle) = self.active() else {
            return Ok(false);
        };
        if event.session_id() != handle.session_id() {
            debug!(
                target: "session.manager",
                event = event.kind(),
                event_session = %event.session_id(),
                active_session = %handle.session_id(),
                "Dropping event for inactive session"
            );
            return Ok(false);
        }
        handle.dispatch_event(event).await?;
        Ok(true)
    }

    /// Forks the active session at `message_id`, switches to the fork, seeds its
    /// draft with the source text and loads its history.
    pub async fn fork(
        &mut self,
        message_id: MessageId,
    ) -> Result<(SessionHandle, ForkOutcome), SessionError> {
        let handle = self.active().cloned().ok_or(SessionError::NotActive)?;
        let outcome = handle.fork(message_id).await?;

        let forked = self.activate(outcome.session.clone()).await;
        if outcome.draft.is_some() {
            forked
                .set_pending_input(outcome.draft.clone(), Vec::new())
                .await?;
        }
        if let Err(e) = forked.load_messages().await {
            warn!(
                target: "session.manager",
                session_id = %forked.session_id(),
                error = %e,
                "Loading forked history failed"
            );
        }
        Ok((forked, outcome))
    }
}

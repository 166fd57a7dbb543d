use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{Attachment, BackendClient, BackendError, ModelSelection, PromptRequest};
use crate::config::EngineConfig;
use crate::session::action::{Action, Moment};
use crate::session::command::{Dispatch, route};
use crate::session::effect::{Effect, SessionNotice};
use crate::session::event::BackendEvent;
use crate::session::handlers::{
    LoadOutcome, SendSettlement, abort_local, apply_fetch, apply_revert, begin_send, fork_draft,
    next_page_limit, revert_draft, settle_send,
};
use crate::session::message::{Message, PendingUserMessageMeta};
use crate::session::permission::{EditMode, PermissionResponse};
use crate::session::reduce::reduce;
use crate::session::state::{PendingInput, SessionSnapshot, SessionState};
use crate::session::types::{MessageId, PermissionId, QuestionId, SessionId, SessionInfo};

use super::timers::{TimerFiring, TimerSet};

const COMMAND_CHANNEL_CAPACITY: usize = 256;
const COMPLETION_CHANNEL_CAPACITY: usize = 64;
const NOTICE_BROADCAST_CAPACITY: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    pub text: String,
    pub model: ModelSelection,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub variant: Option<String>,
}

impl SendRequest {
    pub fn new(text: impl Into<String>, model: ModelSelection) -> Self {
        Self {
            text: text.into(),
            model,
            agent: None,
            attachments: Vec::new(),
            variant: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortOutcome {
    pub aborted: Vec<MessageId>,
    /// Failure of the best-effort remote notification, if any.
    pub remote_error: Option<BackendError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertOutcome {
    pub removed: Vec<MessageId>,
    pub draft: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkOutcome {
    pub session: SessionInfo,
    pub draft: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Nothing to send")]
    EmptyMessage,

    #[error("Unknown message: {0}")]
    UnknownMessage(MessageId),

    #[error("Unknown permission request: {0}")]
    UnknownPermission(PermissionId),

    #[error("Unknown question: {0}")]
    UnknownQuestion(QuestionId),

    #[error("Send cancelled")]
    Cancelled,

    #[error("No active session")]
    NotActive,

    #[error("Channel closed")]
    ChannelClosed,
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

pub(crate) enum SessionCmd {
    Event(Box<BackendEvent>),
    Send {
        request: SendRequest,
        reply: Reply<()>,
    },
    Abort {
        reply: oneshot::Sender<AbortOutcome>,
    },
    Revert {
        message_id: MessageId,
        reply: Reply<RevertOutcome>,
    },
    Unrevert {
        reply: Reply<LoadOutcome>,
    },
    Fork {
        message_id: MessageId,
        reply: Reply<ForkOutcome>,
    },
    LoadMessages {
        reply: Reply<LoadOutcome>,
    },
    LoadMoreMessages {
        reply: Reply<LoadOutcome>,
    },
    ReplyPermission {
        permission_id: PermissionId,
        response: PermissionResponse,
        reply: Reply<()>,
    },
    ReplyQuestion {
        question_id: QuestionId,
        answers: Vec<Vec<String>>,
        reply: Reply<()>,
    },
    RejectQuestion {
        question_id: QuestionId,
        reply: Reply<()>,
    },
    SelectAgent {
        agent: Option<String>,
        reply: oneshot::Sender<()>,
    },
    SetEditModeOverride {
        mode: Option<EditMode>,
        reply: oneshot::Sender<EditMode>,
    },
    SetPendingInput {
        input: PendingInput,
        reply: oneshot::Sender<()>,
    },
    TakePendingInput {
        reply: oneshot::Sender<PendingInput>,
    },
    FlushUserParts {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Subscribe {
        reply: oneshot::Sender<broadcast::Receiver<SessionNotice>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Results of remote calls, fed back into the actor's mailbox.
enum Completion {
    Send {
        seq: u64,
        settlement: SendSettlement,
        reply: Reply<()>,
    },
    Abort {
        aborted: Vec<MessageId>,
        result: Result<(), BackendError>,
        reply: Option<oneshot::Sender<AbortOutcome>>,
    },
    Revert {
        requested: MessageId,
        draft: Option<String>,
        result: Result<SessionInfo, BackendError>,
        reply: Reply<RevertOutcome>,
    },
    Unrevert {
        limit: usize,
        result: Result<(SessionInfo, Vec<Message>), BackendError>,
        reply: Reply<LoadOutcome>,
    },
    Fork {
        draft: Option<String>,
        result: Result<SessionInfo, BackendError>,
        reply: Reply<ForkOutcome>,
    },
    Fetch {
        limit: usize,
        result: Result<Vec<Message>, BackendError>,
        reply: Reply<LoadOutcome>,
    },
    Remote {
        command: &'static str,
        result: Result<(), BackendError>,
        reply: Option<Reply<()>>,
    },
}

/// Cloneable handle to a running session actor.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    cmd_tx: mpsc::Sender<SessionCmd>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCmd,
    ) -> Result<T, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    /// Queues a backend event without waiting for it to be applied.
    pub async fn dispatch_event(&self, event: BackendEvent) -> Result<(), SessionError> {
        self.cmd_tx
            .send(SessionCmd::Event(Box::new(event)))
            .await
            .map_err(|_| SessionError::ChannelClosed)
    }

    /// Returns once the backend acknowledged the dispatch, not when the reply ends.
    pub async fn send(&self, request: SendRequest) -> Result<(), SessionError> {
        self.request(|reply| SessionCmd::Send { request, reply })
            .await?
    }

    pub async fn abort(&self) -> Result<AbortOutcome, SessionError> {
        self.request(|reply| SessionCmd::Abort { reply }).await
    }

    pub async fn revert(&self, message_id: MessageId) -> Result<RevertOutcome, SessionError> {
        self.request(|reply| SessionCmd::Revert { message_id, reply })
            .await?
    }

    pub async fn unrevert(&self) -> Result<LoadOutcome, SessionError> {
        self.request(|reply| SessionCmd::Unrevert { reply }).await?
    }

    pub async fn fork(&self, message_id: MessageId) -> Result<ForkOutcome, SessionError> {
        self.request(|reply| SessionCmd::Fork { message_id, reply })
            .await?
    }

    pub async fn load_messages(&self) -> Result<LoadOutcome, SessionError> {
        self.request(|reply| SessionCmd::LoadMessages { reply })
            .await?
    }

    pub async fn load_more_messages(&self) -> Result<LoadOutcome, SessionError> {
        self.request(|reply| SessionCmd::LoadMoreMessages { reply })
            .await?
    }

    pub async fn reply_to_permission(
        &self,
        permission_id: PermissionId,
        response: PermissionResponse,
    ) -> Result<(), SessionError> {
        self.request(|reply| SessionCmd::ReplyPermission {
            permission_id,
            response,
            reply,
        })
        .await?
    }

    pub async fn reply_to_question(
        &self,
        question_id: QuestionId,
        answers: Vec<Vec<String>>,
    ) -> Result<(), SessionError> {
        self.request(|reply| SessionCmd::ReplyQuestion {
            question_id,
            answers,
            reply,
        })
        .await?
    }

    pub async fn reject_question(&self, question_id: QuestionId) -> Result<(), SessionError> {
        self.request(|reply| SessionCmd::RejectQuestion { question_id, reply })
            .await?
    }

    pub async fn select_agent(&self, agent: Option<String>) -> Result<(), SessionError> {
        self.request(|reply| SessionCmd::SelectAgent { agent, reply })
            .await
    }

    /// Sets the per-session edit mode override and returns the resulting effective mode.
    pub async fn set_edit_mode_override(
        &self,
        mode: Option<EditMode>,
    ) -> Result<EditMode, SessionError> {
        self.request(|reply| SessionCmd::SetEditModeOverride { mode, reply })
            .await
    }

    pub async fn set_pending_input(
        &self,
        text: Option<String>,
        attachments: Vec<Attachment>,
    ) -> Result<(), SessionError> {
        let input = PendingInput { text, attachments };
        self.request(|reply| SessionCmd::SetPendingInput { input, reply })
            .await
    }

    pub async fn take_pending_input(&self) -> Result<PendingInput, SessionError> {
        self.request(|reply| SessionCmd::TakePendingInput { reply })
            .await
    }

    /// Applies queued user parts now instead of at the end of the batch window.
    pub async fn flush_user_parts(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCmd::FlushUserParts { reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| SessionCmd::Snapshot { reply }).await
    }

    pub async fn subscribe(&self) -> Result<broadcast::Receiver<SessionNotice>, SessionError> {
        self.request(|reply| SessionCmd::Subscribe { reply }).await
    }

    /// Stops the actor. Every timer and the outstanding send are cancelled first.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCmd::Shutdown { reply }).await
    }
}

struct SessionActor {
    session_id: SessionId,
    state: SessionState,
    backend: Arc<dyn BackendClient>,
    timers: TimerSet,
    timer_rx: mpsc::UnboundedReceiver<TimerFiring>,
    send_token: CancellationToken,
    notices: broadcast::Sender<SessionNotice>,
    completion_tx: mpsc::Sender<Completion>,
    completion_rx: mpsc::Receiver<Completion>,
}

impl SessionActor {
    fn new(session: SessionInfo, config: Arc<EngineConfig>, backend: Arc<dyn BackendClient>) -> Self {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::channel(COMPLETION_CHANNEL_CAPACITY);
        let (notices, _) = broadcast::channel(NOTICE_BROADCAST_CAPACITY);

        Self {
            session_id: session.id.clone(),
            state: SessionState::new(session, config),
            backend,
            timers: TimerSet::new(timer_tx),
            timer_rx,
            send_token: CancellationToken::new(),
            notices,
            completion_tx,
            completion_rx,
        }
    }

    async fn run(mut self, mut cmd_rx: mpsc::Receiver<SessionCmd>) {
        tracing::debug!(
            target: "session.actor",
            session_id = %self.session_id,
            "Session actor started"
        );

        let shutdown_reply = loop {
            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => match cmd {
                    Some(SessionCmd::Shutdown { reply }) => break Some(reply),
                    Some(cmd) => self.handle_cmd(cmd),
                    None => break None,
                },

                Some(completion) = self.completion_rx.recv() => {
                    self.handle_completion(completion);
                }

                Some(firing) = self.timer_rx.recv() => {
                    self.handle_timer(&firing);
                }
            }
        };

        self.teardown();
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    fn teardown(&mut self) {
        self.timers.cancel_all();
        self.send_token.cancel();
        self.state.lifecycle.clear();
        self.state.user_batch.clear();
        tracing::debug!(
            target: "session.actor",
            session_id = %self.session_id,
            "Session actor stopped"
        );
    }

    fn apply(&mut self, action: Action) {
        let effects = reduce(&mut self.state, action, Moment::now());
        self.run_effects(effects);
    }

    fn run_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::ScheduleTimer { kind, deadline } => self.timers.schedule(kind, deadline),
                Effect::CancelTimer { kind } => {
                    self.timers.cancel(&kind);
                }
                Effect::Notify(notice) => {
                    let _ = self.notices.send(notice);
                }
                Effect::ReplyPermission {
                    permission_id,
                    response,
                } => self.spawn_permission_reply(permission_id, response, None),
                Effect::CancelSend => self.send_token.cancel(),
            }
        }
    }

    fn notify_failure(&self, command: &str, error: &BackendError) {
        let _ = self.notices.send(SessionNotice::CommandFailed {
            command: command.to_string(),
            error: error.to_string(),
        });
    }

    fn handle_timer(&mut self, firing: &TimerFiring) {
        if self.timers.claim(firing) {
            self.apply(Action::TimerFired(firing.kind.clone()));
        }
    }

    fn handle_cmd(&mut self, cmd: SessionCmd) {
        match cmd {
            SessionCmd::Event(event) => self.apply(Action::Backend(*event)),
            SessionCmd::Send { request, reply } => self.handle_send(request, reply),
            SessionCmd::Abort { reply } => self.handle_abort(Some(reply)),
            SessionCmd::Revert { message_id, reply } => self.handle_revert(message_id, reply),
            SessionCmd::Unrevert { reply } => self.handle_unrevert(reply),
            SessionCmd::Fork { message_id, reply } => self.handle_fork(message_id, reply),
            SessionCmd::LoadMessages { reply } => {
                let limit = self.state.config.history.initial_limit;
                self.spawn_fetch(limit, reply);
            }
            SessionCmd::LoadMoreMessages { reply } => {
                let limit = next_page_limit(&self.state);
                self.spawn_fetch(limit, reply);
            }
            SessionCmd::ReplyPermission {
                permission_id,
                response,
                reply,
            } => self.handle_permission_reply(permission_id, response, reply),
            SessionCmd::ReplyQuestion {
                question_id,
                answers,
                reply,
            } => self.handle_question(question_id, Some(answers), reply),
            SessionCmd::RejectQuestion { question_id, reply } => {
                self.handle_question(question_id, None, reply);
            }
            SessionCmd::SelectAgent { agent, reply } => {
                tracing::debug!(
                    target: "session.permission",
                    session_id = %self.session_id,
                    agent = ?agent,
                    "Agent selected"
                );
                self.state.selected_agent = agent;
                let _ = reply.send(());
            }
            SessionCmd::SetEditModeOverride { mode, reply } => {
                self.state.edit_mode_override = mode;
                let _ = reply.send(self.state.effective_edit_mode());
            }
            SessionCmd::SetPendingInput { input, reply } => {
                self.state.pending_input = input.text;
                self.state.pending_attachments = input.attachments;
                let _ = self.notices.send(SessionNotice::DraftRestored);
                let _ = reply.send(());
            }
            SessionCmd::TakePendingInput { reply } => {
                let _ = reply.send(self.state.take_pending_input());
            }
            SessionCmd::FlushUserParts { reply } => {
                self.apply(Action::FlushUserParts);
                let _ = reply.send(());
            }
            SessionCmd::Snapshot { reply } => {
                let _ = reply.send(self.state.snapshot());
            }
            SessionCmd::Subscribe { reply } => {
                let _ = reply.send(self.notices.subscribe());
            }
            SessionCmd::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn handle_send(&mut self, request: SendRequest, reply: Reply<()>) {
        if request.text.trim().is_empty() && request.attachments.is_empty() {
            let _ = reply.send(Err(SessionError::EmptyMessage));
            return;
        }

        let SendRequest {
            text,
            model,
            agent,
            attachments,
            variant,
        } = request;
        let agent = agent.or_else(|| self.state.selected_agent.clone());
        let meta = PendingUserMessageMeta {
            agent_mode: agent.clone(),
            provider_id: Some(model.provider_id.clone()),
            model_id: Some(model.model_id.clone()),
            variant: variant.clone(),
        };

        let dispatch = route(&text, &self.state.config.commands);
        let (seq, effects) = begin_send(
            &mut self.state,
            text,
            attachments.clone(),
            meta,
            Moment::now(),
        );
        // Cancels the previous send's token before a new one is issued.
        self.run_effects(effects);
        self.send_token = CancellationToken::new();
        let token = self.send_token.clone();

        tracing::info!(
            target: "session.command",
            session_id = %self.session_id,
            seq,
            dispatch = ?dispatch_kind(&dispatch),
            "Dispatching send"
        );

        let backend = self.backend.clone();
        let session_id = self.session_id.clone();
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let call = async move {
                match dispatch {
                    Dispatch::Prompt(text) => {
                        backend
                            .send_message(
                                &session_id,
                                PromptRequest {
                                    text,
                                    model,
                                    agent,
                                    variant,
                                    attachments,
                                },
                            )
                            .await
                    }
                    Dispatch::Summarize => backend.summarize_session(&session_id, &model).await,
                    Dispatch::Init => backend.init_session(&session_id, &model).await,
                }
            };
            let settlement = tokio::select! {
                () = token.cancelled() => SendSettlement::Cancelled,
                result = call => match result {
                    Ok(()) => SendSettlement::Acknowledged,
                    Err(error) => SendSettlement::Failed(error),
                },
            };
            let _ = completion_tx
                .send(Completion::Send {
                    seq,
                    settlement,
                    reply,
                })
                .await;
        });
    }

    fn handle_abort(&mut self, reply: Option<oneshot::Sender<AbortOutcome>>) {
        let (aborted, effects) = abort_local(&mut self.state, Moment::now());
        self.run_effects(effects);

        let backend = self.backend.clone();
        let session_id = self.session_id.clone();
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = backend.abort_session(&session_id).await;
            let _ = completion_tx
                .send(Completion::Abort {
                    aborted,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn handle_revert(&mut self, message_id: MessageId, reply: Reply<RevertOutcome>) {
        let Some(draft) = revert_draft(&self.state, &message_id) else {
            let _ = reply.send(Err(SessionError::UnknownMessage(message_id)));
            return;
        };

        let backend = self.backend.clone();
        let session_id = self.session_id.clone();
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = backend.revert_session(&session_id, &message_id).await;
            let _ = completion_tx
                .send(Completion::Revert {
                    requested: message_id,
                    draft,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn handle_unrevert(&mut self, reply: Reply<LoadOutcome>) {
        let limit = self
            .state
            .loaded_limit
            .max(self.state.config.history.initial_limit);
        let backend = self.backend.clone();
        let session_id = self.session_id.clone();
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = async {
                let session = backend.unrevert_session(&session_id).await?;
                let messages = backend
                    .get_session_messages(&session_id, Some(limit))
                    .await?;
                Ok::<_, BackendError>((session, messages))
            }
            .await;
            let _ = completion_tx
                .send(Completion::Unrevert {
                    limit,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn handle_fork(&mut self, message_id: MessageId, reply: Reply<ForkOutcome>) {
        let Some(draft) = fork_draft(&self.state, &message_id) else {
            let _ = reply.send(Err(SessionError::UnknownMessage(message_id)));
            return;
        };

        let backend = self.backend.clone();
        let session_id = self.session_id.clone();
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = backend.fork_session(&session_id, &message_id).await;
            let _ = completion_tx
                .send(Completion::Fork {
                    draft,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn spawn_fetch(&mut self, limit: usize, reply: Reply<LoadOutcome>) {
        let backend = self.backend.clone();
        let session_id = self.session_id.clone();
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = backend.get_session_messages(&session_id, Some(limit)).await;
            let _ = completion_tx
                .send(Completion::Fetch {
                    limit,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn handle_permission_reply(
        &mut self,
        permission_id: PermissionId,
        response: PermissionResponse,
        reply: Reply<()>,
    ) {
        if self.state.gate.take_permission(&permission_id).is_none() {
            let _ = reply.send(Err(SessionError::UnknownPermission(permission_id)));
            return;
        }
        let _ = self
            .notices
            .send(SessionNotice::PermissionResolved(permission_id.clone()));

        if response == PermissionResponse::Reject {
            tracing::info!(
                target: "session.permission",
                session_id = %self.session_id,
                permission_id = %permission_id,
                "Permission rejected, aborting"
            );
            self.handle_abort(None);
        }
        self.spawn_permission_reply(permission_id, response, Some(reply));
    }

    fn spawn_permission_reply(
        &self,
        permission_id: PermissionId,
        response: PermissionResponse,
        reply: Option<Reply<()>>,
    ) {
        let backend = self.backend.clone();
        let session_id = self.session_id.clone();
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = backend
                .reply_to_permission(&session_id, &permission_id, response)
                .await;
            let _ = completion_tx
                .send(Completion::Remote {
                    command: "permission-reply",
                    result,
                    reply,
                })
                .await;
        });
    }

    /// Answers (`Some`) or rejects (`None`) a queued question.
    fn handle_question(
        &mut self,
        question_id: QuestionId,
        answers: Option<Vec<Vec<String>>>,
        reply: Reply<()>,
    ) {
        if self.state.gate.take_question(&question_id).is_none() {
            let _ = reply.send(Err(SessionError::UnknownQuestion(question_id)));
            return;
        }
        let _ = self
            .notices
            .send(SessionNotice::QuestionResolved(question_id.clone()));

        let backend = self.backend.clone();
        let session_id = self.session_id.clone();
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let (command, result) = match answers {
                Some(answers) => (
                    "question-reply",
                    backend
                        .reply_to_question(&session_id, &question_id, answers)
                        .await,
                ),
                None => (
                    "question-reject",
                    backend.reject_question(&session_id, &question_id).await,
                ),
            };
            let _ = completion_tx
                .send(Completion::Remote {
                    command,
                    result,
                    reply: Some(reply),
                })
                .await;
        });
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Send {
                seq,
                settlement,
                reply,
            } => {
                let effects = settle_send(&mut self.state, seq, &settlement, Moment::now());
                self.run_effects(effects);
                let result = match settlement {
                    SendSettlement::Acknowledged => Ok(()),
                    SendSettlement::Failed(error) if error.is_soft() => Ok(()),
                    SendSettlement::Failed(error) => Err(SessionError::Backend(error)),
                    SendSettlement::Cancelled => Err(SessionError::Cancelled),
                };
                let _ = reply.send(result);
            }

            Completion::Abort {
                aborted,
                result,
                reply,
            } => {
                let remote_error = result.err();
                if let Some(error) = &remote_error {
                    tracing::warn!(
                        target: "session.command",
                        session_id = %self.session_id,
                        error = %error,
                        "Remote abort failed; local abort stands"
                    );
                    self.notify_failure("abort", error);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(AbortOutcome {
                        aborted,
                        remote_error,
                    });
                }
            }

            Completion::Revert {
                requested,
                draft,
                result,
                reply,
            } => match result {
                Ok(session) => {
                    let (removed, effects) = apply_revert(
                        &mut self.state,
                        &requested,
                        session,
                        draft.clone(),
                        Moment::now(),
                    );
                    self.run_effects(effects);
                    let _ = reply.send(Ok(RevertOutcome { removed, draft }));
                }
                Err(error) => {
                    tracing::warn!(
                        target: "session.command",
                        session_id = %self.session_id,
                        message_id = %requested,
                        error = %error,
                        "Revert failed"
                    );
                    self.notify_failure("revert", &error);
                    let _ = reply.send(Err(error.into()));
                }
            },

            Completion::Unrevert {
                limit,
                result,
                reply,
            } => match result {
                Ok((session, messages)) => {
                    self.state.session.revert_pointer = session.revert_pointer;
                    let (outcome, effects) =
                        apply_fetch(&mut self.state, messages, limit, Moment::now());
                    self.run_effects(effects);
                    let _ = self
                        .notices
                        .send(SessionNotice::SessionUpdated(self.state.session.clone()));
                    let _ = reply.send(Ok(outcome));
                }
                Err(error) => {
                    tracing::warn!(
                        target: "session.command",
                        session_id = %self.session_id,
                        error = %error,
                        "Unrevert failed"
                    );
                    self.notify_failure("unrevert", &error);
                    let _ = reply.send(Err(error.into()));
                }
            },

            Completion::Fork {
                draft,
                result,
                reply,
            } => match result {
                Ok(session) => {
                    tracing::info!(
                        target: "session.command",
                        session_id = %self.session_id,
                        fork_id = %session.id,
                        "Forked session"
                    );
                    let _ = reply.send(Ok(ForkOutcome { session, draft }));
                }
                Err(error) => {
                    tracing::warn!(
                        target: "session.command",
                        session_id = %self.session_id,
                        error = %error,
                        "Fork failed"
                    );
                    self.notify_failure("fork", &error);
                    let _ = reply.send(Err(error.into()));
                }
            },

            Completion::Fetch {
                limit,
                result,
                reply,
            } => match result {
                Ok(messages) => {
                    let (outcome, effects) =
                        apply_fetch(&mut self.state, messages, limit, Moment::now());
                    self.run_effects(effects);
                    let _ = reply.send(Ok(outcome));
                }
                Err(error) => {
                    tracing::warn!(
                        target: "session.stream",
                        session_id = %self.session_id,
                        limit,
                        error = %error,
                        "Fetching messages failed"
                    );
                    let _ = reply.send(Err(error.into()));
                }
            },

            Completion::Remote {
                command,
                result,
                reply,
            } => {
                let result = result.map_err(|error| {
                    tracing::warn!(
                        target: "session.permission",
                        session_id = %self.session_id,
                        command,
                        error = %error,
                        "Remote reply failed"
                    );
                    self.notify_failure(command, &error);
                    SessionError::Backend(error)
                });
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
        }
    }
}

fn dispatch_kind(dispatch: &Dispatch) -> &'static str {
    match dispatch {
        Dispatch::Prompt(_) => "prompt",
        Dispatch::Summarize => "summarize",
        Dispatch::Init => "init",
    }
}

/// Spawns the actor for `session` and returns its handle and task.
pub fn spawn_session_actor(
    session: SessionInfo,
    config: Arc<EngineConfig>,
    backend: Arc<dyn BackendClient>,
) -> (SessionHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let handle = SessionHandle {
        session_id: session.id.clone(),
        cmd_tx,
    };
    let actor = SessionActor::new(session, config, backend);
    let task = tokio::spawn(actor.run(cmd_rx));
    (handle, task)
}

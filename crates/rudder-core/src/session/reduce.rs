//! Reducer for backend events and timer firings.
//!
//! The reducer never fails and never performs I/O: it mutates [`SessionState`] and
//! returns the effects the owning actor must carry out.

use tracing::{debug, info, trace, warn};

use super::action::{Action, Moment};
use super::activity::{ActivityPhase, ActivityTransition, CooldownTimer};
use super::effect::{Effect, SessionNotice, TimerKind};
use super::event::BackendEvent;
use super::lifecycle::{CompletionCause, Touch};
use super::merge::{merge_duplicate_message, merge_part, truncate_at};
use super::message::{FinishReason, Message, MessageInfo, UserInfo};
use super::part::Part;
use super::permission::{GateDecision, PermissionRequest, QuestionDecision, QuestionRequest};
use super::state::{BatchPush, QueuedUserPart, SessionState};
use super::types::{MessageId, PartId, Role, SessionInfo};

pub fn reduce(state: &mut SessionState, action: Action, at: Moment) -> Vec<Effect> {
    let observed = Observed::capture(state);
    let mut effects = Vec::new();

    match action {
        Action::Backend(event) => handle_backend_event(state, event, at, &mut effects),
        Action::TimerFired(kind) => handle_timer(state, kind, at, &mut effects),
        Action::FlushUserParts => flush_user_parts(state, at, &mut effects),
    }

    observed.publish(state, &mut effects);
    effects
}

/// Streaming flags before a state change, diffed afterwards into notices.
pub(crate) struct Observed {
    streaming_message_id: Option<MessageId>,
    is_streaming: bool,
    activity: ActivityPhase,
}

impl Observed {
    pub(crate) fn capture(state: &SessionState) -> Self {
        Self {
            streaming_message_id: state.streaming_message_id.clone(),
            is_streaming: state.is_streaming,
            activity: state.activity.phase(),
        }
    }

    pub(crate) fn publish(self, state: &SessionState, effects: &mut Vec<Effect>) {
        if self.streaming_message_id != state.streaming_message_id
            || self.is_streaming != state.is_streaming
        {
            effects.push(Effect::Notify(SessionNotice::StreamingChanged {
                streaming_message_id: state.streaming_message_id.clone(),
                is_streaming: state.is_streaming,
            }));
        }
        let phase = state.activity.phase();
        if self.activity != phase {
            debug!(
                target: "session.lifecycle",
                session_id = %state.session.id,
                from = %self.activity,
                to = %phase,
                "Activity phase changed"
            );
            effects.push(Effect::Notify(SessionNotice::ActivityChanged(phase)));
        }
    }
}

fn handle_backend_event(
    state: &mut SessionState,
    event: BackendEvent,
    at: Moment,
    effects: &mut Vec<Effect>,
) {
    if event.session_id() != &state.session.id {
        debug!(
            target: "session.stream",
            session_id = %state.session.id,
            event_session_id = %event.session_id(),
            kind = event.kind(),
            "Dropping event for inactive session"
        );
        return;
    }

    match event {
        BackendEvent::PartUpdated {
            message_id,
            role,
            part,
            ..
        } => ingest_part(state, message_id, role, part, at, effects),
        BackendEvent::PartRemoved {
            message_id,
            part_id,
            ..
        } => remove_part(state, &message_id, &part_id, effects),
        BackendEvent::MessageUpdated { message, .. } => upsert_message(state, message, at, effects),
        BackendEvent::MessageRemoved { message_id, .. } => {
            remove_message(state, &message_id, at, effects);
        }
        BackendEvent::SessionUpdated { session } => update_session(state, session, at, effects),
        BackendEvent::SessionIdle { .. } => handle_idle(state, at, effects),
        BackendEvent::PermissionAsked { request } => gate_permission(state, request, effects),
        BackendEvent::PermissionReplied { permission_id, .. } => {
            if state.gate.take_permission(&permission_id).is_some() {
                effects.push(Effect::Notify(SessionNotice::PermissionResolved(
                    permission_id,
                )));
            }
        }
        BackendEvent::QuestionAsked { request } => gate_question(state, request, effects),
        BackendEvent::QuestionReplied { question_id, .. }
        | BackendEvent::QuestionRejected { question_id, .. } => {
            if state.gate.take_question(&question_id).is_some() {
                effects.push(Effect::Notify(SessionNotice::QuestionResolved(question_id)));
            }
        }
    }
}

fn ingest_part(
    state: &mut SessionState,
    message_id: MessageId,
    role: Option<Role>,
    part: Part,
    at: Moment,
    effects: &mut Vec<Effect>,
) {
    let is_user = match state.messages.get(&message_id) {
        Some(existing) => existing.role() == Role::User,
        None => role == Some(Role::User) || state.user_batch.contains(&message_id),
    };

    if is_user {
        match state
            .user_batch
            .push(QueuedUserPart { message_id, part })
        {
            BatchPush::First => effects.push(Effect::ScheduleTimer {
                kind: TimerKind::UserBatchFlush,
                deadline: at.instant + state.config.stream.user_batch_window(),
            }),
            BatchPush::Queued => {}
            BatchPush::Full => {
                trace!(
                    target: "session.stream",
                    session_id = %state.session.id,
                    "User part batch full, flushing early"
                );
                flush_user_parts(state, at, effects);
            }
        }
        return;
    }

    // Queued user parts belong before anything the assistant creates next.
    if !state.user_batch.is_empty() {
        flush_user_parts(state, at, effects);
    }
    apply_assistant_part(state, message_id, part, at, effects);
}

/// Applies every queued user part in arrival order.
pub(crate) fn flush_user_parts(state: &mut SessionState, at: Moment, effects: &mut Vec<Effect>) {
    let queued = state.user_batch.drain();
    effects.push(Effect::CancelTimer {
        kind: TimerKind::UserBatchFlush,
    });
    if queued.is_empty() {
        return;
    }

    trace!(
        target: "session.stream",
        session_id = %state.session.id,
        count = queued.len(),
        "Flushing user parts"
    );
    let mut touched: Vec<MessageId> = Vec::new();
    for QueuedUserPart { message_id, part } in queued {
        let message = ensure_message(state, &message_id, Role::User, at);
        merge_part(message, part);
        if !touched.contains(&message_id) {
            touched.push(message_id);
        }
    }
    effects.extend(
        touched
            .into_iter()
            .map(|id| Effect::Notify(SessionNotice::MessageUpdated(id))),
    );
}

/// Returns the message for `id`, creating it for `role` if it is new.
///
/// A new user message takes the metadata staged by the last send.
fn ensure_message<'a>(
    state: &'a mut SessionState,
    id: &MessageId,
    role: Role,
    at: Moment,
) -> &'a mut Message {
    let pending_meta = &mut state.pending_user_meta;
    state
        .messages
        .entry(id.clone())
        .or_insert_with(|| match role {
            Role::User => {
                let info = pending_meta.take().map(UserInfo::from).unwrap_or_default();
                Message::user(id.clone(), at.timestamp, info)
            }
            Role::Assistant => Message::assistant(id.clone(), at.timestamp),
        })
}

fn apply_assistant_part(
    state: &mut SessionState,
    message_id: MessageId,
    part: Part,
    at: Moment,
    effects: &mut Vec<Effect>,
) {
    let zombie = state
        .lifecycle
        .zombie_expired(at.instant, state.config.stream.zombie_timeout());

    let message = ensure_message(state, &message_id, Role::Assistant, at);
    let merged = merge_part(message, part);
    trace!(
        target: "session.stream",
        message_id = %message_id,
        merge = ?merged,
        "Part applied"
    );
    effects.push(Effect::Notify(SessionNotice::MessageUpdated(
        message_id.clone(),
    )));

    match state.lifecycle.touch(&message_id, at.instant) {
        Touch::Terminal(phase) => {
            debug!(
                target: "session.lifecycle",
                session_id = %state.session.id,
                message_id = %message_id,
                phase = %phase,
                "Part merged into finished message without restarting its stream"
            );
            return;
        }
        Touch::Started => debug!(
            target: "session.lifecycle",
            session_id = %state.session.id,
            message_id = %message_id,
            "Stream started"
        ),
        Touch::Refreshed => {}
    }

    if let Some(message) = state.messages.get_mut(&message_id) {
        message.streaming = true;
    }
    state.streaming_message_id = Some(message_id.clone());
    state.is_streaming = true;
    effects.push(Effect::CancelTimer {
        kind: TimerKind::ReplyWatchdog,
    });
    let transition = state.activity.on_activity();
    apply_cooldown(state, transition, at, effects);
    effects.push(Effect::ScheduleTimer {
        kind: TimerKind::Inactivity(message_id.clone()),
        deadline: at.instant + state.config.stream.inactivity_timeout(),
    });

    if zombie {
        complete_streaming_message(state, &message_id, CompletionCause::Zombie, at, effects);
    }
}

pub(crate) fn apply_cooldown(
    state: &SessionState,
    transition: ActivityTransition,
    at: Moment,
    effects: &mut Vec<Effect>,
) {
    match transition.cooldown {
        CooldownTimer::Start => effects.push(Effect::ScheduleTimer {
            kind: TimerKind::Cooldown,
            deadline: at.instant + state.config.stream.cooldown(),
        }),
        CooldownTimer::Cancel => effects.push(Effect::CancelTimer {
            kind: TimerKind::Cooldown,
        }),
        CooldownTimer::Keep => {}
    }
}

/// Ends the stream for `message_id`: drops its lifecycle entry and timer, marks the
/// message final (defaulting the finish reason to `stop`) and settles the session
/// flags.
pub fn complete_streaming_message(
    state: &mut SessionState,
    message_id: &MessageId,
    cause: CompletionCause,
    at: Moment,
    effects: &mut Vec<Effect>,
) -> bool {
    let entry = state.lifecycle.complete(message_id, at.instant);
    effects.push(Effect::CancelTimer {
        kind: TimerKind::Inactivity(message_id.clone()),
    });

    if let Some(message) = state.messages.get_mut(message_id) {
        message.streaming = false;
        if let MessageInfo::Assistant(info) = &mut message.info
            && info.finish.is_none()
        {
            info.finish = Some(FinishReason::Stop);
        }
        effects.push(Effect::Notify(SessionNotice::MessageUpdated(
            message_id.clone(),
        )));
    }

    let streamed_ms = entry
        .as_ref()
        .and_then(|e| e.completed_at.map(|done| done.duration_since(e.started_at)))
        .map(|d| d.as_millis() as u64);
    match cause {
        CompletionCause::Natural => debug!(
            target: "session.lifecycle",
            session_id = %state.session.id,
            message_id = %message_id,
            streamed_ms = ?streamed_ms,
            "Stream completed"
        ),
        CompletionCause::Timeout | CompletionCause::Zombie => warn!(
            target: "session.lifecycle",
            session_id = %state.session.id,
            message_id = %message_id,
            cause = %cause,
            streamed_ms = ?streamed_ms,
            "Forcing stream completion"
        ),
    }

    settle_streams(state, at, effects);
    entry.is_some()
}

/// Recomputes the session flags after a stream ended or was dropped.
pub(crate) fn settle_streams(state: &mut SessionState, at: Moment, effects: &mut Vec<Effect>) {
    if let Some(latest) = state.lifecycle.latest() {
        state.streaming_message_id = Some(latest.clone());
        return;
    }
    state.streaming_message_id = None;
    if state.in_flight.is_some() {
        // A send still awaiting acknowledgement keeps the session busy.
        return;
    }
    state.lifecycle.clear_session_streaming();
    state.is_streaming = false;
    let transition = state.activity.on_drained();
    apply_cooldown(state, transition, at, effects);
}

fn handle_timer(state: &mut SessionState, kind: TimerKind, at: Moment, effects: &mut Vec<Effect>) {
    match kind {
        TimerKind::Inactivity(message_id) => {
            let window = state.config.stream.inactivity_timeout();
            if state.lifecycle.inactive_for(&message_id, at.instant, window) {
                complete_streaming_message(
                    state,
                    &message_id,
                    CompletionCause::Timeout,
                    at,
                    effects,
                );
            }
        }
        TimerKind::UserBatchFlush => flush_user_parts(state, at, effects),
        TimerKind::Cooldown => {
            state.activity.on_cooldown_elapsed();
        }
        TimerKind::ReplyWatchdog => {
            if state.is_streaming && state.lifecycle.is_empty() && state.in_flight.is_none() {
                warn!(
                    target: "session.lifecycle",
                    session_id = %state.session.id,
                    "No reply arrived after send, clearing busy state"
                );
                settle_streams(state, at, effects);
            }
        }
    }
}

fn upsert_message(
    state: &mut SessionState,
    incoming: Message,
    at: Moment,
    effects: &mut Vec<Effect>,
) {
    let id = incoming.id.clone();
    let finished = incoming.finish().is_some();

    // Queued user parts may be the ones that create this id.
    if !state.messages.contains_key(&id) && !state.user_batch.is_empty() {
        flush_user_parts(state, at, effects);
    }

    if let Some(existing) = state.messages.get_mut(&id) {
        let became_user = existing.role() == Role::Assistant && incoming.role() == Role::User;
        if incoming.parts.is_empty() {
            existing.info.merge(incoming.info);
            if existing.created_at == 0 {
                existing.created_at = incoming.created_at;
            }
        } else {
            let current = existing.clone();
            *existing = merge_duplicate_message(current, incoming);
        }

        if became_user {
            existing.streaming = false;
            debug!(
                target: "session.stream",
                session_id = %state.session.id,
                message_id = %id,
                "Message turned out to be a user message, dropping its stream"
            );
            if forget_streams(state, std::slice::from_ref(&id), effects) {
                settle_streams(state, at, effects);
            }
        } else {
            existing.streaming = state.lifecycle.is_streaming(&id);
        }
    } else {
        let mut message = incoming;
        if let MessageInfo::User(info) = &mut message.info
            && let Some(meta) = state.pending_user_meta.take()
        {
            let staged = UserInfo::from(meta);
            info.agent_mode = info.agent_mode.take().or(staged.agent_mode);
            info.provider_id = info.provider_id.take().or(staged.provider_id);
            info.model_id = info.model_id.take().or(staged.model_id);
            info.variant = info.variant.take().or(staged.variant);
        }
        message.streaming = state.lifecycle.is_streaming(&id);
        state.messages.insert(id.clone(), message);
    }
    effects.push(Effect::Notify(SessionNotice::MessageUpdated(id.clone())));

    if finished && state.lifecycle.is_streaming(&id) {
        complete_streaming_message(state, &id, CompletionCause::Natural, at, effects);
    }
}

fn remove_part(
    state: &mut SessionState,
    message_id: &MessageId,
    part_id: &PartId,
    effects: &mut Vec<Effect>,
) {
    let Some(message) = state.messages.get_mut(message_id) else {
        return;
    };
    let before = message.parts.len();
    message.parts.retain(|part| part.id.as_ref() != Some(part_id));
    if message.parts.len() != before {
        effects.push(Effect::Notify(SessionNotice::MessageUpdated(
            message_id.clone(),
        )));
    }
}

fn remove_message(
    state: &mut SessionState,
    message_id: &MessageId,
    at: Moment,
    effects: &mut Vec<Effect>,
) {
    state.user_batch.retain_messages(|id| id != message_id);
    let removed = state.messages.shift_remove(message_id).is_some();
    if forget_streams(state, std::slice::from_ref(message_id), effects) {
        settle_streams(state, at, effects);
    }
    if removed {
        effects.push(Effect::Notify(SessionNotice::MessageRemoved(
            message_id.clone(),
        )));
    }
}

/// Drops lifecycle entries, terminal marks and timers for `ids`. Returns true if
/// any of them was still streaming.
pub(crate) fn forget_streams(
    state: &mut SessionState,
    ids: &[MessageId],
    effects: &mut Vec<Effect>,
) -> bool {
    let mut was_streaming = false;
    for id in ids {
        if state.lifecycle.forget(id) {
            was_streaming = true;
            effects.push(Effect::CancelTimer {
                kind: TimerKind::Inactivity(id.clone()),
            });
        }
    }
    was_streaming
}

/// Truncates the list at `boundary`, releasing everything the removed messages owned.
pub(crate) fn truncate_local(
    state: &mut SessionState,
    boundary: &MessageId,
    at: Moment,
    effects: &mut Vec<Effect>,
) -> Vec<MessageId> {
    let removed = truncate_at(&mut state.messages, boundary);
    if removed.is_empty() {
        return removed;
    }
    state
        .user_batch
        .retain_messages(|id| !removed.contains(id));
    if forget_streams(state, &removed, effects) {
        settle_streams(state, at, effects);
    }
    debug!(
        target: "session.stream",
        session_id = %state.session.id,
        boundary = %boundary,
        removed = removed.len(),
        "Truncated history at revert pointer"
    );
    effects.push(Effect::Notify(SessionNotice::MessagesReset));
    removed
}

fn update_session(
    state: &mut SessionState,
    session: SessionInfo,
    at: Moment,
    effects: &mut Vec<Effect>,
) {
    state.session.title = session.title;
    if !session.directory.is_empty() {
        state.session.directory = session.directory;
    }
    state.session.revert_pointer = session.revert_pointer;
    if let Some(pointer) = state.session.revert_pointer.clone() {
        truncate_local(state, &pointer, at, effects);
    }
    effects.push(Effect::Notify(SessionNotice::SessionUpdated(
        state.session.clone(),
    )));
}

fn handle_idle(state: &mut SessionState, at: Moment, effects: &mut Vec<Effect>) {
    effects.push(Effect::CancelTimer {
        kind: TimerKind::ReplyWatchdog,
    });
    let active: Vec<MessageId> = state.lifecycle.active_ids().cloned().collect();
    for id in &active {
        complete_streaming_message(state, id, CompletionCause::Natural, at, effects);
    }
    if active.is_empty() && state.is_streaming && state.in_flight.is_none() {
        settle_streams(state, at, effects);
    }
}

fn gate_permission(state: &mut SessionState, request: PermissionRequest, effects: &mut Vec<Effect>) {
    let mode = state.effective_edit_mode();
    let permission_id = request.id.clone();
    let queued = request.clone();

    match state.gate.evaluate_permission(
        request,
        &state.session.id,
        mode,
        &state.config.permissions,
    ) {
        GateDecision::AutoApprove(response) => {
            info!(
                target: "session.permission",
                session_id = %state.session.id,
                permission_id = %permission_id,
                kind = %queued.kind,
                mode = %mode,
                "Auto-approving permission"
            );
            effects.push(Effect::ReplyPermission {
                permission_id: permission_id.clone(),
                response,
            });
            effects.push(Effect::Notify(SessionNotice::PermissionAutoApproved(
                permission_id,
            )));
        }
        GateDecision::Enqueued => {
            debug!(
                target: "session.permission",
                session_id = %state.session.id,
                permission_id = %permission_id,
                kind = %queued.kind,
                "Permission queued for decision"
            );
            effects.push(Effect::Notify(SessionNotice::PermissionQueued(queued)));
        }
        GateDecision::Duplicate | GateDecision::ForeignSession => {
            trace!(
                target: "session.permission",
                permission_id = %permission_id,
                "Ignoring repeated permission request"
            );
        }
    }
}

fn gate_question(state: &mut SessionState, request: QuestionRequest, effects: &mut Vec<Effect>) {
    let queued = request.clone();
    if state.gate.offer_question(request, &state.session.id) == QuestionDecision::Enqueued {
        effects.push(Effect::Notify(SessionNotice::QuestionQueued(queued)));
    }
}

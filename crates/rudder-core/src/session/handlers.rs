//! Local halves of the user commands.
//!
//! Each command commits its local state change here, synchronously, before or
//! after the actor awaits the backend. Remote failures never undo what these
//! functions committed, except for the documented rollback of a hard send failure.

use tracing::{debug, error, info, warn};

use super::action::Moment;
use super::effect::{Effect, SessionNotice, TimerKind};
use super::lifecycle::StreamPhase;
use super::merge::reconcile_fetched;
use super::message::{Message, MessageInfo, PendingUserMessageMeta};
use super::part::{PartBody, ToolStatus};
use super::reduce::{Observed, apply_cooldown, flush_user_parts, settle_streams, truncate_local};
use super::state::{InFlightSend, SessionState};
use super::types::{MessageId, Role, SessionInfo, Timestamp};
use crate::backend::{Attachment, BackendError, Severity};

#[derive(Debug, Clone, PartialEq)]
pub enum SendSettlement {
    Acknowledged,
    Failed(BackendError),
    Cancelled,
}

/// Stages the submission and marks the session busy. Returns the send sequence
/// number the later settlement must quote.
pub fn begin_send(
    state: &mut SessionState,
    text: String,
    attachments: Vec<Attachment>,
    meta: PendingUserMessageMeta,
    at: Moment,
) -> (u64, Vec<Effect>) {
    let observed = Observed::capture(state);
    let mut effects = vec![
        Effect::CancelSend,
        Effect::CancelTimer {
            kind: TimerKind::ReplyWatchdog,
        },
    ];

    state.send_seq += 1;
    let seq = state.send_seq;
    state.pending_user_meta = Some(meta);
    state.in_flight = Some(InFlightSend {
        seq,
        text,
        attachments,
    });
    state.is_streaming = true;
    state.lifecycle.mark_session_streaming(at.instant);
    let transition = state.activity.on_activity();
    apply_cooldown(state, transition, at, &mut effects);

    observed.publish(state, &mut effects);
    (seq, effects)
}

/// Applies the outcome of send `seq`. Settlements of superseded sends are ignored.
pub fn settle_send(
    state: &mut SessionState,
    seq: u64,
    settlement: &SendSettlement,
    at: Moment,
) -> Vec<Effect> {
    if state.in_flight.as_ref().map(|f| f.seq) != Some(seq) {
        return Vec::new();
    }
    let observed = Observed::capture(state);
    let mut effects = Vec::new();
    let Some(submission) = state.in_flight.take() else {
        return effects;
    };

    match settlement {
        SendSettlement::Acknowledged => arm_reply_watchdog(state, at, &mut effects),
        SendSettlement::Failed(err) if err.severity() == Severity::Soft => {
            warn!(
                target: "session.command",
                session_id = %state.session.id,
                error = %err,
                "Send failed softly; the reply may still arrive"
            );
            arm_reply_watchdog(state, at, &mut effects);
        }
        SendSettlement::Failed(err) => {
            error!(
                target: "session.command",
                session_id = %state.session.id,
                error = %err,
                "Send failed, restoring draft"
            );
            if !submission.text.is_empty() {
                state.pending_input = Some(submission.text);
            }
            state.pending_attachments = submission.attachments;
            state.pending_user_meta = None;
            release_busy(state, at, &mut effects);
            effects.push(Effect::Notify(SessionNotice::DraftRestored));
            effects.push(Effect::Notify(SessionNotice::CommandFailed {
                command: "send".to_string(),
                error: err.to_string(),
            }));
        }
        SendSettlement::Cancelled => {
            state.pending_user_meta = None;
            release_busy(state, at, &mut effects);
        }
    }

    observed.publish(state, &mut effects);
    effects
}

fn arm_reply_watchdog(state: &mut SessionState, at: Moment, effects: &mut Vec<Effect>) {
    if state.lifecycle.is_empty() && state.is_streaming {
        effects.push(Effect::ScheduleTimer {
            kind: TimerKind::ReplyWatchdog,
            deadline: at.instant + state.config.stream.inactivity_timeout(),
        });
    }
}

/// Drops the busy flag straight to idle when nothing is streaming.
fn release_busy(state: &mut SessionState, at: Moment, effects: &mut Vec<Effect>) {
    if !state.lifecycle.is_empty() {
        return;
    }
    state.is_streaming = false;
    state.streaming_message_id = None;
    state.lifecycle.clear_session_streaming();
    let transition = state.activity.force_idle();
    apply_cooldown(state, transition, at, effects);
}

/// Commits an abort locally and returns the ids that were aborted.
///
/// The targets are the tracked streaming id plus every live lifecycle entry. Only
/// when both are empty does a backward scan pick the latest assistant message with
/// an unfinished part, or failing that the latest assistant message.
pub fn abort_local(state: &mut SessionState, at: Moment) -> (Vec<MessageId>, Vec<Effect>) {
    let observed = Observed::capture(state);
    let mut effects = Vec::new();

    let mut targets: Vec<MessageId> = state.streaming_message_id.iter().cloned().collect();
    for id in state.lifecycle.active_ids() {
        if !targets.contains(id) {
            targets.push(id.clone());
        }
    }
    if targets.is_empty()
        && let Some(fallback) = fallback_abort_target(state)
    {
        debug!(
            target: "session.command",
            session_id = %state.session.id,
            message_id = %fallback,
            "No tracked stream, aborting latest assistant message"
        );
        targets.push(fallback);
    }

    for id in &targets {
        if state.lifecycle.phase(id) != Some(StreamPhase::Completed) {
            state.lifecycle.abort(id, at.instant);
        }
        effects.push(Effect::CancelTimer {
            kind: TimerKind::Inactivity(id.clone()),
        });
        if let Some(message) = state.messages.get_mut(id) {
            mark_aborted(message, at.timestamp);
            effects.push(Effect::Notify(SessionNotice::MessageUpdated(id.clone())));
        }
    }

    state.in_flight = None;
    state.streaming_message_id = None;
    state.is_streaming = false;
    state.lifecycle.clear_session_streaming();
    effects.push(Effect::CancelTimer {
        kind: TimerKind::ReplyWatchdog,
    });
    effects.push(Effect::CancelSend);
    let transition = state.activity.force_idle();
    apply_cooldown(state, transition, at, &mut effects);

    info!(
        target: "session.command",
        session_id = %state.session.id,
        aborted = targets.len(),
        "Abort committed locally"
    );
    observed.publish(state, &mut effects);
    (targets, effects)
}

fn fallback_abort_target(state: &SessionState) -> Option<MessageId> {
    let assistants = || state.messages.values().rev().filter(|m| m.is_assistant());
    assistants()
        .find(|m| m.parts.iter().any(|p| p.is_unfinished()))
        .or_else(|| assistants().next())
        .map(|m| m.id.clone())
}

/// Stamps the abort time and closes every open part of `message`.
pub fn mark_aborted(message: &mut Message, timestamp: Timestamp) {
    message.streaming = false;
    if let MessageInfo::Assistant(info) = &mut message.info {
        info.aborted_at.get_or_insert(timestamp);
    }
    for part in &mut message.parts {
        match &mut part.body {
            PartBody::Tool { state, .. } if state.status.is_open() => {
                state.status = ToolStatus::Aborted;
            }
            PartBody::Reasoning { ended_at, .. } if ended_at.is_none() => {
                *ended_at = Some(timestamp);
            }
            _ => {}
        }
    }
    if let Some(last) = message.parts.last_mut()
        && matches!(last.body, PartBody::StepStart)
    {
        last.body = PartBody::StepFinish {
            reason: None,
            aborted: true,
        };
    }
}

/// Text to re-stage as a draft when reverting to a user message.
pub fn revert_draft(state: &SessionState, message_id: &MessageId) -> Option<Option<String>> {
    let message = state.messages.get(message_id)?;
    Some(match message.role() {
        Role::User => non_empty(message.visible_text()),
        Role::Assistant => None,
    })
}

/// Textual content of the fork source, without synthetic parts.
pub fn fork_draft(state: &SessionState, message_id: &MessageId) -> Option<Option<String>> {
    state
        .messages
        .get(message_id)
        .map(|message| non_empty(message.visible_text()))
}

fn non_empty(text: String) -> Option<String> {
    if text.trim().is_empty() { None } else { Some(text) }
}

/// Applies a successful backend revert. Returns the removed ids.
pub fn apply_revert(
    state: &mut SessionState,
    requested: &MessageId,
    session: SessionInfo,
    draft: Option<String>,
    at: Moment,
) -> (Vec<MessageId>, Vec<Effect>) {
    let observed = Observed::capture(state);
    let mut effects = Vec::new();
    flush_user_parts(state, at, &mut effects);

    let boundary = session
        .revert_pointer
        .clone()
        .unwrap_or_else(|| requested.clone());
    if !session.title.is_empty() {
        state.session.title = session.title;
    }
    state.session.revert_pointer = Some(boundary.clone());
    let removed = truncate_local(state, &boundary, at, &mut effects);

    if let Some(draft) = draft {
        state.pending_input = Some(draft);
        effects.push(Effect::Notify(SessionNotice::DraftRestored));
    }
    effects.push(Effect::Notify(SessionNotice::SessionUpdated(
        state.session.clone(),
    )));
    info!(
        target: "session.command",
        session_id = %state.session.id,
        boundary = %boundary,
        removed = removed.len(),
        "Reverted session"
    );
    observed.publish(state, &mut effects);
    (removed, effects)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOutcome {
    pub fetched: usize,
    pub has_more: bool,
}

/// Reconciles a fetched page (fetched with `limit`) into the local list.
pub fn apply_fetch(
    state: &mut SessionState,
    fetched: Vec<Message>,
    limit: usize,
    at: Moment,
) -> (LoadOutcome, Vec<Effect>) {
    let observed = Observed::capture(state);
    let mut effects = Vec::new();
    let count = fetched.len();

    reconcile_fetched(&mut state.messages, fetched);
    if let Some(pointer) = state.session.revert_pointer.clone() {
        truncate_local(state, &pointer, at, &mut effects);
    }
    for (id, message) in &mut state.messages {
        message.streaming = state.lifecycle.is_streaming(id);
    }
    if state.lifecycle.is_empty() && state.streaming_message_id.is_some() {
        settle_streams(state, at, &mut effects);
    }

    state.loaded_limit = state.loaded_limit.max(limit);
    state.has_more = count >= limit;
    effects.push(Effect::Notify(SessionNotice::MessagesReset));
    debug!(
        target: "session.stream",
        session_id = %state.session.id,
        fetched = count,
        limit,
        "Reconciled fetched messages"
    );

    observed.publish(state, &mut effects);
    (
        LoadOutcome {
            fetched: count,
            has_more: state.has_more,
        },
        effects,
    )
}

/// Limit to request for the next older page.
pub fn next_page_limit(state: &SessionState) -> usize {
    let history = &state.config.history;
    if state.loaded_limit == 0 {
        history.initial_limit
    } else {
        state.loaded_limit + history.page_size
    }
}

//! Reconciliation rules for parts and messages.
//!
//! Everything in here is pure: it takes messages and returns messages. The
//! session state decides when to call it and owns the side effects.

use indexmap::IndexMap;
use std::collections::HashSet;

use super::message::{FinishReason, Message, MessageInfo};
use super::part::{Part, PartBody, PartKey};
use super::types::MessageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartMerge {
    /// A keyless text delta was appended to the trailing keyless text part.
    Concatenated,
    /// An existing part with the same stable key was patched.
    Patched,
    Appended,
}

/// Applies one part update to a message.
pub fn merge_part(message: &mut Message, part: Part) -> PartMerge {
    if let Some(key) = part.stable_key() {
        if let Some(existing) = message
            .parts
            .iter_mut()
            .find(|existing| existing.stable_key().as_ref() == Some(&key))
        {
            existing.patch(part);
            return PartMerge::Patched;
        }
    } else if part.is_keyless_text()
        && let Some(last) = message.parts.last_mut()
        && last.is_keyless_text()
        && let (PartBody::Text { text, .. }, PartBody::Text { text: delta, .. }) =
            (&mut last.body, &part.body)
    {
        text.push_str(delta);
        return PartMerge::Concatenated;
    }

    message.parts.push(part);
    PartMerge::Appended
}

/// Reconciles two representations of the same message id.
///
/// A side marked `stop` that is at least as long as the other keeps its parts and
/// folds in the other side's parts whose keys it lacks. Without such a side, the
/// longer side wins outright; on equal length the incoming side wins. Info fields
/// are merged with incoming precedence in every case.
///
/// Text length is only a proxy for completeness: a shorter final answer that
/// legitimately replaces a longer draft loses to the draft.
pub fn merge_duplicate_message(existing: Message, incoming: Message) -> Message {
    let existing_len = existing.text_len();
    let incoming_len = incoming.text_len();

    let Message {
        id,
        created_at: existing_created_at,
        mut info,
        parts: existing_parts,
        streaming: existing_streaming,
    } = existing;
    let Message {
        created_at: incoming_created_at,
        info: incoming_info,
        parts: incoming_parts,
        streaming: incoming_streaming,
        ..
    } = incoming;

    let existing_stops = finishes_with_stop(&info);
    let incoming_stops = finishes_with_stop(&incoming_info);

    let parts = if existing_stops && existing_len >= incoming_len {
        fold_missing_parts(existing_parts, incoming_parts)
    } else if incoming_stops && incoming_len >= existing_len {
        fold_missing_parts(incoming_parts, existing_parts)
    } else if existing_len > incoming_len {
        existing_parts
    } else {
        incoming_parts
    };

    info.merge(incoming_info);

    Message {
        id,
        created_at: if incoming_created_at == 0 {
            existing_created_at
        } else {
            incoming_created_at
        },
        info,
        parts,
        streaming: existing_streaming || incoming_streaming,
    }
}

/// Keeps `base` and appends every keyed part of `other` whose key `base` lacks.
fn fold_missing_parts(mut base: Vec<Part>, other: Vec<Part>) -> Vec<Part> {
    let present: HashSet<PartKey> = base.iter().filter_map(Part::stable_key).collect();
    base.extend(other.into_iter().filter(|part| {
        part.stable_key()
            .is_some_and(|key| !present.contains(&key))
    }));
    base
}

/// One entry per id at its first position, later occurrences merged into it.
pub fn dedupe_messages_by_id(messages: Vec<Message>) -> Vec<Message> {
    let mut by_id: IndexMap<MessageId, Message> = IndexMap::with_capacity(messages.len());
    for message in messages {
        match by_id.get_mut(&message.id) {
            Some(slot) => {
                let existing = std::mem::replace(slot, placeholder(&message.id));
                *slot = merge_duplicate_message(existing, message);
            }
            None => {
                by_id.insert(message.id.clone(), message);
            }
        }
    }
    by_id.into_values().collect()
}

fn placeholder(id: &MessageId) -> Message {
    Message::assistant(id.clone(), 0)
}

/// Folds a fetched page into the local list.
///
/// Known ids are merged in place. Unknown ids are inserted right after the
/// previously matched fetched message; before any match they go ahead of the first
/// local message created later than them.
pub fn reconcile_fetched(local: &mut IndexMap<MessageId, Message>, fetched: Vec<Message>) {
    let mut cursor: Option<usize> = None;
    for message in dedupe_messages_by_id(fetched) {
        if let Some(index) = local.get_index_of(&message.id) {
            if let Some((_, slot)) = local.get_index_mut(index) {
                let existing = std::mem::replace(slot, placeholder(&message.id));
                *slot = merge_duplicate_message(existing, message);
            }
            cursor = Some(index);
            continue;
        }

        let index = match cursor {
            Some(index) => index + 1,
            None => local
                .values()
                .position(|existing| existing.created_at > message.created_at)
                .unwrap_or(local.len()),
        };
        local.shift_insert(index, message.id.clone(), message);
        cursor = Some(index);
    }
}

/// Drops the boundary message and everything after it. Returns the removed ids.
pub fn truncate_at(local: &mut IndexMap<MessageId, Message>, boundary: &MessageId) -> Vec<MessageId> {
    let Some(index) = local.get_index_of(boundary) else {
        return Vec::new();
    };
    local.drain(index..).map(|(id, _)| id).collect()
}

fn finishes_with_stop(info: &MessageInfo) -> bool {
    match info {
        MessageInfo::Assistant(info) => info.finish.as_ref().is_some_and(FinishReason::is_stop),
        MessageInfo::User(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::message::UserInfo;
    use crate::session::part::{ToolState, ToolStatus};

    fn keyed_text(id: &str, text: &str) -> Part {
        Part::with_id(
            id,
            PartBody::Text {
                text: text.to_string(),
                synthetic: None,
            },
        )
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn keyless_text_deltas_concatenate() {
        let mut message = Message::assistant("m1", 0);
        assert_eq!(merge_part(&mut message, Part::text("Hi")), PartMerge::Appended);
        assert_eq!(
            merge_part(&mut message, Part::text(" there")),
            PartMerge::Concatenated
        );
        assert_eq!(message.parts.len(), 1);
        assert_eq!(message.visible_text(), "Hi there");
    }

    #[test]
    fn keyless_text_after_keyed_text_appends() {
        let mut message = Message::assistant("m1", 0);
        merge_part(&mut message, keyed_text("p1", "first"));
        assert_eq!(merge_part(&mut message, Part::text("second")), PartMerge::Appended);
        assert_eq!(message.parts.len(), 2);
    }

    #[test]
    fn keyed_update_patches_in_place() {
        let mut message = Message::assistant("m1", 0);
        merge_part(&mut message, keyed_text("p1", "dra"));
        merge_part(&mut message, Part::new(PartBody::StepStart));
        assert_eq!(
            merge_part(&mut message, keyed_text("p1", "draft")),
            PartMerge::Patched
        );
        assert_eq!(message.parts.len(), 2);
        assert_eq!(message.visible_text(), "draft");
    }

    #[test]
    fn tool_updates_without_id_match_on_call_id() {
        let mut message = Message::assistant("m1", 0);
        for status in [ToolStatus::Pending, ToolStatus::Running, ToolStatus::Done] {
            merge_part(
                &mut message,
                Part::new(PartBody::Tool {
                    call_id: "call_1".to_string(),
                    tool: "read".to_string(),
                    state: ToolState::with_status(status),
                }),
            );
        }
        assert_eq!(message.parts.len(), 1);
        assert!(!message.parts[0].is_unfinished());
    }

    #[test]
    fn finished_longer_existing_keeps_content_and_folds_new_keys() {
        let existing = Message::assistant("m1", 1)
            .with_parts(vec![keyed_text("p1", "complete answer")])
            .with_finish(FinishReason::Stop);
        let incoming = Message::assistant("m1", 1).with_parts(vec![
            keyed_text("p1", "compl"),
            Part::with_id("p9", PartBody::StepStart),
            Part::text("loose"),
        ]);

        let merged = merge_duplicate_message(existing, incoming);
        assert_eq!(merged.parts.len(), 2);
        assert_eq!(merged.visible_text(), "complete answer");
        assert_eq!(merged.parts[1].id.as_ref().map(|id| id.as_str()), Some("p9"));
        assert!(merged.is_finished_with_stop());
    }

    #[test]
    fn finished_incoming_recovers_truncated_existing() {
        let existing = Message::assistant("m2", 1).with_parts(vec![keyed_text("p1", "draft")]);
        let incoming = Message::assistant("m2", 1)
            .with_parts(vec![keyed_text("p1", "draft"), keyed_text("p2", " done")])
            .with_finish(FinishReason::Stop);

        let merged = merge_duplicate_message(existing, incoming);
        assert_eq!(merged.parts.len(), 2);
        assert_eq!(merged.visible_text(), "draft done");
        assert_eq!(merged.finish(), Some(&FinishReason::Stop));
    }

    #[test]
    fn unfinished_sides_pick_longer_without_folding() {
        let existing = Message::assistant("m1", 1).with_parts(vec![
            keyed_text("p1", "a much longer streamed body"),
        ]);
        let incoming = Message::assistant("m1", 1).with_parts(vec![
            keyed_text("p1", "short"),
            Part::with_id("p2", PartBody::StepStart),
        ]);
        let merged = merge_duplicate_message(existing, incoming);
        assert_eq!(merged.parts.len(), 1);
        assert_eq!(merged.visible_text(), "a much longer streamed body");
    }

    #[test]
    fn dedupe_keeps_first_position() {
        let list = vec![
            Message::user("u1", 1, UserInfo::default()),
            Message::assistant("a1", 2).with_parts(vec![keyed_text("p1", "one")]),
            Message::user("u2", 3, UserInfo::default()),
            Message::assistant("a1", 2).with_parts(vec![keyed_text("p1", "one two")]),
        ];
        let deduped = dedupe_messages_by_id(list);
        assert_eq!(ids(&deduped), vec!["u1", "a1", "u2"]);
        assert_eq!(deduped[1].visible_text(), "one two");
        assert_eq!(dedupe_messages_by_id(deduped.clone()), deduped);
    }

    #[test]
    fn reconcile_inserts_unknown_messages_after_their_fetched_predecessor() {
        let mut local: IndexMap<MessageId, Message> = IndexMap::new();
        for message in [
            Message::user("u1", 1, UserInfo::default()),
            Message::assistant("a2", 40),
        ] {
            local.insert(message.id.clone(), message);
        }

        reconcile_fetched(
            &mut local,
            vec![
                Message::user("u1", 1, UserInfo::default()),
                Message::assistant("a1", 2),
                Message::user("u2", 3, UserInfo::default()),
            ],
        );

        let order: Vec<&str> = local.keys().map(MessageId::as_str).collect();
        assert_eq!(order, vec!["u1", "a1", "u2", "a2"]);
    }

    #[test]
    fn reconcile_places_older_history_before_local_messages() {
        let mut local: IndexMap<MessageId, Message> = IndexMap::new();
        let recent = Message::assistant("a9", 90);
        local.insert(recent.id.clone(), recent);

        reconcile_fetched(
            &mut local,
            vec![Message::user("u1", 1, UserInfo::default()), Message::assistant("a1", 2)],
        );

        let order: Vec<&str> = local.keys().map(MessageId::as_str).collect();
        assert_eq!(order, vec!["u1", "a1", "a9"]);
    }

    #[test]
    fn truncate_removes_boundary_and_later_messages() {
        let mut local: IndexMap<MessageId, Message> = IndexMap::new();
        for message in [
            Message::user("u1", 1, UserInfo::default()),
            Message::assistant("a1", 2),
            Message::user("u2", 3, UserInfo::default()),
            Message::assistant("a2", 4),
        ] {
            local.insert(message.id.clone(), message);
        }

        let removed = truncate_at(&mut local, &MessageId::from("u2"));
        assert_eq!(removed, vec![MessageId::from("u2"), MessageId::from("a2")]);
        assert_eq!(local.len(), 2);
        assert!(truncate_at(&mut local, &MessageId::from("missing")).is_empty());
    }
}

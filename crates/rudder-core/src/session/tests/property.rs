#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;

    use proptest::prelude::*;

    use crate::config::EngineConfig;
    use crate::session::action::{Action, Moment};
    use crate::session::event::BackendEvent;
    use crate::session::merge::{dedupe_messages_by_id, merge_duplicate_message, merge_part};
    use crate::session::message::{FinishReason, Message};
    use crate::session::part::{Part, PartBody, PartKey};
    use crate::session::permission::EditMode;
    use crate::session::reduce::reduce;
    use crate::session::state::SessionState;
    use crate::session::types::SessionInfo;
    use crate::test_utils::permission_request;

    fn arb_text() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9 .,]{0,12}"
    }

    fn keyed_text(id: usize, text: String) -> Part {
        Part::with_id(format!("p{id}"), PartBody::Text {
            text,
            synthetic: None,
        })
    }

    fn arb_keyed_parts(max_key: usize) -> impl Strategy<Value = Vec<Part>> {
        prop::collection::vec((0..max_key, arb_text()), 0..8).prop_map(|entries| {
            entries
                .into_iter()
                .map(|(id, text)| keyed_text(id, text))
                .collect()
        })
    }

    fn arb_message() -> impl Strategy<Value = Message> {
        (
            prop_oneof![Just("m1"), Just("m2"), Just("m3")],
            arb_keyed_parts(4),
            any::<bool>(),
            0u64..100,
        )
            .prop_map(|(id, parts, stopped, created_at)| {
                let message = Message::assistant(id, created_at).with_parts(parts);
                if stopped {
                    message.with_finish(FinishReason::Stop)
                } else {
                    message
                }
            })
    }

    fn arb_permission_kind() -> impl Strategy<Value = &'static str> {
        prop_oneof![
            Just("edit"),
            Just("write"),
            Just("bash"),
            Just("webfetch"),
            Just("external_directory"),
        ]
    }

    proptest! {
        #[test]
        fn keyless_text_concatenates_in_arrival_order(
            deltas in prop::collection::vec(arb_text(), 1..20)
        ) {
            let mut message = Message::assistant("m1", 1);
            for delta in &deltas {
                merge_part(&mut message, Part::text(delta.clone()));
            }
            prop_assert_eq!(message.visible_text(), deltas.concat());
            prop_assert_eq!(message.parts.len(), 1);
        }

        #[test]
        fn keyed_updates_never_duplicate_and_latest_wins(
            updates in prop::collection::vec((0usize..5, arb_text()), 1..30)
        ) {
            let mut message = Message::assistant("m1", 1);
            let mut latest: HashMap<usize, String> = HashMap::new();
            for (id, text) in updates {
                latest.insert(id, text.clone());
                merge_part(&mut message, keyed_text(id, text));
            }

            let keys: Vec<PartKey> = message.parts.iter().filter_map(Part::stable_key).collect();
            let unique: HashSet<&PartKey> = keys.iter().collect();
            prop_assert_eq!(keys.len(), unique.len());
            prop_assert_eq!(message.parts.len(), latest.len());

            for (id, text) in latest {
                let part = message
                    .parts
                    .iter()
                    .find(|p| p.id.as_ref().map(|pid| pid.as_str()) == Some(format!("p{id}").as_str()));
                let latest_wins = matches!(
                    part.map(|p| &p.body),
                    Some(PartBody::Text { text: t, .. }) if *t == text
                );
                prop_assert!(latest_wins);
            }
        }

        #[test]
        fn dedupe_is_idempotent(messages in prop::collection::vec(arb_message(), 0..10)) {
            let once = dedupe_messages_by_id(messages);
            let twice = dedupe_messages_by_id(once.clone());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn stopped_longer_message_keeps_its_content(
            existing_parts in arb_keyed_parts(6),
            incoming_parts in arb_keyed_parts(6),
        ) {
            let mut existing_unique = Message::assistant("m1", 1);
            for part in existing_parts {
                merge_part(&mut existing_unique, part);
            }
            let existing = existing_unique.with_finish(FinishReason::Stop);
            let incoming = Message::assistant("m1", 2).with_parts(incoming_parts);
            prop_assume!(existing.text_len() >= incoming.text_len());

            let merged = merge_duplicate_message(existing.clone(), incoming);

            prop_assert_eq!(&merged.parts[..existing.parts.len()], existing.parts.as_slice());
            let existing_keys: HashSet<PartKey> =
                existing.parts.iter().filter_map(Part::stable_key).collect();
            for added in &merged.parts[existing.parts.len()..] {
                let key = added.stable_key();
                prop_assert!(key.is_some_and(|key| !existing_keys.contains(&key)));
            }
            prop_assert_eq!(merged.finish(), Some(&FinishReason::Stop));
        }

        #[test]
        fn full_mode_never_queues_active_session_permissions(
            kinds in prop::collection::vec(arb_permission_kind(), 1..20)
        ) {
            let mut state =
                SessionState::new(SessionInfo::new("s1"), Arc::new(EngineConfig::default()));
            state.edit_mode_override = Some(EditMode::Full);

            for (index, kind) in kinds.into_iter().enumerate() {
                reduce(
                    &mut state,
                    Action::Backend(BackendEvent::PermissionAsked {
                        request: permission_request(&format!("perm{index}"), "s1", kind),
                    }),
                    Moment::now(),
                );
            }
            prop_assert_eq!(state.gate.permissions().count(), 0);
        }
    }
}

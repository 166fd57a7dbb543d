use std::sync::Arc;
use std::time::Duration;

use rudder_core::backend::{BackendError, ModelSelection};
use rudder_core::config::EngineConfig;
use rudder_core::session::{
    ActivityPhase, BackendEvent, EditMode, FinishReason, Message, MessageId, Part, PartBody,
    PermissionResponse, Role, SendRequest, SessionError, SessionHandle, SessionInfo,
    SessionManager, spawn_session_actor,
};
use rudder_core::test_utils::{BackendCall, MockBackend, part_updated, permission_request};

fn spawn(backend: &MockBackend) -> SessionHandle {
    let (handle, _task) = spawn_session_actor(
        SessionInfo::new("s1"),
        Arc::new(EngineConfig::default()),
        Arc::new(backend.clone()),
    );
    handle
}

fn model() -> ModelSelection {
    ModelSelection::new("anthropic", "claude-sonnet")
}

fn history() -> Vec<Message> {
    vec![
        Message::user("u1", 1, Default::default()).with_parts(vec![Part::text("first")]),
        Message::assistant("a1", 2)
            .with_parts(vec![Part::text("one")])
            .with_finish(FinishReason::Stop),
        Message::user("u2", 3, Default::default()).with_parts(vec![Part::text("second")]),
        Message::assistant("a2", 4)
            .with_parts(vec![Part::text("two")])
            .with_finish(FinishReason::Stop),
    ]
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_silent_stream_times_out_to_completed() {
    let backend = MockBackend::new();
    let handle = spawn(&backend);

    handle
        .dispatch_event(part_updated("s1", "m3", Role::Assistant, Part::text("partial")))
        .await
        .unwrap();
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.streaming_message_id, Some(MessageId::from("m3")));
    assert_eq!(snapshot.activity, ActivityPhase::Busy);

    tokio::time::sleep(Duration::from_millis(45_001)).await;

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.streaming_message_id, None);
    assert!(!snapshot.is_streaming);
    assert!(!snapshot.messages[0].streaming);
    assert!(snapshot.messages[0].is_finished_with_stop());
    assert_eq!(snapshot.activity, ActivityPhase::Cooldown);

    tokio::time::sleep(Duration::from_millis(1_600)).await;
    assert_eq!(handle.snapshot().await.unwrap().activity, ActivityPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_parts_keep_stream_alive_past_single_window() {
    let backend = MockBackend::new();
    let handle = spawn(&backend);

    for delta in ["a", "b", "c"] {
        handle
            .dispatch_event(part_updated("s1", "m1", Role::Assistant, Part::text(delta)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    }

    let snapshot = handle.snapshot().await.unwrap();
    assert!(snapshot.is_streaming);
    assert_eq!(snapshot.messages[0].visible_text(), "abc");
}

#[tokio::test(start_paused = true)]
async fn test_abort_clears_busy_state_when_remote_abort_fails() {
    let backend = MockBackend::new();
    backend
        .fail("abort_session", BackendError::Network {
            details: "connection reset".to_string(),
        })
        .await;
    let handle = spawn(&backend);

    handle
        .dispatch_event(part_updated(
            "s1",
            "m4",
            Role::Assistant,
            Part::with_id("s", PartBody::StepStart),
        ))
        .await
        .unwrap();

    let outcome = handle.abort().await.unwrap();
    assert_eq!(outcome.aborted, vec![MessageId::from("m4")]);
    assert!(outcome.remote_error.is_some());

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.streaming_message_id, None);
    assert!(!snapshot.is_streaming);
    assert_eq!(snapshot.activity, ActivityPhase::Idle);
    assert!(snapshot.messages[0].aborted_at().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_hard_send_failure_restores_draft() {
    let backend = MockBackend::new();
    backend
        .fail("send_message", BackendError::Unauthorized {
            details: "token expired".to_string(),
        })
        .await;
    let handle = spawn(&backend);

    let result = handle.send(SendRequest::new("refactor the parser", model())).await;
    assert!(matches!(result, Err(SessionError::Backend(_))));

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.pending_input.as_deref(), Some("refactor the parser"));
    assert!(!snapshot.is_streaming);
    assert_eq!(snapshot.activity, ActivityPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_soft_send_failure_is_swallowed_until_watchdog() {
    let backend = MockBackend::new();
    backend
        .fail("send_message", BackendError::Http {
            status: 504,
            message: "Gateway Timeout".to_string(),
        })
        .await;
    let handle = spawn(&backend);

    handle
        .send(SendRequest::new("hello", model()))
        .await
        .unwrap();
    let snapshot = handle.snapshot().await.unwrap();
    assert!(snapshot.is_streaming);
    assert!(snapshot.pending_input.is_none());

    tokio::time::sleep(Duration::from_secs(46)).await;
    let snapshot = handle.snapshot().await.unwrap();
    assert!(!snapshot.is_streaming);
}

#[tokio::test(start_paused = true)]
async fn test_send_stamps_user_message_with_model() {
    let backend = MockBackend::new();
    let handle = spawn(&backend);
    handle.select_agent(Some("build".to_string())).await.unwrap();

    handle.send(SendRequest::new("hi", model())).await.unwrap();
    handle
        .dispatch_event(part_updated("s1", "u1", Role::User, Part::text("hi")))
        .await
        .unwrap();
    handle.flush_user_parts().await.unwrap();

    let snapshot = handle.snapshot().await.unwrap();
    let rudder_core::session::MessageInfo::User(info) = &snapshot.messages[0].info else {
        panic!("expected a user message");
    };
    assert_eq!(info.agent_mode.as_deref(), Some("build"));
    assert_eq!(info.model_id.as_deref(), Some("claude-sonnet"));

    let sends = backend.calls_named("send_message").await;
    assert!(matches!(
        &sends[..],
        [BackendCall::SendMessage(request)] if request.agent.as_deref() == Some("build")
    ));
}

#[tokio::test(start_paused = true)]
async fn test_slash_compact_routes_to_summarize() {
    let backend = MockBackend::new();
    let handle = spawn(&backend);

    handle.send(SendRequest::new("/compact", model())).await.unwrap();

    assert_eq!(backend.calls_named("summarize_session").await, vec![
        BackendCall::Summarize(model())
    ]);
    assert!(backend.calls_named("send_message").await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_user_parts_are_batched() {
    let backend = MockBackend::new();
    let handle = spawn(&backend);

    handle
        .dispatch_event(part_updated("s1", "u1", Role::User, Part::text("echo")))
        .await
        .unwrap();
    assert!(handle.snapshot().await.unwrap().messages.is_empty());

    tokio::time::sleep(Duration::from_millis(60)).await;
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].visible_text(), "echo");
    assert!(!snapshot.is_streaming);
}

#[tokio::test(start_paused = true)]
async fn test_rejecting_permission_aborts_the_reply() {
    let backend = MockBackend::new();
    let handle = spawn(&backend);

    handle
        .dispatch_event(part_updated("s1", "a1", Role::Assistant, Part::text("editing")))
        .await
        .unwrap();
    handle
        .dispatch_event(BackendEvent::PermissionAsked {
            request: permission_request("perm1", "s1", "edit"),
        })
        .await
        .unwrap();
    assert_eq!(handle.snapshot().await.unwrap().permissions.len(), 1);

    handle
        .reply_to_permission("perm1".into(), PermissionResponse::Reject)
        .await
        .unwrap();
    settle().await;

    let snapshot = handle.snapshot().await.unwrap();
    assert!(snapshot.permissions.is_empty());
    assert!(!snapshot.is_streaming);
    assert_eq!(backend.calls_named("reply_to_permission").await, vec![
        BackendCall::ReplyPermission("perm1".into(), PermissionResponse::Reject)
    ]);
    assert_eq!(backend.calls_named("abort_session").await.len(), 1);

    let unknown = handle
        .reply_to_permission("perm1".into(), PermissionResponse::Once)
        .await;
    assert!(matches!(unknown, Err(SessionError::UnknownPermission(_))));
}

#[tokio::test(start_paused = true)]
async fn test_full_mode_auto_approves_through_backend() {
    let backend = MockBackend::new();
    let handle = spawn(&backend);

    let mode = handle.set_edit_mode_override(Some(EditMode::Full)).await.unwrap();
    assert_eq!(mode, EditMode::Full);
    handle
        .dispatch_event(BackendEvent::PermissionAsked {
            request: permission_request("perm1", "s1", "bash"),
        })
        .await
        .unwrap();
    settle().await;

    assert!(handle.snapshot().await.unwrap().permissions.is_empty());
    assert_eq!(backend.calls_named("reply_to_permission").await, vec![
        BackendCall::ReplyPermission("perm1".into(), PermissionResponse::Once)
    ]);
}

#[tokio::test(start_paused = true)]
async fn test_revert_then_unrevert_restores_history() {
    let backend = MockBackend::new();
    backend.set_messages(&"s1".into(), history()).await;
    let handle = spawn(&backend);

    let loaded = handle.load_messages().await.unwrap();
    assert_eq!(loaded.fetched, 4);
    assert!(!loaded.has_more);

    let outcome = handle.revert("u2".into()).await.unwrap();
    assert_eq!(outcome.removed, vec![MessageId::from("u2"), MessageId::from("a2")]);
    assert_eq!(outcome.draft.as_deref(), Some("second"));

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.revert_pointer(), Some(&MessageId::from("u2")));
    assert_eq!(snapshot.pending_input.as_deref(), Some("second"));

    handle.unrevert().await.unwrap();
    let snapshot = handle.snapshot().await.unwrap();
    let ids: Vec<&str> = snapshot.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["u1", "a1", "u2", "a2"]);
    assert_eq!(snapshot.revert_pointer(), None);
}

#[tokio::test(start_paused = true)]
async fn test_revert_of_unknown_message_is_rejected() {
    let backend = MockBackend::new();
    let handle = spawn(&backend);

    let result = handle.revert("missing".into()).await;
    assert!(matches!(result, Err(SessionError::UnknownMessage(_))));
    assert!(backend.calls_named("revert_session").await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_switching_sessions_stops_previous_actor() {
    let backend = MockBackend::new();
    let mut manager =
        SessionManager::new(Arc::new(backend.clone()), Arc::new(EngineConfig::default()));

    let first = manager.activate(SessionInfo::new("s1")).await;
    first
        .dispatch_event(part_updated("s1", "a1", Role::Assistant, Part::text("busy")))
        .await
        .unwrap();

    let second = manager.activate(SessionInfo::new("s2")).await;
    assert!(matches!(first.snapshot().await, Err(SessionError::ChannelClosed)));

    let routed = manager
        .route_event(part_updated("s1", "a1", Role::Assistant, Part::text("late")))
        .await
        .unwrap();
    assert!(!routed);
    assert!(second.snapshot().await.unwrap().messages.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fork_switches_to_new_session_with_draft() {
    let backend = MockBackend::new();
    backend.set_messages(&"s1".into(), history()).await;
    let mut manager =
        SessionManager::new(Arc::new(backend.clone()), Arc::new(EngineConfig::default()));

    let source = manager.activate(SessionInfo::new("s1")).await;
    source.load_messages().await.unwrap();

    let (forked, outcome) = manager.fork("u1".into()).await.unwrap();
    assert_ne!(forked.session_id().as_str(), "s1");
    assert_eq!(manager.active_session_id(), Some(forked.session_id()));
    assert_eq!(outcome.draft.as_deref(), Some("first"));

    let snapshot = forked.snapshot().await.unwrap();
    assert_eq!(snapshot.pending_input.as_deref(), Some("first"));
    assert_eq!(backend.calls_named("fork_session").await, vec![
        BackendCall::Fork("u1".into())
    ]);
}

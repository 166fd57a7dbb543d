//! Gate for backend permission requests and questions.
//!
//! Permissions may be answered automatically depending on the effective edit mode;
//! questions always wait for an explicit answer or rejection.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use strum::{Display, EnumString};

use super::types::{MessageId, PermissionId, QuestionId, SessionId};
use crate::config::PermissionsConfig;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EditMode {
    #[default]
    Ask,
    Allow,
    Full,
    Deny,
}

impl EditMode {
    pub const ALL: [EditMode; 4] = [EditMode::Ask, EditMode::Allow, EditMode::Full, EditMode::Deny];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PermissionResponse {
    Once,
    Always,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: PermissionId,
    pub session_id: SessionId,
    /// Permission kind as named by the backend, e.g. `edit` or `bash`.
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionPrompt {
    pub question: String,
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub multiple: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRequest {
    pub id: QuestionId,
    pub session_id: SessionId,
    pub questions: Vec<QuestionPrompt>,
}

/// Resolves the edit mode in force for `agent`.
///
/// The session override only applies when the agent's allowed modes (agent table,
/// falling back to the global table) include it; otherwise the agent's default
/// mode (again falling back to the global default) is used.
pub fn effective_edit_mode(
    policy: &PermissionsConfig,
    agent: Option<&str>,
    session_override: Option<EditMode>,
) -> EditMode {
    let agent_policy = agent.and_then(|name| policy.agents.get(name));
    let default = agent_policy
        .and_then(|p| p.edit_mode)
        .unwrap_or(policy.default_edit_mode);
    let allowed = agent_policy
        .and_then(|p| p.allowed_edit_modes.as_deref())
        .unwrap_or(&policy.allowed_edit_modes);

    match session_override {
        Some(mode) if allowed.contains(&mode) => mode,
        _ => default,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    AutoApprove(PermissionResponse),
    Enqueued,
    Duplicate,
    ForeignSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionDecision {
    Enqueued,
    Duplicate,
    ForeignSession,
}

#[derive(Debug, Clone, Default)]
pub struct PermissionGate {
    permissions: IndexMap<PermissionId, PermissionRequest>,
    questions: IndexMap<QuestionId, QuestionRequest>,
    /// Ids answered automatically; a redelivery must not be answered twice.
    auto_approved: HashSet<PermissionId>,
}

impl PermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate_permission(
        &mut self,
        request: PermissionRequest,
        active_session: &SessionId,
        mode: EditMode,
        policy: &PermissionsConfig,
    ) -> GateDecision {
        if &request.session_id != active_session {
            return GateDecision::ForeignSession;
        }
        if self.permissions.contains_key(&request.id) || self.auto_approved.contains(&request.id) {
            return GateDecision::Duplicate;
        }

        let auto = match mode {
            EditMode::Full => true,
            EditMode::Allow => policy.is_edit_kind(&request.kind),
            EditMode::Ask | EditMode::Deny => false,
        };
        if auto {
            self.auto_approved.insert(request.id);
            return GateDecision::AutoApprove(PermissionResponse::Once);
        }

        self.permissions.insert(request.id.clone(), request);
        GateDecision::Enqueued
    }

    pub fn offer_question(
        &mut self,
        request: QuestionRequest,
        active_session: &SessionId,
    ) -> QuestionDecision {
        if &request.session_id != active_session {
            return QuestionDecision::ForeignSession;
        }
        if self.questions.contains_key(&request.id) {
            return QuestionDecision::Duplicate;
        }
        self.questions.insert(request.id.clone(), request);
        QuestionDecision::Enqueued
    }

    pub fn take_permission(&mut self, id: &PermissionId) -> Option<PermissionRequest> {
        self.permissions.shift_remove(id)
    }

    pub fn take_question(&mut self, id: &QuestionId) -> Option<QuestionRequest> {
        self.questions.shift_remove(id)
    }

    pub fn permissions(&self) -> impl Iterator<Item = &PermissionRequest> + '_ {
        self.permissions.values()
    }

    pub fn questions(&self) -> impl Iterator<Item = &QuestionRequest> + '_ {
        self.questions.values()
    }

    pub fn has_permission(&self, id: &PermissionId) -> bool {
        self.permissions.contains_key(id)
    }

    pub fn has_question(&self, id: &QuestionId) -> bool {
        self.questions.contains_key(id)
    }

    pub fn clear(&mut self) {
        self.permissions.clear();
        self.questions.clear();
        self.auto_approved.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentPermissions;

    fn request(id: &str, session: &str, kind: &str) -> PermissionRequest {
        PermissionRequest {
            id: PermissionId::from(id),
            session_id: SessionId::from(session),
            kind: kind.to_string(),
            title: String::new(),
            patterns: Vec::new(),
            message_id: None,
            call_id: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn override_applies_only_when_allowed_for_agent() {
        let mut policy = PermissionsConfig::default();
        policy.agents.insert(
            "plan".to_string(),
            AgentPermissions {
                edit_mode: Some(EditMode::Deny),
                allowed_edit_modes: Some(vec![EditMode::Deny, EditMode::Ask]),
            },
        );

        assert_eq!(
            effective_edit_mode(&policy, Some("plan"), Some(EditMode::Full)),
            EditMode::Deny
        );
        assert_eq!(
            effective_edit_mode(&policy, Some("plan"), Some(EditMode::Ask)),
            EditMode::Ask
        );
        assert_eq!(
            effective_edit_mode(&policy, Some("build"), Some(EditMode::Full)),
            EditMode::Full
        );
        assert_eq!(effective_edit_mode(&policy, None, None), EditMode::Ask);
    }

    #[test]
    fn allow_mode_only_approves_edit_kinds() {
        let policy = PermissionsConfig::default();
        let session = SessionId::from("s1");
        let mut gate = PermissionGate::new();

        assert_eq!(
            gate.evaluate_permission(request("p1", "s1", "edit"), &session, EditMode::Allow, &policy),
            GateDecision::AutoApprove(PermissionResponse::Once)
        );
        assert_eq!(
            gate.evaluate_permission(request("p2", "s1", "bash"), &session, EditMode::Allow, &policy),
            GateDecision::Enqueued
        );
        assert_eq!(gate.permissions().count(), 1);
    }

    #[test]
    fn duplicates_and_foreign_sessions_are_dropped() {
        let policy = PermissionsConfig::default();
        let session = SessionId::from("s1");
        let mut gate = PermissionGate::new();

        gate.evaluate_permission(request("p1", "s1", "bash"), &session, EditMode::Ask, &policy);
        assert_eq!(
            gate.evaluate_permission(request("p1", "s1", "bash"), &session, EditMode::Ask, &policy),
            GateDecision::Duplicate
        );
        assert_eq!(
            gate.evaluate_permission(request("p9", "s2", "bash"), &session, EditMode::Ask, &policy),
            GateDecision::ForeignSession
        );
        assert_eq!(gate.permissions().count(), 1);
    }

    #[test]
    fn deny_mode_still_queues() {
        let policy = PermissionsConfig::default();
        let session = SessionId::from("s1");
        let mut gate = PermissionGate::new();
        assert_eq!(
            gate.evaluate_permission(request("p1", "s1", "edit"), &session, EditMode::Deny, &policy),
            GateDecision::Enqueued
        );
    }

    #[test]
    fn questions_dedupe_by_id() {
        let session = SessionId::from("s1");
        let mut gate = PermissionGate::new();
        let question = QuestionRequest {
            id: QuestionId::from("q1"),
            session_id: session.clone(),
            questions: vec![QuestionPrompt {
                question: "Which branch?".to_string(),
                header: String::new(),
                options: vec!["main".to_string()],
                multiple: false,
            }],
        };
        assert_eq!(gate.offer_question(question.clone(), &session), QuestionDecision::Enqueued);
        assert_eq!(gate.offer_question(question, &session), QuestionDecision::Duplicate);
        assert!(gate.take_question(&QuestionId::from("q1")).is_some());
        assert!(!gate.has_question(&QuestionId::from("q1")));
    }
}

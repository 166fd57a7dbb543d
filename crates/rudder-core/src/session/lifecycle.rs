//! Per-message stream lifecycle.
//!
//! A message is streaming exactly while it has an entry here. Completion and abort
//! are terminal for an id: later parts for it still merge into the message but never
//! bring the entry back. Only revert/fork/removal (`forget`) clears a terminal mark.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::time::Duration;
use strum::Display;
use tokio::time::Instant;

use super::types::MessageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum StreamPhase {
    Streaming,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum CompletionCause {
    /// The backend sent a finish reason or reported the session idle.
    Natural,
    Timeout,
    Zombie,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEntry {
    pub message_id: MessageId,
    pub started_at: Instant,
    pub last_update_at: Instant,
    pub completed_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Touch {
    Started,
    Refreshed,
    /// The id already reached a terminal phase; nothing was tracked.
    Terminal(StreamPhase),
}

#[derive(Debug, Clone, Default)]
pub struct StreamLifecycle {
    entries: IndexMap<MessageId, LifecycleEntry>,
    terminal: HashMap<MessageId, StreamPhase>,
    session_started_at: Option<Instant>,
}

impl StreamLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self, id: &MessageId) -> Option<StreamPhase> {
        if self.entries.contains_key(id) {
            return Some(StreamPhase::Streaming);
        }
        self.terminal.get(id).copied()
    }

    pub fn is_streaming(&self, id: &MessageId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn entry(&self, id: &MessageId) -> Option<&LifecycleEntry> {
        self.entries.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn active_ids(&self) -> impl Iterator<Item = &MessageId> + '_ {
        self.entries.keys()
    }

    /// Most recently started id still streaming.
    pub fn latest(&self) -> Option<&MessageId> {
        self.entries.keys().next_back()
    }

    /// Records activity for `id`, starting its entry on first sight.
    pub fn touch(&mut self, id: &MessageId, now: Instant) -> Touch {
        if let Some(phase) = self.terminal.get(id) {
            return Touch::Terminal(*phase);
        }
        if self.session_started_at.is_none() {
            self.session_started_at = Some(now);
        }
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.last_update_at = now;
                Touch::Refreshed
            }
            None => {
                self.entries.insert(
                    id.clone(),
                    LifecycleEntry {
                        message_id: id.clone(),
                        started_at: now,
                        last_update_at: now,
                        completed_at: None,
                    },
                );
                Touch::Started
            }
        }
    }

    pub fn complete(&mut self, id: &MessageId, now: Instant) -> Option<LifecycleEntry> {
        self.finish(id, now, StreamPhase::Completed)
    }

    pub fn abort(&mut self, id: &MessageId, now: Instant) -> Option<LifecycleEntry> {
        self.finish(id, now, StreamPhase::Aborted)
    }

    fn finish(
        &mut self,
        id: &MessageId,
        now: Instant,
        phase: StreamPhase,
    ) -> Option<LifecycleEntry> {
        self.terminal.insert(id.clone(), phase);
        let mut entry = self.entries.shift_remove(id)?;
        entry.completed_at = Some(now);
        if self.entries.is_empty() {
            self.session_started_at = None;
        }
        Some(entry)
    }

    /// Drops every trace of `id`, so a later stream may reuse it.
    pub fn forget(&mut self, id: &MessageId) -> bool {
        self.terminal.remove(id);
        let removed = self.entries.shift_remove(id).is_some();
        if self.entries.is_empty() {
            self.session_started_at = None;
        }
        removed
    }

    /// Marks the session as streaming from `now` if it is not already.
    pub fn mark_session_streaming(&mut self, now: Instant) {
        self.session_started_at.get_or_insert(now);
    }

    pub fn clear_session_streaming(&mut self) {
        self.session_started_at = None;
    }

    pub fn session_started_at(&self) -> Option<Instant> {
        self.session_started_at
    }

    /// True once the session has been streaming for longer than `bound`.
    pub fn zombie_expired(&self, now: Instant, bound: Duration) -> bool {
        self.session_started_at
            .is_some_and(|started| now.saturating_duration_since(started) > bound)
    }

    /// True if `id` has seen no update for at least `window`.
    pub fn inactive_for(&self, id: &MessageId, now: Instant, window: Duration) -> bool {
        self.entries
            .get(id)
            .is_some_and(|entry| now.saturating_duration_since(entry.last_update_at) >= window)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.terminal.clear();
        self.session_started_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_starts_then_refreshes() {
        let mut lifecycle = StreamLifecycle::new();
        let id = MessageId::from("m1");
        let t0 = Instant::now();
        assert_eq!(lifecycle.touch(&id, t0), Touch::Started);
        assert_eq!(
            lifecycle.touch(&id, t0 + Duration::from_secs(1)),
            Touch::Refreshed
        );
        let entry = lifecycle.entry(&id).cloned();
        assert_eq!(entry.map(|e| e.last_update_at), Some(t0 + Duration::from_secs(1)));
        assert_eq!(lifecycle.session_started_at(), Some(t0));
    }

    #[test]
    fn completed_ids_never_stream_again() {
        let mut lifecycle = StreamLifecycle::new();
        let id = MessageId::from("m1");
        let t0 = Instant::now();
        lifecycle.touch(&id, t0);
        let entry = lifecycle.complete(&id, t0);
        assert!(entry.is_some_and(|e| e.completed_at == Some(t0)));

        assert_eq!(
            lifecycle.touch(&id, t0),
            Touch::Terminal(StreamPhase::Completed)
        );
        assert!(!lifecycle.is_streaming(&id));
        assert_eq!(lifecycle.phase(&id), Some(StreamPhase::Completed));
        assert_eq!(lifecycle.session_started_at(), None);
    }

    #[test]
    fn forget_allows_reuse_of_an_id() {
        let mut lifecycle = StreamLifecycle::new();
        let id = MessageId::from("m1");
        let t0 = Instant::now();
        lifecycle.touch(&id, t0);
        lifecycle.abort(&id, t0);
        assert_eq!(lifecycle.phase(&id), Some(StreamPhase::Aborted));

        lifecycle.forget(&id);
        assert_eq!(lifecycle.phase(&id), None);
        assert_eq!(lifecycle.touch(&id, t0), Touch::Started);
    }

    #[test]
    fn zombie_bound_is_measured_from_session_start() {
        let mut lifecycle = StreamLifecycle::new();
        let t0 = Instant::now();
        let bound = Duration::from_secs(600);
        lifecycle.touch(&MessageId::from("m1"), t0);
        lifecycle.touch(&MessageId::from("m2"), t0 + Duration::from_secs(500));

        assert!(!lifecycle.zombie_expired(t0 + Duration::from_secs(599), bound));
        assert!(lifecycle.zombie_expired(t0 + Duration::from_secs(601), bound));
    }
}

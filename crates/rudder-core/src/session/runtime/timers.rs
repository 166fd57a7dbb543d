use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::session::effect::TimerKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TimerFiring {
    pub kind: TimerKind,
    pub generation: u64,
}

/// Timers owned by one session actor.
///
/// Each scheduled timer is a sleeping task tagged with a generation. A firing is
/// only honoured if its generation is still the current one for its kind, so a
/// timer that was cancelled or rescheduled after its task already sent cannot act.
/// Dropping the set aborts every task.
pub(crate) struct TimerSet {
    timers: HashMap<TimerKind, (u64, JoinHandle<()>)>,
    next_generation: u64,
    fired_tx: mpsc::UnboundedSender<TimerFiring>,
}

impl TimerSet {
    pub fn new(fired_tx: mpsc::UnboundedSender<TimerFiring>) -> Self {
        Self {
            timers: HashMap::new(),
            next_generation: 0,
            fired_tx,
        }
    }

    pub fn schedule(&mut self, kind: TimerKind, deadline: Instant) {
        self.cancel(&kind);
        self.next_generation += 1;
        let generation = self.next_generation;
        let fired_tx = self.fired_tx.clone();
        let firing = TimerFiring {
            kind: kind.clone(),
            generation,
        };
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = fired_tx.send(firing);
        });
        self.timers.insert(kind, (generation, handle));
    }

    pub fn cancel(&mut self, kind: &TimerKind) -> bool {
        match self.timers.remove(kind) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Accepts a firing if it belongs to the live timer of its kind.
    pub fn claim(&mut self, firing: &TimerFiring) -> bool {
        match self.timers.get(&firing.kind) {
            Some((generation, _)) if *generation == firing.generation => {
                self.timers.remove(&firing.kind);
                true
            }
            _ => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, (_, handle)) in self.timers.drain() {
            handle.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_scheduled(&self, kind: &TimerKind) -> bool {
        self.timers.contains_key(kind)
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

use tokio::time::Instant;

use super::effect::TimerKind;
use super::event::BackendEvent;
use super::types::{Timestamp, current_timestamp};

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Backend(BackendEvent),
    TimerFired(TimerKind),
    /// Applies queued user parts without waiting for the batch window.
    FlushUserParts,
}

/// Monotonic instant for timers plus the wall-clock stamp written into messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Moment {
    pub instant: Instant,
    pub timestamp: Timestamp,
}

impl Moment {
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            timestamp: current_timestamp(),
        }
    }

    pub fn at(instant: Instant, timestamp: Timestamp) -> Self {
        Self { instant, timestamp }
    }
}

use serde::{Deserialize, Serialize};
use strum::Display;

/// Coarse "is the agent doing something" signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ActivityPhase {
    #[default]
    Idle,
    Busy,
    Cooldown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownTimer {
    Start,
    Cancel,
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityTransition {
    pub from: ActivityPhase,
    pub to: ActivityPhase,
    pub cooldown: CooldownTimer,
}

impl ActivityTransition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// idle -> busy -> cooldown -> idle, with cooldown interruptible back to busy.
#[derive(Debug, Clone, Default)]
pub struct ActivityMachine {
    phase: ActivityPhase,
}

impl ActivityMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ActivityPhase {
        self.phase
    }

    /// An accepted send or an assistant part arrived.
    pub fn on_activity(&mut self) -> ActivityTransition {
        let cooldown = if self.phase == ActivityPhase::Cooldown {
            CooldownTimer::Cancel
        } else {
            CooldownTimer::Keep
        };
        self.move_to(ActivityPhase::Busy, cooldown)
    }

    /// The lifecycle supervisor reports that nothing is streaming any more.
    pub fn on_drained(&mut self) -> ActivityTransition {
        match self.phase {
            ActivityPhase::Busy => self.move_to(ActivityPhase::Cooldown, CooldownTimer::Start),
            phase => self.move_to(phase, CooldownTimer::Keep),
        }
    }

    /// The cooldown delay elapsed without new activity.
    pub fn on_cooldown_elapsed(&mut self) -> ActivityTransition {
        match self.phase {
            ActivityPhase::Cooldown => self.move_to(ActivityPhase::Idle, CooldownTimer::Keep),
            phase => self.move_to(phase, CooldownTimer::Keep),
        }
    }

    /// Abort and hard send failures skip the cooldown entirely.
    pub fn force_idle(&mut self) -> ActivityTransition {
        let cooldown = if self.phase == ActivityPhase::Cooldown {
            CooldownTimer::Cancel
        } else {
            CooldownTimer::Keep
        };
        self.move_to(ActivityPhase::Idle, cooldown)
    }

    fn move_to(&mut self, to: ActivityPhase, cooldown: CooldownTimer) -> ActivityTransition {
        let from = std::mem::replace(&mut self.phase, to);
        ActivityTransition { from, to, cooldown }
    }
}

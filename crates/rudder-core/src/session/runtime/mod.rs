mod manager;
mod session_actor;
mod timers;

pub use manager::SessionManager;
pub use session_actor::{
    AbortOutcome, ForkOutcome, RevertOutcome, SendRequest, SessionError, SessionHandle,
    spawn_session_actor,
};

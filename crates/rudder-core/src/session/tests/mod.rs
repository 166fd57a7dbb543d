//! Session engine tests.
//!
//! - Scenarios: end-to-end flows through the reducer and command handlers
//! - Property tests: proptest-based checks of the merge and gate invariants

mod property;

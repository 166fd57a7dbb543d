pub mod cli;
pub mod commands;
pub mod error;
pub mod offline;

pub use rudder_core::{backend, config, session, utils};

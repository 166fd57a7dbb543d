// Session message stream engine: merges streamed backend events into one
// ordered message list and supervises reply lifecycles.

pub mod backend;
pub mod config;
pub mod error;
pub mod session;
pub mod test_utils;
pub mod utils;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Invalid event on line {line}: {source}")]
    InvalidEvent {
        line: usize,
        source: serde_json::Error,
    },

    #[error("Failed to encode snapshot: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Session(#[from] rudder_core::session::SessionError),

    #[error(transparent)]
    Core(#[from] rudder_core::error::Error),
}

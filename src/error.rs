use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CasterError>;

#[derive(Error, Debug)]
pub enum CasterError {
    #[error("No Chromecast named '{name}' found within {}s (discovered: [{}])", .timeout.as_secs(), .discovered.join(", "))]
    DiscoveryTimeout {
        name: String,
        discovered: Vec<String>,
        timeout: Duration,
    },

    #[error("Connect error: {0}")]
    Connect(String),

    #[error("Playback timeout: {0}")]
    PlaybackTimeout(String),

    #[error("Unsupported media: {0}")]
    UnsupportedMedia(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Media catalog is empty, nothing to pick from")]
    EmptyCatalog,

    #[error("Cast error: {0}")]
    Cast(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Task error: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for CasterError {
    fn from(err: tokio::task::JoinError) -> Self {
        CasterError::Task(err.to_string())
    }
}

impl From<rust_cast::errors::Error> for CasterError {
    fn from(err: rust_cast::errors::Error) -> Self {
        CasterError::Cast(err.to_string())
    }
}

impl CasterError {
    /// Names seen during a failed discovery, so the operator can correct a typo.
    pub fn discovered_devices(&self) -> Option<&[String]> {
        match self {
            CasterError::DiscoveryTimeout { discovered, .. } => Some(discovered),
            _ => None,
        }
    }
}

pub mod cast;
pub mod config;
pub mod error;
pub mod media;
pub mod network;
pub mod orchestrator;
pub mod scheduler;
pub mod server;
pub mod signals;

pub use error::{CasterError, Result};

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Default receiver volume: quiet enough for an unattended morning cast.
pub const DEFAULT_VOLUME: f32 = 0.003;

/// A resolved receiver. Produced by discovery and dropped once the operation
/// that asked for it finishes; nothing caches descriptors across operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub address: IpAddr,
    pub port: u16,
    pub model: Option<String>,
    pub id: Option<String>,
}

impl DeviceDescriptor {
    pub fn new(name: impl Into<String>, address: IpAddr, port: u16) -> Self {
        Self {
            name: name.into(),
            address,
            port,
            model: None,
            id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Start,
    Stop,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = CasterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Action::Start),
            "stop" => Ok(Action::Stop),
            other => Err(CasterError::Config(format!("unknown action '{}'", other))),
        }
    }
}

/// Clamps a requested volume into the receiver's 0.0..=1.0 range.
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        DEFAULT_VOLUME
    } else {
        volume.clamp(0.0, 1.0)
    }
}

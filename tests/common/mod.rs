#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kittycaster::network::{AppSession, DeviceRegistry, PlaybackState, ReceiverControl};
use kittycaster::{CasterError, DeviceDescriptor, Result};

/// One receiver-side effect, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Launch { device: String, app_id: String },
    Load { device: String, content_id: String, content_type: String },
    Volume { device: String, level: f32 },
    Quit { device: String, stopped: usize },
}

#[derive(Debug, Default)]
struct Receivers {
    calls: Vec<Call>,
    running: HashMap<String, AppSession>,
    playing: HashMap<String, bool>,
}

/// Registry double: resolves known names instantly and records what each
/// connected control was asked to do.
#[derive(Debug, Clone, Default)]
pub struct RecordingRegistry {
    known: Vec<String>,
    receivers: Arc<Mutex<Receivers>>,
    behaviour: Behaviour,
}

/// How the simulated receivers misbehave.
#[derive(Debug, Clone, Copy, Default)]
struct Behaviour {
    launch_delay: Duration,
    never_plays: bool,
}

impl RecordingRegistry {
    pub fn with_devices(names: &[&str]) -> Self {
        Self {
            known: names.iter().map(|n| n.to_string()).collect(),
            receivers: Arc::default(),
            behaviour: Behaviour::default(),
        }
    }

    /// App launches block the calling thread for `delay`.
    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.behaviour.launch_delay = delay;
        self
    }

    /// Loaded media stays buffering forever.
    pub fn never_playing(mut self) -> Self {
        self.behaviour.never_plays = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.receivers.lock().unwrap().calls.clone()
    }

    pub fn loads(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Load { content_id, .. } => Some(content_id),
                _ => None,
            })
            .collect()
    }

    pub fn quits(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, Call::Quit { .. }))
            .collect()
    }
}

#[async_trait]
impl DeviceRegistry for RecordingRegistry {
    async fn resolve(&self, name: &str, timeout: Duration) -> Result<DeviceDescriptor> {
        if self.known.iter().any(|known| known == name) {
            Ok(DeviceDescriptor::new(name, IpAddr::V4(Ipv4Addr::LOCALHOST), 8009))
        } else {
            Err(CasterError::DiscoveryTimeout {
                name: name.to_string(),
                discovered: self.known.clone(),
                timeout,
            })
        }
    }

    fn connect(&self, device: &DeviceDescriptor) -> Result<Box<dyn ReceiverControl>> {
        Ok(Box::new(RecordingControl {
            device: device.name.clone(),
            receivers: Arc::clone(&self.receivers),
            behaviour: self.behaviour,
        }))
    }
}

struct RecordingControl {
    device: String,
    receivers: Arc<Mutex<Receivers>>,
    behaviour: Behaviour,
}

impl ReceiverControl for RecordingControl {
    fn running_app(&mut self, app_id: &str) -> Result<Option<AppSession>> {
        let receivers = self.receivers.lock().unwrap();
        Ok(receivers
            .running
            .get(&self.device)
            .filter(|session| session.app_id == app_id)
            .cloned())
    }

    fn launch_app(&mut self, app_id: &str) -> Result<AppSession> {
        std::thread::sleep(self.behaviour.launch_delay);
        let mut receivers = self.receivers.lock().unwrap();
        let session = AppSession {
            app_id: app_id.to_string(),
            session_id: format!("session-{}", receivers.calls.len()),
            transport_id: format!("transport-{}", receivers.calls.len()),
        };
        receivers.calls.push(Call::Launch {
            device: self.device.clone(),
            app_id: app_id.to_string(),
        });
        receivers.running.insert(self.device.clone(), session.clone());
        receivers.playing.insert(self.device.clone(), false);
        Ok(session)
    }

    fn load(&mut self, _session: &AppSession, content_id: &str, content_type: &str) -> Result<()> {
        let mut receivers = self.receivers.lock().unwrap();
        receivers.calls.push(Call::Load {
            device: self.device.clone(),
            content_id: content_id.to_string(),
            content_type: content_type.to_string(),
        });
        receivers
            .playing
            .insert(self.device.clone(), !self.behaviour.never_plays);
        Ok(())
    }

    fn playback_state(&mut self, _session: &AppSession) -> Result<Option<PlaybackState>> {
        let receivers = self.receivers.lock().unwrap();
        Ok(match receivers.playing.get(&self.device) {
            Some(true) => Some(PlaybackState::Playing),
            Some(false) => Some(PlaybackState::Buffering),
            None => None,
        })
    }

    fn set_volume(&mut self, level: f32) -> Result<()> {
        self.receivers.lock().unwrap().calls.push(Call::Volume {
            device: self.device.clone(),
            level,
        });
        Ok(())
    }

    fn quit_app(&mut self) -> Result<usize> {
        let mut receivers = self.receivers.lock().unwrap();
        let stopped = usize::from(receivers.running.remove(&self.device).is_some());
        receivers.playing.remove(&self.device);
        receivers.calls.push(Call::Quit {
            device: self.device.clone(),
            stopped,
        });
        Ok(stopped)
    }
}

/// Polls `check` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

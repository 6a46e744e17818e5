pub mod chromecast;
pub mod discovery;

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::{DeviceDescriptor, Result};
use self::chromecast::RustCastControl;
use self::discovery::MdnsDiscovery;

/// mDNS service type advertised by cast receivers.
pub const CHROMECAST_SERVICE_TYPE: &str = "_googlecast._tcp.local.";

/// An application session running on a receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSession {
    pub app_id: String,
    pub session_id: String,
    pub transport_id: String,
}

/// Receiver-reported media state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Buffering,
    Playing,
    Paused,
}

/// A connected control channel to one receiver.
///
/// Implementations are blocking and are only ever driven from one thread
/// (the blocking pool thread running the current cast operation).
pub trait ReceiverControl {
    /// The session of `app_id` if that app is currently running.
    fn running_app(&mut self, app_id: &str) -> Result<Option<AppSession>>;

    fn launch_app(&mut self, app_id: &str) -> Result<AppSession>;

    /// Asks `session` to load and play `content_id`.
    fn load(&mut self, session: &AppSession, content_id: &str, content_type: &str) -> Result<()>;

    /// Current player state of `session`, `None` before any media is loaded.
    fn playback_state(&mut self, session: &AppSession) -> Result<Option<PlaybackState>>;

    fn set_volume(&mut self, level: f32) -> Result<()>;

    /// Quits whatever is running. Returns how many apps were stopped; zero is
    /// not an error.
    fn quit_app(&mut self) -> Result<usize>;
}

/// Entry point to receivers on the network: find one by name, then connect.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn resolve(&self, name: &str, timeout: Duration) -> Result<DeviceDescriptor>;

    /// Opens a control channel. Blocking; callers run it on the blocking pool.
    fn connect(&self, device: &DeviceDescriptor) -> Result<Box<dyn ReceiverControl>>;
}

/// Production registry: mDNS discovery plus CASTV2 control via `rust_cast`.
#[derive(Debug, Clone, Default)]
pub struct CastRegistry {
    discovery: MdnsDiscovery,
}

impl CastRegistry {
    pub fn new(discovery: MdnsDiscovery) -> Self {
        Self { discovery }
    }

    pub fn discovery(&self) -> &MdnsDiscovery {
        &self.discovery
    }
}

#[async_trait]
impl DeviceRegistry for CastRegistry {
    async fn resolve(&self, name: &str, timeout: Duration) -> Result<DeviceDescriptor> {
        self.discovery.resolve(name, timeout).await
    }

    fn connect(&self, device: &DeviceDescriptor) -> Result<Box<dyn ReceiverControl>> {
        let control = RustCastControl::connect(device)?;
        info!("Connected to Chromecast: {}", device.name);
        Ok(Box::new(control))
    }
}

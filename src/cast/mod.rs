mod caster;
mod devices;

pub use caster::{Caster, StartOutcome};
pub use devices::DevicesInUse;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use crate::media::{extension_of, CASTABLE_EXTENSIONS, DEFAULT_MEDIA_RECEIVER_APP};
use crate::network::{AppSession, DeviceRegistry, PlaybackState, ReceiverControl};
use crate::{clamp_volume, CasterError, DeviceDescriptor, Result};

pub const DEFAULT_PLAYBACK_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_APP_SESSION_TIMEOUT: Duration = Duration::from_secs(60);
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Content type the receiver expects for streaming-app items.
const APP_ITEM_CONTENT_TYPE: &str = "x-youtube/video";

/// Per-operation receiver control. Each call discovers nothing and caches
/// nothing: it connects to the given descriptor, does its work on the
/// blocking pool and disconnects.
#[derive(Clone)]
pub struct CastSession {
    registry: Arc<dyn DeviceRegistry>,
    playback_timeout: Duration,
    app_session_timeout: Duration,
}

impl CastSession {
    pub fn new(registry: Arc<dyn DeviceRegistry>) -> Self {
        Self {
            registry,
            playback_timeout: DEFAULT_PLAYBACK_TIMEOUT,
            app_session_timeout: DEFAULT_APP_SESSION_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, playback: Duration, app_session: Duration) -> Self {
        self.playback_timeout = playback;
        self.app_session_timeout = app_session;
        self
    }

    pub fn registry(&self) -> &Arc<dyn DeviceRegistry> {
        &self.registry
    }

    /// Plays `url` through the Default Media Receiver, then sets the volume.
    pub async fn start_media(&self, device: &DeviceDescriptor, url: &str, volume: f32) -> Result<()> {
        let content_type = castable_content_type(url)?;
        info!("Casting media: {}", url);

        let url = url.to_string();
        let timeout = self.playback_timeout;
        self.with_control(device, move |control, name| {
            let session = control.launch_app(DEFAULT_MEDIA_RECEIVER_APP)?;
            control.load(&session, &url, &content_type)?;
            wait_until_playing(control, &session, timeout, name)?;
            info!("Media is now playing on {}", name);
            control.set_volume(clamp_volume(volume))?;
            info!("Set Chromecast volume to {}", clamp_volume(volume));
            Ok(())
        })
        .await
    }

    /// Plays `item_id` inside a streaming app (YouTube), joining the app if
    /// it is already open.
    pub async fn start_streaming_app(
        &self,
        device: &DeviceDescriptor,
        app_id: &str,
        item_id: &str,
        volume: f32,
    ) -> Result<()> {
        info!("Casting app item {} (app {})", item_id, app_id);

        let app_id = app_id.to_string();
        let item_id = item_id.to_string();
        let session_timeout = self.app_session_timeout;
        let playback_timeout = self.playback_timeout;
        self.with_control(device, move |control, name| {
            if control.running_app(&app_id)?.is_none() {
                control.launch_app(&app_id)?;
            }
            let session = wait_for_app_session(control, &app_id, session_timeout, name)?;
            info!("Started app session {} on {}", session.session_id, name);

            control.load(&session, &item_id, APP_ITEM_CONTENT_TYPE)?;
            wait_until_playing(control, &session, playback_timeout, name)?;
            info!("Item {} is now playing on {}", item_id, name);

            control.set_volume(clamp_volume(volume))?;
            info!("Set Chromecast volume to {}", clamp_volume(volume));
            Ok(())
        })
        .await
    }

    /// Quits whatever app is running. Stopping an idle receiver succeeds.
    pub async fn stop(&self, device: &DeviceDescriptor) -> Result<()> {
        self.with_control(device, |control, name| {
            let stopped = control.quit_app()?;
            if stopped == 0 {
                info!("Nothing was playing on {}", name);
            } else {
                info!("Stopped casting on {}", name);
            }
            Ok(())
        })
        .await
    }

    pub async fn set_volume(&self, device: &DeviceDescriptor, level: f32) -> Result<()> {
        self.with_control(device, move |control, name| {
            control.set_volume(clamp_volume(level))?;
            info!("Set {} volume to {}", name, clamp_volume(level));
            Ok(())
        })
        .await
    }

    async fn with_control<F>(&self, device: &DeviceDescriptor, op: F) -> Result<()>
    where
        F: FnOnce(&mut dyn ReceiverControl, &str) -> Result<()> + Send + 'static,
    {
        let registry = Arc::clone(&self.registry);
        let device = device.clone();
        tokio::task::spawn_blocking(move || {
            let mut control = registry.connect(&device)?;
            op(control.as_mut(), &device.name)
        })
        .await?
    }
}

/// `video/<ext>` for URLs the Default Media Receiver can play directly.
pub fn castable_content_type(url: &str) -> Result<String> {
    match extension_of(url) {
        Some(ext) if CASTABLE_EXTENSIONS.contains(&ext.as_str()) => Ok(format!("video/{}", ext)),
        Some(ext) => Err(CasterError::UnsupportedMedia(format!(
            "unsupported filetype '{}' in {}",
            ext, url
        ))),
        None => Err(CasterError::UnsupportedMedia(format!("no file extension in {}", url))),
    }
}

fn wait_until_playing(
    control: &mut dyn ReceiverControl,
    session: &AppSession,
    timeout: Duration,
    device_name: &str,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if control.playback_state(session)? == Some(PlaybackState::Playing) {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(CasterError::PlaybackTimeout(format!(
                "{} did not report playback within {}s",
                device_name,
                timeout.as_secs()
            )));
        }
        thread::sleep(STATUS_POLL_INTERVAL.min(deadline - now));
    }
}

fn wait_for_app_session(
    control: &mut dyn ReceiverControl,
    app_id: &str,
    timeout: Duration,
    device_name: &str,
) -> Result<AppSession> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(session) = control.running_app(app_id)? {
            return Ok(session);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(CasterError::PlaybackTimeout(format!(
                "app {} never reported a session on {} within {}s",
                app_id,
                device_name,
                timeout.as_secs()
            )));
        }
        thread::sleep(STATUS_POLL_INTERVAL.min(deadline - now));
    }
}

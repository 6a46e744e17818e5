use rust_cast::channels::media::{Media, PlayerState, StreamType};
use rust_cast::channels::receiver::{Application, CastDeviceApp};
use rust_cast::CastDevice;
use tracing::{debug, info};

use super::{AppSession, PlaybackState, ReceiverControl};
use crate::media::{DEFAULT_MEDIA_RECEIVER_APP, YOUTUBE_APP};
use crate::{CasterError, DeviceDescriptor, Result};

const RECEIVER_DESTINATION: &str = "receiver-0";

/// CASTV2 control channel to one receiver, open for a single operation.
pub struct RustCastControl {
    name: String,
    device: CastDevice<'static>,
}

impl RustCastControl {
    pub fn connect(descriptor: &DeviceDescriptor) -> Result<Self> {
        info!(
            "Connecting to Chromecast {} at {}:{}",
            descriptor.name, descriptor.address, descriptor.port
        );
        let device = CastDevice::connect_without_host_verification(
            descriptor.address.to_string(),
            descriptor.port,
        )
        .map_err(|e| CasterError::Connect(format!("{}: {}", descriptor.name, e)))?;

        device
            .connection
            .connect(RECEIVER_DESTINATION.to_string())
            .map_err(|e| CasterError::Connect(format!("{}: {}", descriptor.name, e)))?;
        device
            .heartbeat
            .ping()
            .map_err(|e| CasterError::Connect(format!("{}: {}", descriptor.name, e)))?;

        Ok(Self {
            name: descriptor.name.clone(),
            device,
        })
    }

    fn app_for(app_id: &str) -> CastDeviceApp {
        match app_id {
            DEFAULT_MEDIA_RECEIVER_APP => CastDeviceApp::DefaultMediaReceiver,
            YOUTUBE_APP => CastDeviceApp::YouTube,
            other => CastDeviceApp::Custom(other.to_string()),
        }
    }

    fn session_of(app: &Application) -> AppSession {
        AppSession {
            app_id: app.app_id.clone(),
            session_id: app.session_id.clone(),
            transport_id: app.transport_id.clone(),
        }
    }

    fn running_apps(&self) -> Result<Vec<Application>> {
        Ok(self.device.receiver.get_status()?.applications)
    }
}

impl ReceiverControl for RustCastControl {
    fn running_app(&mut self, app_id: &str) -> Result<Option<AppSession>> {
        let session = self
            .running_apps()?
            .iter()
            .find(|app| app.app_id == app_id && !app.transport_id.is_empty())
            .map(Self::session_of);
        Ok(session)
    }

    fn launch_app(&mut self, app_id: &str) -> Result<AppSession> {
        let app = self.device.receiver.launch_app(&Self::app_for(app_id))?;
        debug!("Launched app {} on {} (session {})", app.app_id, self.name, app.session_id);
        Ok(Self::session_of(&app))
    }

    fn load(&mut self, session: &AppSession, content_id: &str, content_type: &str) -> Result<()> {
        self.device
            .connection
            .connect(session.transport_id.clone())?;

        let media = Media {
            content_id: content_id.to_string(),
            content_type: content_type.to_string(),
            stream_type: StreamType::Buffered,
            duration: None,
            metadata: None,
        };
        self.device.media.load(
            session.transport_id.clone(),
            session.session_id.clone(),
            &media,
        )?;
        Ok(())
    }

    fn playback_state(&mut self, session: &AppSession) -> Result<Option<PlaybackState>> {
        let status = self
            .device
            .media
            .get_status(session.transport_id.clone(), None)?;
        let state = status.entries.first().map(|entry| match entry.player_state {
            PlayerState::Idle => PlaybackState::Idle,
            PlayerState::Buffering => PlaybackState::Buffering,
            PlayerState::Playing => PlaybackState::Playing,
            PlayerState::Paused => PlaybackState::Paused,
        });
        Ok(state)
    }

    fn set_volume(&mut self, level: f32) -> Result<()> {
        self.device.receiver.set_volume(level)?;
        Ok(())
    }

    fn quit_app(&mut self) -> Result<usize> {
        let apps = self.running_apps()?;
        for app in &apps {
            self.device.receiver.stop_app(app.session_id.clone())?;
            debug!("Stopped app {} on {}", app.app_id, self.name);
        }
        Ok(apps.len())
    }
}

impl Drop for RustCastControl {
    fn drop(&mut self) {
        let _ = self
            .device
            .connection
            .disconnect(RECEIVER_DESTINATION.to_string());
    }
}

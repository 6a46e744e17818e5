use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::{CastSession, DevicesInUse};
use crate::media::{MediaCatalog, MediaRef, MediaUrls};
use crate::network::DeviceRegistry;
use crate::{clamp_volume, CasterError, Result};

/// What a successful start played, for the operator-facing confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct StartOutcome {
    pub device: String,
    pub media: MediaRef,
    /// The URL handed to the receiver; `None` for streaming-app items.
    pub url: Option<String>,
    pub volume: f32,
}

/// Start/stop against named receivers, shared by scheduled jobs and
/// interactive commands. Every call re-discovers its device.
pub struct Caster {
    session: CastSession,
    catalog: Arc<MediaCatalog>,
    devices: Arc<DevicesInUse>,
    urls: MediaUrls,
    discovery_timeout: Duration,
    served_dir: Option<PathBuf>,
}

impl Caster {
    pub fn new(
        session: CastSession,
        catalog: Arc<MediaCatalog>,
        devices: Arc<DevicesInUse>,
        urls: MediaUrls,
        discovery_timeout: Duration,
    ) -> Self {
        Self {
            session,
            catalog,
            devices,
            urls,
            discovery_timeout,
            served_dir: None,
        }
    }

    /// Local references naming a file that exists here are appended to the catalog.
    pub fn with_served_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.served_dir = Some(dir.into());
        self
    }

    pub fn catalog(&self) -> &Arc<MediaCatalog> {
        &self.catalog
    }

    pub fn devices(&self) -> &Arc<DevicesInUse> {
        &self.devices
    }

    pub fn urls(&self) -> &MediaUrls {
        &self.urls
    }

    pub fn discovery_timeout(&self) -> Duration {
        self.discovery_timeout
    }

    fn registry(&self) -> &Arc<dyn DeviceRegistry> {
        self.session.registry()
    }

    /// Starts `media` (or a random catalog pick) on `device_name`.
    ///
    /// Local files are not checked for existence: the receiver reports a
    /// missing file as a failed load.
    pub async fn start(
        &self,
        device_name: &str,
        media: Option<MediaRef>,
        volume: f32,
    ) -> Result<StartOutcome> {
        let media = match media {
            Some(media) => media,
            None => {
                let picked = self.catalog.choose_random()?;
                info!("Picked '{}' at random from {} catalog entries", picked, self.catalog.len());
                picked
            }
        };
        self.remember_local(&media);

        let url = self.urls.resolve(&media);
        let volume = clamp_volume(volume);
        let device = self
            .registry()
            .resolve(device_name, self.discovery_timeout)
            .await?;

        // Tracked before anything reaches the receiver, so a drain that runs
        // while this start is in flight still stops the device.
        let newly_tracked = self.devices.insert(&device.name);
        let started = match (&media, url.as_deref()) {
            (MediaRef::Streaming { app_id, item_id }, _) => {
                self.session
                    .start_streaming_app(&device, app_id, item_id, volume)
                    .await
            }
            (_, Some(url)) => self.session.start_media(&device, url, volume).await,
            (_, None) => Err(CasterError::UnsupportedMedia(format!("no URL for '{}'", media))),
        };

        if let Err(e) = started {
            // Only failures before any launch leave the receiver untouched.
            if newly_tracked && failed_before_launch(&e) {
                self.devices.remove(&device.name);
            }
            return Err(e);
        }

        Ok(StartOutcome {
            device: device.name,
            media,
            url,
            volume,
        })
    }

    /// Stops whatever plays on `device_name`. Idle receivers are not an error.
    pub async fn stop(&self, device_name: &str) -> Result<()> {
        let device = self
            .registry()
            .resolve(device_name, self.discovery_timeout)
            .await?;
        self.session.stop(&device).await?;
        self.devices.remove(device_name);
        Ok(())
    }

    pub async fn set_volume(&self, device_name: &str, level: f32) -> Result<()> {
        let device = self
            .registry()
            .resolve(device_name, self.discovery_timeout)
            .await?;
        self.session.set_volume(&device, level).await
    }

    /// Best-effort stop of every device in use; the set is emptied first.
    /// Returns the names that could not be stopped.
    pub async fn stop_all(&self) -> Vec<String> {
        let names = self.devices.drain();
        if names.is_empty() {
            return Vec::new();
        }
        info!("Stopping {} device(s) in use: {}", names.len(), names.join(", "));

        let results = futures::future::join_all(names.iter().map(|name| async move {
            let result = self.stop(name).await;
            (name, result)
        }))
        .await;

        let mut failed = Vec::new();
        for (name, result) in results {
            if let Err(e) = result {
                warn!("Could not stop {}: {}", name, e);
                failed.push(name.clone());
            }
        }
        failed
    }

    fn remember_local(&self, media: &MediaRef) {
        let (Some(dir), MediaRef::Local(name)) = (&self.served_dir, media) else {
            return;
        };
        if !self.catalog.contains(media) && dir.join(name).is_file() {
            self.catalog.insert(media.clone());
            info!("Added '{}' to the media catalog", name);
        }
    }
}

fn failed_before_launch(err: &CasterError) -> bool {
    matches!(
        err,
        CasterError::UnsupportedMedia(_) | CasterError::Connect(_)
    )
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::media::{MediaRef, DEFAULT_MEDIA_EXTENSIONS};
use crate::scheduler::ScheduleEntry;
use crate::{clamp_volume, Action, CasterError, Result, DEFAULT_VOLUME};

pub const DEFAULT_FRIENDLY_NAME: &str = "KittyCaster TV";
pub const DEFAULT_SERVE_PORT: u16 = 8000;
pub const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_PLAYBACK_TIMEOUT_SECS: u64 = 30;

/// Template written by `kittycaster init`.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# KittyCaster configuration
friendly_name = "KittyCaster TV"
discovery_timeout = 10

# Serve this folder over HTTP so local files can be cast.
# serve_local_folder = "/home/me/Videos"
serve_port = 8000
include_local_media = true

# Extra catalog entries: file names in the served folder or absolute URLs.
media_files = []
# YouTube video ids, added to the catalog as youtube:<id>.
video_ids = []

volume = 0.003

# [[schedule]]
# friendly_name = "Living Room TV"
# media = "morning.mp4"
# time = "08:00"
# action = "start"
# volume = 0.05
#
# [[schedule]]
# friendly_name = "Living Room TV"
# time = "10:00"
# action = "stop"
"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub friendly_name: String,
    /// Seconds to browse for a named receiver.
    pub discovery_timeout: u64,
    pub serve_local_folder: Option<PathBuf>,
    pub serve_port: u16,
    /// Host used in synthesized media URLs. Detected when unset.
    pub serve_host: Option<String>,
    pub include_local_media: bool,
    pub media_files: Vec<String>,
    pub video_ids: Vec<String>,
    pub media_extensions: Vec<String>,
    pub volume: f32,
    /// Seconds to wait for a receiver to report playback.
    pub playback_timeout: u64,
    pub log_file: Option<PathBuf>,
    /// Kept raw so one malformed entry does not reject the whole file.
    pub schedule: Vec<toml::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            friendly_name: DEFAULT_FRIENDLY_NAME.to_string(),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT_SECS,
            serve_local_folder: None,
            serve_port: DEFAULT_SERVE_PORT,
            serve_host: None,
            include_local_media: true,
            media_files: Vec::new(),
            video_ids: Vec::new(),
            media_extensions: DEFAULT_MEDIA_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            volume: DEFAULT_VOLUME,
            playback_timeout: DEFAULT_PLAYBACK_TIMEOUT_SECS,
            log_file: None,
            schedule: Vec::new(),
        }
    }
}

/// A `[[schedule]]` table as written in the file.
#[derive(Debug, Clone, Deserialize)]
struct RawScheduleEntry {
    #[serde(alias = "device")]
    friendly_name: Option<String>,
    media: Option<String>,
    video_id: Option<String>,
    time: Option<String>,
    action: Option<String>,
    volume: Option<f32>,
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "kittycaster")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Strict load: any read or parse failure is returned.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Loads `path`, falling back to defaults when the file is missing or
    /// broken. Never fails.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            warn!(
                "Config file {} not found, using defaults (run `kittycaster init` to create one)",
                path.display()
            );
            return Self::default();
        }
        match Self::from_file(path) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                error!("Could not load config {}: {}; using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// Writes the default template to `path` unless a file is already there.
    /// Returns whether a file was written.
    pub fn write_default(path: &Path) -> Result<bool> {
        if path.exists() {
            info!("Config file already exists at {}", path.display());
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)?;
        info!("Created default config at {}", path.display());
        Ok(true)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout)
    }

    pub fn playback_timeout(&self) -> Duration {
        Duration::from_secs(self.playback_timeout)
    }

    /// Catalog entries named directly in the file: `media_files` then
    /// `video_ids`.
    pub fn configured_media(&self) -> Vec<MediaRef> {
        self.media_files
            .iter()
            .map(|name| MediaRef::parse(name))
            .chain(self.video_ids.iter().map(|id| MediaRef::youtube(id)))
            .collect()
    }

    /// Valid schedule entries in file order. Malformed entries are logged
    /// and skipped.
    pub fn schedule_entries(&self) -> Vec<ScheduleEntry> {
        self.schedule
            .iter()
            .enumerate()
            .filter_map(|(index, value)| match self.schedule_entry(value) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    error!("Skipping schedule entry #{}: {}", index + 1, e);
                    None
                }
            })
            .collect()
    }

    fn schedule_entry(&self, value: &toml::Value) -> Result<ScheduleEntry> {
        let raw: RawScheduleEntry = value
            .clone()
            .try_into()
            .map_err(|e| CasterError::Config(format!("malformed entry: {}", e)))?;

        let action = match raw.action.as_deref() {
            Some(action) => action.parse::<Action>()?,
            None => Action::Start,
        };
        let time = ScheduleEntry::parse_time(raw.time.as_deref().unwrap_or("08:00"))?;

        let volume = raw.volume.unwrap_or(self.volume);
        if !(0.0..=1.0).contains(&volume) {
            return Err(CasterError::Config(format!(
                "volume {} is outside 0.0..=1.0",
                volume
            )));
        }

        let media = match (raw.media, raw.video_id) {
            (Some(_), Some(_)) => {
                return Err(CasterError::Config(
                    "give either 'media' or 'video_id', not both".to_string(),
                ))
            }
            (Some(media), None) => Some(MediaRef::parse(&media)),
            (None, Some(id)) => Some(MediaRef::youtube(&id)),
            (None, None) => None,
        };

        let device = raw
            .friendly_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.friendly_name.clone());

        Ok(ScheduleEntry {
            device,
            media,
            time,
            action,
            volume: clamp_volume(volume),
        })
    }
}

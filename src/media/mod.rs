use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use rand::Rng;
use tracing::{debug, info};

use crate::{CasterError, Result};

/// Extensions picked up when scanning the served folder.
pub const DEFAULT_MEDIA_EXTENSIONS: &[&str] = &["mp4", "webm", "mkv", "mov", "avi", "mp3", "wav"];

/// Containers the Default Media Receiver is asked to play directly.
pub const CASTABLE_EXTENSIONS: &[&str] = &["mp4", "webm"];

/// Chromecast app ids.
pub const DEFAULT_MEDIA_RECEIVER_APP: &str = "CC1AD845";
pub const YOUTUBE_APP: &str = "233637DE";

/// Something the receiver can be asked to play.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MediaRef {
    /// A file in the served folder, by basename.
    Local(String),
    /// An absolute http(s) URL, passed to the receiver untouched.
    Url(String),
    /// An item hosted by a streaming app, e.g. a YouTube video id.
    Streaming { app_id: String, item_id: String },
}

impl MediaRef {
    pub fn parse(reference: &str) -> Self {
        let reference = reference.trim();
        let lower = reference.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return MediaRef::Url(reference.to_string());
        }
        if let Some(item_id) = reference.strip_prefix("youtube:") {
            return MediaRef::youtube(item_id);
        }
        MediaRef::Local(reference.to_string())
    }

    pub fn youtube(item_id: &str) -> Self {
        MediaRef::Streaming {
            app_id: YOUTUBE_APP.to_string(),
            item_id: item_id.trim().to_string(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, MediaRef::Local(_))
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaRef::Local(name) => f.write_str(name),
            MediaRef::Url(url) => f.write_str(url),
            MediaRef::Streaming { app_id, item_id } if app_id == YOUTUBE_APP => {
                write!(f, "youtube:{}", item_id)
            }
            MediaRef::Streaming { app_id, item_id } => write!(f, "{}:{}", app_id, item_id),
        }
    }
}

/// Lower-cased extension of a path or URL, ignoring any query or fragment.
pub fn extension_of(reference: &str) -> Option<String> {
    let path = reference.split(['?', '#']).next().unwrap_or(reference);
    let last_segment = path.rsplit('/').next().unwrap_or(path);
    last_segment
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Builds receiver-reachable URLs for files in the served folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUrls {
    host: String,
    port: u16,
}

impl MediaUrls {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `http://<host>:<port>/<basename>`, whatever directories `name` carries.
    pub fn local(&self, name: &str) -> String {
        let basename = Path::new(name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(name);
        format!(
            "http://{}:{}/{}",
            self.host,
            self.port,
            urlencoding::encode(basename)
        )
    }

    /// Absolute URLs pass through; local names are synthesized. Streaming
    /// items have no URL.
    pub fn resolve(&self, reference: &MediaRef) -> Option<String> {
        match reference {
            MediaRef::Url(url) => Some(url.clone()),
            MediaRef::Local(name) => Some(self.local(name)),
            MediaRef::Streaming { .. } => None,
        }
    }
}

/// The address other hosts on the LAN can reach us at. Falls back to
/// loopback when no route is available.
pub fn detect_lan_ip() -> IpAddr {
    let route_ip = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        // No packet is sent; connect only selects the outbound interface.
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip())
    };
    match route_ip() {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) | Err(_) => {
            debug!("Could not detect LAN address, falling back to loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// Known playable references, in insertion order and without duplicates.
#[derive(Debug, Default)]
pub struct MediaCatalog {
    entries: RwLock<Vec<MediaRef>>,
}

impl MediaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_references<I, S>(references: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let catalog = Self::new();
        for reference in references {
            catalog.insert(MediaRef::parse(reference.as_ref()));
        }
        catalog
    }

    /// Appends `reference` unless it is already present. Returns whether it was added.
    pub fn insert(&self, reference: MediaRef) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains(&reference) {
            return false;
        }
        entries.push(reference);
        true
    }

    pub fn contains(&self, reference: &MediaRef) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(reference)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn list(&self) -> Vec<MediaRef> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Uniformly random entry.
    pub fn choose_random(&self) -> Result<MediaRef> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        if entries.is_empty() {
            return Err(CasterError::EmptyCatalog);
        }
        let index = rand::thread_rng().gen_range(0..entries.len());
        Ok(entries[index].clone())
    }

    /// Adds every file directly under `dir` whose extension is in `extensions`.
    /// Files are added in name order; returns how many were new.
    pub fn scan_directory(&self, dir: &Path, extensions: &[String]) -> Result<usize> {
        let allowed: HashSet<String> = extensions.iter().map(|e| e.to_ascii_lowercase()).collect();

        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if extension_of(&name).is_some_and(|ext| allowed.contains(&ext)) {
                names.push(name);
            }
        }
        names.sort();

        let added = names
            .into_iter()
            .filter(|name| self.insert(MediaRef::Local(name.clone())))
            .count();
        info!("Scanned '{}': {} new media file(s)", dir.display(), added);
        Ok(added)
    }
}

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use super::CHROMECAST_SERVICE_TYPE;
use crate::{CasterError, DeviceDescriptor, Result};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Devices seen so far in one scan, keyed by friendly name.
#[derive(Debug, Default)]
pub struct DeviceTable {
    by_name: BTreeMap<String, Advertised>,
    // mDNS removals only carry the service fullname.
    fullnames: HashMap<String, String>,
}

#[derive(Debug)]
struct Advertised {
    fullname: String,
    device: DeviceDescriptor,
}

impl DeviceTable {
    /// Records an advertisement. A repeated name replaces the earlier entry.
    pub fn upsert(&mut self, fullname: &str, device: DeviceDescriptor) {
        if let Some(previous) = self.fullnames.insert(fullname.to_string(), device.name.clone()) {
            // The same service renamed itself; its old name is gone.
            if previous != device.name && self.owned_by(&previous, fullname) {
                self.by_name.remove(&previous);
            }
        }
        self.by_name.insert(
            device.name.clone(),
            Advertised {
                fullname: fullname.to_string(),
                device,
            },
        );
    }

    /// Forgets the service `fullname`. The named entry is only removed while
    /// it still comes from that service; a newer advertisement for the same
    /// name survives the removal of a superseded one.
    pub fn remove_fullname(&mut self, fullname: &str) -> Option<DeviceDescriptor> {
        let name = self.fullnames.remove(fullname)?;
        if !self.owned_by(&name, fullname) {
            return None;
        }
        self.by_name.remove(&name).map(|entry| entry.device)
    }

    fn owned_by(&self, name: &str, fullname: &str) -> bool {
        self.by_name
            .get(name)
            .is_some_and(|entry| entry.fullname == fullname)
    }

    pub fn get(&self, name: &str) -> Option<&DeviceDescriptor> {
        self.by_name.get(name).map(|entry| &entry.device)
    }

    pub fn names(&self) -> Vec<String> {
        self.by_name.keys().cloned().collect()
    }

    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.by_name.values().map(|entry| entry.device.clone()).collect()
    }
}

/// A running network scan that accumulates advertisements into a table.
pub trait DeviceScan {
    /// Moves whatever arrived since the last call into `table`. Must not block.
    fn poll(&mut self, table: &mut DeviceTable);
}

/// Polls `scan` every `interval` until a device named exactly `name` shows up
/// or `timeout` elapses.
pub async fn poll_for_device<S: DeviceScan>(
    scan: &mut S,
    name: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<DeviceDescriptor> {
    let deadline = Instant::now() + timeout;
    let mut table = DeviceTable::default();

    loop {
        scan.poll(&mut table);
        if let Some(device) = table.get(name) {
            return Ok(device.clone());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(CasterError::DiscoveryTimeout {
                name: name.to_string(),
                discovered: table.names(),
                timeout,
            });
        }
        time::sleep(interval.min(deadline - now)).await;
    }
}

/// Polls `scan` for the whole `window` and returns every device seen.
pub async fn collect_devices<S: DeviceScan>(
    scan: &mut S,
    window: Duration,
    interval: Duration,
) -> Vec<DeviceDescriptor> {
    let deadline = Instant::now() + window;
    let mut table = DeviceTable::default();

    loop {
        scan.poll(&mut table);
        let now = Instant::now();
        if now >= deadline {
            return table.devices();
        }
        time::sleep(interval.min(deadline - now)).await;
    }
}

/// An mDNS browse for cast receivers. The daemon is shut down on drop, so
/// every exit path of a discovery releases the listener.
pub struct MdnsScan {
    daemon: ServiceDaemon,
    receiver: mdns_sd::Receiver<ServiceEvent>,
}

impl MdnsScan {
    pub fn start() -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| CasterError::Network(format!("Failed to create mDNS daemon: {}", e)))?;
        let receiver = daemon
            .browse(CHROMECAST_SERVICE_TYPE)
            .map_err(|e| CasterError::Network(format!("Failed to browse for Chromecast: {}", e)))?;
        Ok(Self { daemon, receiver })
    }
}

impl DeviceScan for MdnsScan {
    fn poll(&mut self, table: &mut DeviceTable) {
        while let Ok(event) = self.receiver.try_recv() {
            match event {
                ServiceEvent::ServiceResolved(info) => {
                    if let Some(device) = descriptor_from(&info) {
                        debug!("Discovered Chromecast: {} at {}:{}", device.name, device.address, device.port);
                        table.upsert(info.get_fullname(), device);
                    }
                }
                ServiceEvent::ServiceRemoved(_, fullname) => {
                    if let Some(device) = table.remove_fullname(&fullname) {
                        debug!("Chromecast went away: {}", device.name);
                    }
                }
                _ => {}
            }
        }
    }
}

impl Drop for MdnsScan {
    fn drop(&mut self) {
        let _ = self.daemon.stop_browse(CHROMECAST_SERVICE_TYPE);
        if let Err(e) = self.daemon.shutdown() {
            warn!("Failed to shut down mDNS daemon: {}", e);
        }
    }
}

/// Friendly name comes from the `fn` TXT record; IPv4 addresses are preferred.
fn descriptor_from(info: &ServiceInfo) -> Option<DeviceDescriptor> {
    let addresses = info.get_addresses();
    let address = addresses
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addresses.iter().next())
        .copied()?;

    let name = info
        .get_property_val_str("fn")
        .map(str::to_string)
        .unwrap_or_else(|| {
            info.get_fullname()
                .split('.')
                .next()
                .unwrap_or_default()
                .to_string()
        });

    let mut device = DeviceDescriptor::new(name, address, info.get_port());
    device.model = info.get_property_val_str("md").map(str::to_string);
    device.id = info.get_property_val_str("id").map(str::to_string);
    Some(device)
}

/// Name-based receiver lookup over mDNS.
#[derive(Debug, Clone)]
pub struct MdnsDiscovery {
    poll_interval: Duration,
}

impl Default for MdnsDiscovery {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl MdnsDiscovery {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub async fn resolve(&self, name: &str, timeout: Duration) -> Result<DeviceDescriptor> {
        info!(
            "Discovering Chromecasts (friendly_name='{}') for up to {} seconds...",
            name,
            timeout.as_secs()
        );
        let mut scan = MdnsScan::start()?;
        let result = poll_for_device(&mut scan, name, timeout, self.poll_interval).await;
        drop(scan);

        match &result {
            Ok(device) => info!("Found Chromecast '{}' at {}:{}", device.name, device.address, device.port),
            Err(CasterError::DiscoveryTimeout { discovered, .. }) if discovered.is_empty() => {
                warn!("No Chromecast found with friendly name '{}'. No Chromecasts discovered.", name);
            }
            Err(CasterError::DiscoveryTimeout { discovered, .. }) => {
                warn!(
                    "No Chromecast found with friendly name '{}'. Discovered: {}",
                    name,
                    discovered.join(", ")
                );
            }
            Err(_) => {}
        }
        result
    }

    pub async fn discover_all(&self, window: Duration) -> Result<Vec<DeviceDescriptor>> {
        info!("Browsing for Chromecasts for {} seconds...", window.as_secs());
        let mut scan = MdnsScan::start()?;
        Ok(collect_devices(&mut scan, window, self.poll_interval).await)
    }
}

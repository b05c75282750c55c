//! Device catalog collaborator
//!
//! The catalog owns device records. The lifecycle manager only reads
//! snapshots of them and reports derived online/offline transitions back.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::RwLock;

use crate::error::{Error, Result};

/// Upstream source credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Immutable snapshot of a catalog device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Device identifier
    pub id: String,
    /// Upstream stream URL (typically RTSP)
    pub upstream_url: String,
    /// Upstream credentials, if the source requires them
    pub credentials: Option<Credentials>,
    /// Catalog's own belief about the device
    pub known_online: bool,
}

impl Device {
    pub fn new(id: impl Into<String>, upstream_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            upstream_url: upstream_url.into(),
            credentials: None,
            known_online: true,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn offline(mut self) -> Self {
        self.known_online = false;
        self
    }
}

/// Device catalog interface
pub trait DeviceCatalog: Send + Sync + 'static {
    /// Fetch a device snapshot. Unknown ids yield [`Error::NotFound`].
    fn get_device(&self, device_id: &str) -> impl Future<Output = Result<Device>> + Send;

    /// Report a derived online/offline transition
    fn report_status(&self, device_id: &str, online: bool) -> impl Future<Output = ()> + Send;
}

/// In-memory device catalog
///
/// Suitable for a fixed device list. Reported statuses are kept alongside
/// the devices and reflected in `known_online` on later reads.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    devices: RwLock<HashMap<String, Device>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from a device list
    pub fn with_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        let catalog = Self::new();
        for device in devices {
            catalog.insert(device);
        }
        catalog
    }

    /// Add or replace a device
    pub fn insert(&self, device: Device) {
        let mut devices = self.devices.write().unwrap_or_else(|e| e.into_inner());
        devices.insert(device.id.clone(), device);
    }

    /// Remove a device
    pub fn remove(&self, device_id: &str) -> Option<Device> {
        let mut devices = self.devices.write().unwrap_or_else(|e| e.into_inner());
        devices.remove(device_id)
    }

    /// Current online flag for a device
    pub fn is_online(&self, device_id: &str) -> Option<bool> {
        let devices = self.devices.read().unwrap_or_else(|e| e.into_inner());
        devices.get(device_id).map(|d| d.known_online)
    }
}

impl DeviceCatalog for MemoryCatalog {
    async fn get_device(&self, device_id: &str) -> Result<Device> {
        let devices = self.devices.read().unwrap_or_else(|e| e.into_inner());
        devices
            .get(device_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(device_id.to_string()))
    }

    async fn report_status(&self, device_id: &str, online: bool) {
        let mut devices = self.devices.write().unwrap_or_else(|e| e.into_inner());
        match devices.get_mut(device_id) {
            Some(device) => device.known_online = online,
            None => tracing::debug!(device = device_id, "Status report for unknown device"),
        }
    }
}

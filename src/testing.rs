//! Scriptable collaborators for unit tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::catalog::{Device, DeviceCatalog, MemoryCatalog};
use crate::error::{Error, Result};
use crate::probe::UpstreamProbe;
use crate::relay::{EndpointId, EndpointState, RelayAccess, RelayClient, RelayError};

/// In-memory relay that records every call
pub(crate) struct FakeRelay {
    next_id: AtomicU64,
    creates: AtomicUsize,
    destroyed: Mutex<Vec<EndpointId>>,
    dead: Mutex<HashSet<EndpointId>>,
    create_delay: Mutex<Duration>,
    fail_creates: AtomicBool,
    hang_creates: AtomicBool,
    fail_queries: AtomicBool,
}

impl FakeRelay {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            creates: AtomicUsize::new(0),
            destroyed: Mutex::new(Vec::new()),
            dead: Mutex::new(HashSet::new()),
            create_delay: Mutex::new(Duration::ZERO),
            fail_creates: AtomicBool::new(false),
            hang_creates: AtomicBool::new(false),
            fail_queries: AtomicBool::new(false),
        }
    }

    pub(crate) fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub(crate) fn destroyed(&self) -> Vec<EndpointId> {
        self.destroyed.lock().unwrap().clone()
    }

    pub(crate) fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = delay;
    }

    pub(crate) fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn hang_creates(&self, hang: bool) {
        self.hang_creates.store(hang, Ordering::SeqCst);
    }

    pub(crate) fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Make the relay report an endpoint as not alive
    pub(crate) fn kill(&self, endpoint: EndpointId) {
        self.dead.lock().unwrap().insert(endpoint);
    }
}

impl RelayClient for FakeRelay {
    async fn create_endpoint(&self, _device: &Device) -> std::result::Result<EndpointId, RelayError> {
        let delay = *self.create_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.hang_creates.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(RelayError::Rejected {
                code: 456,
                reason: "Can't connect to RTSP server".into(),
            });
        }

        Ok(EndpointId(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn destroy_endpoint(&self, endpoint: EndpointId) -> std::result::Result<(), RelayError> {
        self.destroyed.lock().unwrap().push(endpoint);
        Ok(())
    }

    async fn query_endpoint_state(
        &self,
        endpoint: EndpointId,
    ) -> std::result::Result<EndpointState, RelayError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(RelayError::Status(503, "unavailable".into()));
        }
        if self.dead.lock().unwrap().contains(&endpoint) {
            return Ok(EndpointState::dead("no media"));
        }
        Ok(EndpointState::alive("ok"))
    }

    fn access(&self) -> RelayAccess {
        crate::relay::JanusConfig::default().access()
    }
}

/// Catalog that records every status report
pub(crate) struct FakeCatalog {
    inner: MemoryCatalog,
    reports: Mutex<Vec<(String, bool)>>,
}

impl FakeCatalog {
    pub(crate) fn with_devices<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            inner: MemoryCatalog::with_devices(
                ids.into_iter()
                    .map(|id| Device::new(id, format!("rtsp://{}.local/stream", id))),
            ),
            reports: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn reports(&self) -> Vec<(String, bool)> {
        self.reports.lock().unwrap().clone()
    }

    /// Online flag as last stored in the catalog
    pub(crate) fn known_online(&self, device_id: &str) -> Option<bool> {
        self.inner.is_online(device_id)
    }
}

impl DeviceCatalog for FakeCatalog {
    async fn get_device(&self, device_id: &str) -> Result<Device> {
        self.inner.get_device(device_id).await
    }

    async fn report_status(&self, device_id: &str, online: bool) {
        self.reports
            .lock()
            .unwrap()
            .push((device_id.to_string(), online));
        self.inner.report_status(device_id, online).await;
    }
}

/// Probe whose answer is set per device
#[derive(Default)]
pub(crate) struct FakeProbe {
    unreachable: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    probes: AtomicUsize,
}

impl FakeProbe {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_reachable(&self, device_id: &str, reachable: bool) {
        let mut unreachable = self.unreachable.lock().unwrap();
        if reachable {
            unreachable.remove(device_id);
        } else {
            unreachable.insert(device_id.to_string());
        }
    }

    pub(crate) fn hang(&self, device_id: &str) {
        self.hanging.lock().unwrap().insert(device_id.to_string());
    }

    pub(crate) fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

impl UpstreamProbe for FakeProbe {
    async fn probe(&self, device: &Device) -> Result<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);

        let hanging = self.hanging.lock().unwrap().contains(&device.id);
        if hanging {
            std::future::pending::<()>().await;
        }

        let unreachable = self.unreachable.lock().unwrap().contains(&device.id);
        if unreachable {
            return Err(Error::unreachable(&device.id, "connection refused"));
        }
        Ok(())
    }
}

//! Lifecycle API
//!
//! [`StreamManager`] is the only surface the rest of an application uses.
//! It composes the registry, provisioner, subscription tracker and health
//! monitor, and always takes the device's lock before touching its record.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::catalog::DeviceCatalog;
use crate::config::ManagerConfig;
use crate::error::Result;
use crate::health::HealthMonitor;
use crate::probe::{TcpProbe, UpstreamProbe};
use crate::provision::Provisioner;
use crate::registry::{HealthSnapshot, Registry, SubscriptionId};
use crate::relay::{EndpointId, RelayAccess, RelayClient};
use crate::subscription::SubscriptionTracker;

/// What a viewer needs to start watching a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub device_id: String,
    pub endpoint_id: EndpointId,
    pub subscription_id: SubscriptionId,
    pub relay: RelayAccess,
}

/// State shared by the API and the monitor
pub(crate) struct Inner<R, C, P> {
    pub(crate) registry: Registry,
    pub(crate) relay: Arc<R>,
    pub(crate) catalog: C,
    pub(crate) probe: P,
    pub(crate) config: ManagerConfig,
    pub(crate) tracker: SubscriptionTracker,
}

impl<R: RelayClient, C: DeviceCatalog, P> Inner<R, C, P> {
    pub(crate) fn provisioner(&self) -> Provisioner<'_, R, C> {
        Provisioner::new(&self.registry, &self.relay, &self.catalog, &self.config)
    }
}

/// Stream lifecycle manager
///
/// Cheap to clone; all clones share one registry.
pub struct StreamManager<R, C, P = TcpProbe> {
    inner: Arc<Inner<R, C, P>>,
}

impl<R, C, P> Clone for StreamManager<R, C, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R, C, P> StreamManager<R, C, P>
where
    R: RelayClient,
    C: DeviceCatalog,
    P: UpstreamProbe,
{
    /// Create a manager over the given collaborators
    pub fn new(relay: R, catalog: C, probe: P, config: ManagerConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(Inner {
                registry: Registry::new(),
                relay: Arc::new(relay),
                catalog,
                probe,
                tracker: SubscriptionTracker::new(config.grace_period),
                config,
            }),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Get the relay client
    pub fn relay(&self) -> &R {
        &self.inner.relay
    }

    /// Get the device catalog
    pub fn catalog(&self) -> &C {
        &self.inner.catalog
    }

    /// Get the upstream probe
    pub fn probe(&self) -> &P {
        &self.inner.probe
    }

    /// Subscribe to a device, provisioning its endpoint if needed
    ///
    /// Concurrent calls for the same device share a single relay create.
    /// Fails with `NotFound` for devices the catalog does not know and with
    /// `ProvisioningFailed` when the relay cannot create the endpoint.
    pub async fn acquire(&self, device_id: &str) -> Result<(ConnectionInfo, SubscriptionId)> {
        // Held across ensure and attach so teardown cannot slip in between
        let mut record = self.inner.registry.lock_or_insert(device_id).await;

        let endpoint_id = self.inner.provisioner().ensure(&mut record).await?;
        let subscription_id = self.inner.tracker.attach(&mut record)?;

        tracing::info!(
            device = %device_id,
            endpoint = %endpoint_id,
            subscription = %subscription_id,
            subscribers = record.subscriber_count(),
            "Subscriber attached"
        );

        let info = ConnectionInfo {
            device_id: device_id.to_string(),
            endpoint_id,
            subscription_id,
            relay: self.inner.relay.access(),
        };
        Ok((info, subscription_id))
    }

    /// Drop a subscription
    ///
    /// Idempotent: unknown subscriptions and devices are logged and ignored.
    pub async fn release(&self, device_id: &str, subscription_id: SubscriptionId) -> Result<()> {
        let Some(mut record) = self.inner.registry.lock_existing(device_id).await else {
            tracing::warn!(
                device = %device_id,
                subscription = %subscription_id,
                "Release for device without a mountpoint ignored"
            );
            return Ok(());
        };

        match self.inner.tracker.detach(&mut record, subscription_id) {
            Ok(0) => {
                tracing::info!(
                    device = %device_id,
                    grace_ms = self.inner.tracker.grace_period().as_millis() as u64,
                    "Last subscriber left, teardown scheduled"
                );
            }
            Ok(remaining) => {
                tracing::debug!(device = %device_id, subscribers = remaining, "Subscriber detached");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Release ignored");
            }
        }

        Ok(())
    }

    /// Snapshot of one device's mountpoint
    ///
    /// Known devices without a mountpoint report `ABSENT`.
    pub async fn status(&self, device_id: &str) -> Result<HealthSnapshot> {
        if let Some(record) = self.inner.registry.lock_existing(device_id).await {
            return Ok(record.snapshot());
        }

        self.inner.catalog.get_device(device_id).await?;
        Ok(HealthSnapshot::absent(device_id))
    }

    /// Snapshots of every mountpoint that is not `ABSENT`, sorted by device
    pub async fn list_active(&self) -> Vec<HealthSnapshot> {
        self.inner.registry.snapshots().await
    }

    /// Health monitor bound to this manager
    pub fn monitor(&self) -> HealthMonitor<R, C, P> {
        HealthMonitor::new(Arc::clone(&self.inner))
    }

    /// Run a single monitor tick
    pub async fn sweep_once(&self) {
        self.monitor().sweep().await;
    }

    /// Spawn the health monitor as a background task
    pub fn spawn_monitor(&self) -> MonitorHandle {
        let token = CancellationToken::new();
        let handle = tokio::spawn(self.monitor().run(token.clone()));

        MonitorHandle { token, handle }
    }

    /// Run the health monitor until `shutdown` completes
    pub async fn run_monitor_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let monitor = self.spawn_monitor();
        shutdown.await;
        tracing::info!("Shutdown signal received");
        monitor.shutdown().await;
    }
}

/// Handle to a spawned health monitor
#[derive(Debug)]
pub struct MonitorHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl MonitorHandle {
    /// Ask the monitor to stop after its current sweep
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Stop the monitor and wait for it to exit
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Health monitor task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use tokio_test::assert_ok;

    use super::*;
    use crate::error::Error;
    use crate::health::BackoffPolicy;
    use crate::registry::MountState;
    use crate::testing::{FakeCatalog, FakeProbe, FakeRelay};

    type TestManager = StreamManager<FakeRelay, FakeCatalog, FakeProbe>;

    fn manager(config: ManagerConfig) -> TestManager {
        StreamManager::new(
            FakeRelay::new(),
            FakeCatalog::with_devices(["cam-1", "cam-2"]),
            FakeProbe::new(),
            config,
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = StreamManager::new(
            FakeRelay::new(),
            FakeCatalog::with_devices(["cam-1"]),
            FakeProbe::new(),
            ManagerConfig::default().max_consecutive_failures(0),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_acquire_provisions_and_attaches() {
        let manager = manager(ManagerConfig::default());

        let (info, sub) = manager.acquire("cam-1").await.unwrap();
        assert_eq!(info.device_id, "cam-1");
        assert_eq!(info.subscription_id, sub);
        assert_eq!(info.relay.plugin, "janus.plugin.streaming");

        let snap = manager.status("cam-1").await.unwrap();
        assert_eq!(snap.state, MountState::Active);
        assert_eq!(snap.subscriber_count, 1);
        assert_eq!(snap.endpoint_id, Some(info.endpoint_id));
    }

    #[tokio::test]
    async fn test_connection_info_json() {
        let manager = manager(ManagerConfig::default());
        let (info, sub) = manager.acquire("cam-1").await.unwrap();

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["device_id"], "cam-1");
        assert_eq!(json["endpoint_id"], info.endpoint_id.0);
        assert_eq!(json["subscription_id"], sub.to_string());
        assert_eq!(json["relay"]["connection_timeout_ms"], 30000);
    }

    #[tokio::test]
    async fn test_acquire_unknown_device() {
        let manager = manager(ManagerConfig::default());

        let err = manager.acquire("cam-9").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(manager.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn test_acquire_failure_is_not_sticky() {
        let manager = manager(ManagerConfig::default());
        manager.relay().fail_creates(true);

        let err = manager.acquire("cam-1").await.unwrap_err();
        assert!(matches!(err, Error::ProvisioningFailed { .. }));
        assert_eq!(manager.status("cam-1").await.unwrap().state, MountState::Absent);

        manager.relay().fail_creates(false);
        assert_ok!(manager.acquire("cam-1").await);
        assert_eq!(manager.relay().create_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquires_share_one_create() {
        let manager = manager(ManagerConfig::default());
        manager.relay().set_create_delay(Duration::from_millis(100));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.acquire("cam-1").await })
            })
            .collect();

        let mut endpoints = HashSet::new();
        let mut subscriptions = HashSet::new();
        for handle in handles {
            let (info, sub) = handle.await.unwrap().unwrap();
            endpoints.insert(info.endpoint_id);
            subscriptions.insert(sub);
        }

        assert_eq!(manager.relay().create_count(), 1);
        assert_eq!(endpoints.len(), 1);
        assert_eq!(subscriptions.len(), 10);
        assert_eq!(manager.status("cam-1").await.unwrap().subscriber_count, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_simultaneous_acquires() {
        let manager = manager(ManagerConfig::default());
        manager.relay().set_create_delay(Duration::from_millis(50));

        let (a, b) = tokio::join!(manager.acquire("cam-2"), manager.acquire("cam-2"));
        let (a, _) = a.unwrap();
        let (b, _) = b.unwrap();

        assert_eq!(manager.relay().create_count(), 1);
        assert_eq!(a.endpoint_id, b.endpoint_id);
        assert_eq!(manager.status("cam-2").await.unwrap().subscriber_count, 2);
    }

    #[tokio::test]
    async fn test_refcount_tracks_valid_releases() {
        let manager = manager(ManagerConfig::default());

        let (_, a) = manager.acquire("cam-1").await.unwrap();
        let (_, b) = manager.acquire("cam-1").await.unwrap();
        let (_, _c) = manager.acquire("cam-1").await.unwrap();

        assert_ok!(manager.release("cam-1", a).await);
        // Double release and a foreign id are ignored
        assert_ok!(manager.release("cam-1", a).await);
        assert_ok!(manager.release("cam-2", b).await);
        assert_eq!(manager.status("cam-1").await.unwrap().subscriber_count, 2);

        assert_ok!(manager.release("cam-1", b).await);
        let snap = manager.status("cam-1").await.unwrap();
        assert_eq!(snap.subscriber_count, 1);
        assert!(snap.teardown_in.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reacquire_within_grace_reuses_endpoint() {
        let manager = manager(ManagerConfig::default());

        let (first, sub) = manager.acquire("cam-1").await.unwrap();
        manager.release("cam-1", sub).await.unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        manager.sweep_once().await;

        let (second, _) = manager.acquire("cam-1").await.unwrap();
        assert_eq!(first.endpoint_id, second.endpoint_id);

        tokio::time::advance(Duration::from_secs(60)).await;
        manager.sweep_once().await;

        assert!(manager.relay().destroyed().is_empty());
        assert_eq!(manager.relay().create_count(), 1);
        let snap = manager.status("cam-1").await.unwrap();
        assert_eq!(snap.state, MountState::Active);
        assert!(snap.teardown_in.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_mountpoint_torn_down_once() {
        let manager = manager(ManagerConfig::default());

        let (info, sub) = manager.acquire("cam-1").await.unwrap();
        manager.release("cam-1", sub).await.unwrap();

        tokio::time::advance(Duration::from_secs(29)).await;
        manager.sweep_once().await;
        assert_eq!(manager.list_active().await.len(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        manager.sweep_once().await;
        assert!(manager.list_active().await.is_empty());
        assert_eq!(manager.relay().destroyed(), vec![info.endpoint_id]);

        manager.sweep_once().await;
        assert_eq!(manager.relay().destroyed().len(), 1);
        assert_eq!(manager.status("cam-1").await.unwrap().state, MountState::Absent);

        // A later acquire starts from scratch
        let (again, _) = manager.acquire("cam-1").await.unwrap();
        assert_ne!(again.endpoint_id, info.endpoint_id);
        assert_eq!(manager.relay().create_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_revives_failed_device() {
        let manager = manager(ManagerConfig::default().max_consecutive_failures(2));

        let (first, _) = manager.acquire("cam-1").await.unwrap();
        manager.probe().set_reachable("cam-1", false);
        manager.sweep_once().await;
        manager.sweep_once().await;
        assert_eq!(manager.status("cam-1").await.unwrap().state, MountState::Failed);

        // A failed re-provision keeps the record and its subscriber
        manager.relay().fail_creates(true);
        assert!(manager.acquire("cam-1").await.is_err());
        let snap = manager.status("cam-1").await.unwrap();
        assert_eq!(snap.state, MountState::Failed);
        assert_eq!(snap.subscriber_count, 1);

        manager.relay().fail_creates(false);
        let (second, _) = manager.acquire("cam-1").await.unwrap();
        assert_ne!(first.endpoint_id, second.endpoint_id);

        let snap = manager.status("cam-1").await.unwrap();
        assert_eq!(snap.state, MountState::Active);
        assert_eq!(snap.subscriber_count, 2);
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(
            manager.catalog().reports(),
            vec![("cam-1".to_string(), false), ("cam-1".to_string(), true)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_online_report_survives_idle_teardown() {
        let manager = manager(ManagerConfig::default().max_consecutive_failures(2));

        let (_, sub) = manager.acquire("cam-1").await.unwrap();
        manager.probe().set_reachable("cam-1", false);
        manager.sweep_once().await;
        manager.sweep_once().await;
        assert_eq!(manager.status("cam-1").await.unwrap().state, MountState::Failed);

        manager.release("cam-1", sub).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        manager.sweep_once().await;
        assert_eq!(manager.status("cam-1").await.unwrap().state, MountState::Absent);

        manager.probe().set_reachable("cam-1", true);
        manager.acquire("cam-1").await.unwrap();
        assert_eq!(manager.status("cam-1").await.unwrap().state, MountState::Active);
        assert_eq!(
            manager.catalog().reports(),
            vec![("cam-1".to_string(), false), ("cam-1".to_string(), true)]
        );
        assert_eq!(manager.catalog().known_online("cam-1"), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_during_recovery_keeps_retry_budget() {
        let config = ManagerConfig::default().backoff(BackoffPolicy::fixed(
            Duration::from_secs(1),
            Duration::from_secs(8),
        ));
        let manager = manager(config);

        let (info, _) = manager.acquire("cam-1").await.unwrap();
        manager.relay().kill(info.endpoint_id);
        manager.sweep_once().await;
        manager.sweep_once().await;
        assert_eq!(manager.status("cam-1").await.unwrap().state, MountState::Recovering);

        // Recovery destroys the old endpoint, then the create fails
        manager.relay().fail_creates(true);
        tokio::time::advance(Duration::from_secs(1)).await;
        manager.sweep_once().await;
        let snap = manager.status("cam-1").await.unwrap();
        assert_eq!(snap.state, MountState::Recovering);
        assert_eq!(snap.consecutive_failures, 3);
        assert_eq!(snap.endpoint_id, None);

        let err = manager.acquire("cam-1").await.unwrap_err();
        assert!(matches!(err, Error::ProvisioningFailed { .. }));

        let snap = manager.status("cam-1").await.unwrap();
        assert_eq!(snap.state, MountState::Recovering);
        assert_eq!(snap.consecutive_failures, 3);
        assert_eq!(snap.subscriber_count, 1);
        assert!(manager.catalog().reports().is_empty());

        // The monitor finishes the repair on its own schedule
        manager.relay().fail_creates(false);
        tokio::time::advance(Duration::from_secs(2)).await;
        manager.sweep_once().await;
        let snap = manager.status("cam-1").await.unwrap();
        assert_eq!(snap.state, MountState::Active);
        assert_eq!(snap.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_status_of_unknown_and_idle_devices() {
        let manager = manager(ManagerConfig::default());

        let snap = manager.status("cam-2").await.unwrap();
        assert_eq!(snap.state, MountState::Absent);
        assert_eq!(snap.subscriber_count, 0);

        let err = manager.status("cam-9").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_active_sorted() {
        let manager = manager(ManagerConfig::default());
        manager.acquire("cam-2").await.unwrap();
        manager.acquire("cam-1").await.unwrap();

        let ids: Vec<_> = manager
            .list_active()
            .await
            .into_iter()
            .map(|s| s.device_id)
            .collect();
        assert_eq!(ids, vec!["cam-1", "cam-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_monitor_shutdown() {
        let manager = manager(ManagerConfig::default());
        manager.acquire("cam-1").await.unwrap();

        let monitor = manager.spawn_monitor();
        tokio::time::sleep(Duration::from_secs(15)).await;
        monitor.shutdown().await;

        let probes = manager.probe().probe_count();
        assert!(probes >= 2, "probes = {}", probes);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(manager.probe().probe_count(), probes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_monitor_until_tears_down_idle() {
        let manager = manager(ManagerConfig::default());
        let (_, sub) = manager.acquire("cam-1").await.unwrap();
        manager.release("cam-1", sub).await.unwrap();

        manager
            .run_monitor_until(tokio::time::sleep(Duration::from_secs(45)))
            .await;

        assert!(manager.list_active().await.is_empty());
        assert_eq!(manager.relay().destroyed().len(), 1);
    }
}

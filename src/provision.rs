//! Endpoint provisioning
//!
//! All provisioning runs with the device's record locked, which is what
//! collapses concurrent `acquire` calls into a single relay create: the
//! first caller creates the endpoint, everyone queued behind it takes the
//! fast path.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::catalog::{Device, DeviceCatalog};
use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::registry::{MountState, MountpointRecord, RecordGuard, Registry};
use crate::relay::{EndpointId, RelayClient, RelayError};

/// Creates, recreates and destroys relay endpoints for locked records
pub struct Provisioner<'a, R, C> {
    registry: &'a Registry,
    relay: &'a Arc<R>,
    catalog: &'a C,
    relay_timeout: Duration,
}

impl<'a, R: RelayClient, C: DeviceCatalog> Provisioner<'a, R, C> {
    pub fn new(
        registry: &'a Registry,
        relay: &'a Arc<R>,
        catalog: &'a C,
        config: &ManagerConfig,
    ) -> Self {
        Self {
            registry,
            relay,
            catalog,
            relay_timeout: config.relay_timeout,
        }
    }

    /// Ensure the locked record has a live endpoint
    ///
    /// Records that already have an endpoint are returned as-is. `Absent`
    /// and `Failed` records get a fresh endpoint. A failed attempt on a
    /// record the monitor is still repairing leaves its state alone; any
    /// other failure without subscribers removes the record, so the next
    /// call starts from scratch.
    pub async fn ensure(&self, record: &mut RecordGuard) -> Result<EndpointId> {
        if record.state.has_endpoint() {
            if let Some(endpoint) = record.endpoint_id {
                return Ok(endpoint);
            }
        }

        match self.provision(record).await {
            Ok(endpoint) => Ok(endpoint),
            Err(e) => {
                if record.state == MountState::Failed && record.subscriber_count() == 0 {
                    self.teardown(record).await;
                    self.registry.retire(record).await;
                }
                Err(e)
            }
        }
    }

    async fn provision(&self, record: &mut MountpointRecord) -> Result<EndpointId> {
        let from = record.state;
        let device = self.catalog.get_device(&record.device_id).await?;

        if !device.known_online {
            tracing::debug!(device = %device.id, "Catalog reports device offline, provisioning anyway");
        }

        record.transition(MountState::Provisioning);

        match self.recreate(record, &device).await {
            Ok(endpoint) => {
                record.reset_failures();
                record.device = Some(device);
                record.transition(MountState::Active);

                if self.registry.clear_offline(&record.device_id) {
                    self.catalog.report_status(&record.device_id, true).await;
                }

                Ok(endpoint)
            }
            Err(e) => {
                record.last_error = Some(e.to_string());

                // The monitor owns the failure budget of a record it is repairing
                if from.has_endpoint() {
                    record.transition(from);
                } else {
                    record.transition(MountState::Failed);
                }
                Err(e)
            }
        }
    }

    /// Replace the record's endpoint: destroy the old one, create a new one
    ///
    /// Does not change the record's state; callers drive the state machine.
    pub async fn recreate(&self, record: &mut MountpointRecord, device: &Device) -> Result<EndpointId> {
        if let Some(stale) = record.endpoint_id.take() {
            if let Err(e) = self.destroy(stale).await {
                tracing::warn!(
                    device = %record.device_id,
                    endpoint = %stale,
                    error = %e,
                    "Failed to destroy stale endpoint"
                );
            }
        }

        let endpoint = self.create(device).await?;
        record.endpoint_id = Some(endpoint);

        tracing::info!(device = %device.id, endpoint = %endpoint, "Relay endpoint created");
        Ok(endpoint)
    }

    /// Destroy the record's endpoint, if any
    ///
    /// Best effort: a destroy failure is logged and the endpoint is forgotten.
    pub async fn teardown(&self, record: &mut MountpointRecord) {
        let Some(endpoint) = record.endpoint_id.take() else {
            return;
        };

        match self.destroy(endpoint).await {
            Ok(()) => {
                tracing::info!(device = %record.device_id, endpoint = %endpoint, "Relay endpoint destroyed");
            }
            Err(e) => {
                tracing::warn!(
                    device = %record.device_id,
                    endpoint = %endpoint,
                    error = %e,
                    "Failed to destroy relay endpoint"
                );
            }
        }
    }

    /// Create an endpoint, bounded by the relay timeout
    ///
    /// The relay call runs in its own task. If it outlives the timeout, the
    /// task is left to finish and whatever endpoint it returns is destroyed.
    async fn create(&self, device: &Device) -> Result<EndpointId> {
        let relay = Arc::clone(self.relay);
        let snapshot = device.clone();
        let mut task = tokio::spawn(async move { relay.create_endpoint(&snapshot).await });

        match timeout(self.relay_timeout, &mut task).await {
            Ok(Ok(Ok(endpoint))) => Ok(endpoint),
            Ok(Ok(Err(e))) => Err(Error::provisioning(&device.id, e)),
            Ok(Err(e)) => Err(Error::provisioning(&device.id, e)),
            Err(_) => {
                self.reap_late_create(&device.id, task);
                Err(Error::provisioning(
                    &device.id,
                    Error::Timeout {
                        operation: "create endpoint",
                        after: self.relay_timeout,
                    },
                ))
            }
        }
    }

    fn reap_late_create(
        &self,
        device_id: &str,
        task: JoinHandle<std::result::Result<EndpointId, RelayError>>,
    ) {
        let relay = Arc::clone(self.relay);
        let device_id = device_id.to_string();
        let limit = self.relay_timeout;

        tokio::spawn(async move {
            let Ok(Ok(endpoint)) = task.await else {
                return;
            };

            match timeout(limit, relay.destroy_endpoint(endpoint)).await {
                Ok(Ok(())) => {
                    tracing::info!(device = %device_id, endpoint = %endpoint, "Late relay endpoint destroyed");
                }
                Ok(Err(e)) => {
                    tracing::warn!(device = %device_id, endpoint = %endpoint, error = %e, "Failed to destroy late relay endpoint");
                }
                Err(_) => {
                    tracing::warn!(device = %device_id, endpoint = %endpoint, "Timed out destroying late relay endpoint");
                }
            }
        });
    }

    async fn destroy(&self, endpoint: EndpointId) -> Result<()> {
        match timeout(self.relay_timeout, self.relay.destroy_endpoint(endpoint)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Timeout {
                operation: "destroy endpoint",
                after: self.relay_timeout,
            }),
        }
    }
}

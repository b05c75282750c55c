//! Health monitor loop and per-device state machine

use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::catalog::{Device, DeviceCatalog};
use crate::error::{Error, Result};
use crate::manager::Inner;
use crate::probe::UpstreamProbe;
use crate::registry::{MountState, MountpointRecord, RecordGuard};
use crate::relay::{EndpointId, RelayClient};

/// Background health monitor
///
/// Cheap to clone; clones share the probe pool.
pub struct HealthMonitor<R, C, P> {
    inner: Arc<Inner<R, C, P>>,
    checks: Arc<Semaphore>,
}

impl<R, C, P> Clone for HealthMonitor<R, C, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            checks: Arc::clone(&self.checks),
        }
    }
}

impl<R, C, P> HealthMonitor<R, C, P>
where
    R: RelayClient,
    C: DeviceCatalog,
    P: UpstreamProbe,
{
    pub(crate) fn new(inner: Arc<Inner<R, C, P>>) -> Self {
        let checks = Arc::new(Semaphore::new(inner.config.max_concurrent_checks));
        Self { inner, checks }
    }

    /// Run until the token is cancelled
    ///
    /// A sweep in progress when the token fires runs to completion.
    pub async fn run(self, token: CancellationToken) {
        let period = self.inner.config.health_interval;
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_ms = period.as_millis() as u64, "Health monitor started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.sweep().await,
            }
        }

        tracing::info!("Health monitor stopped");
    }

    /// Run one monitor tick over every record in the registry
    pub async fn sweep(&self) {
        let slots = self.inner.registry.slots().await;
        tracing::debug!(records = slots.len(), "Health sweep");

        let mut tasks = JoinSet::new();
        for (_, slot) in slots {
            let Ok(permit) = Arc::clone(&self.checks).acquire_owned().await else {
                break;
            };
            let monitor = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                monitor.tend(slot).await;
            });
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Health task failed");
            }
        }
    }

    async fn tend(&self, slot: Arc<Mutex<MountpointRecord>>) {
        let mut record = Arc::clone(&slot).lock_owned().await;
        if record.retired {
            return;
        }

        if self.inner.tracker.teardown_due(&record, Instant::now()) {
            self.inner.provisioner().teardown(&mut record).await;
            self.inner.registry.retire(&mut record).await;
            tracing::info!(device = %record.device_id, "Idle mountpoint torn down");
            return;
        }

        match record.state {
            MountState::Active | MountState::Degraded => {
                let (Some(endpoint), Some(device)) = (record.endpoint_id, record.device.clone())
                else {
                    return;
                };

                // Probes run without the lock so acquire/release stay responsive
                drop(record);
                let outcome = self.check(endpoint, &device).await;
                let mut record = slot.lock_owned().await;

                let unchanged = !record.retired
                    && record.endpoint_id == Some(endpoint)
                    && matches!(record.state, MountState::Active | MountState::Degraded);
                if !unchanged {
                    tracing::debug!(device = %device.id, "Record changed during check, result dropped");
                    return;
                }

                match outcome {
                    Ok(()) => self.record_success(&mut record),
                    Err(e) => self.record_failure(&mut record, e).await,
                }
            }
            MountState::Recovering => {
                if record
                    .next_retry_at
                    .is_some_and(|at| Instant::now() < at)
                {
                    return;
                }
                self.recover(&mut record).await;
            }
            MountState::Absent | MountState::Provisioning | MountState::Failed => {}
        }
    }

    /// Health check: relay state and upstream reachability, run concurrently
    async fn check(&self, endpoint: EndpointId, device: &Device) -> Result<()> {
        let (relay, upstream) = tokio::join!(
            self.query_endpoint(endpoint, device),
            self.probe_upstream(device)
        );
        relay.and(upstream)
    }

    async fn query_endpoint(&self, endpoint: EndpointId, device: &Device) -> Result<()> {
        let limit = self.inner.config.probe_timeout;

        match timeout(limit, self.inner.relay.query_endpoint_state(endpoint)).await {
            Ok(Ok(state)) if state.alive => Ok(()),
            Ok(Ok(state)) => Err(Error::unreachable(
                &device.id,
                format!("endpoint {} not alive: {}", endpoint, state.detail),
            )),
            Ok(Err(e)) => Err(Error::unreachable(&device.id, e)),
            Err(_) => Err(Error::unreachable(
                &device.id,
                Error::Timeout {
                    operation: "query endpoint",
                    after: limit,
                },
            )),
        }
    }

    async fn probe_upstream(&self, device: &Device) -> Result<()> {
        let limit = self.inner.config.probe_timeout;

        match timeout(limit, self.inner.probe.probe(device)).await {
            Ok(result) => result,
            Err(_) => Err(Error::unreachable(
                &device.id,
                Error::Timeout {
                    operation: "upstream probe",
                    after: limit,
                },
            )),
        }
    }

    /// One recovery attempt under the device lock
    async fn recover(&self, record: &mut RecordGuard) {
        let device = match self.inner.catalog.get_device(&record.device_id).await {
            Ok(device) => device,
            Err(e) => return self.record_failure(record, e).await,
        };

        // No relay churn while the source is down
        if let Err(e) = self.probe_upstream(&device).await {
            return self.record_failure(record, e).await;
        }

        match self.inner.provisioner().recreate(record, &device).await {
            Ok(_) => {
                record.reset_failures();
                record.device = Some(device);
                record.transition(MountState::Active);
            }
            Err(e) => self.record_failure(record, e).await,
        }
    }

    fn record_success(&self, record: &mut MountpointRecord) {
        if record.consecutive_failures > 0 {
            tracing::debug!(device = %record.device_id, "Health check passed");
        }
        record.reset_failures();
        record.transition(MountState::Active);
    }

    async fn record_failure(&self, record: &mut MountpointRecord, error: Error) {
        let config = &self.inner.config;

        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        record.last_error = Some(error.to_string());
        let failures = record.consecutive_failures;

        if failures >= config.max_consecutive_failures {
            let permanent = Error::PermanentFailure {
                device_id: record.device_id.clone(),
                failures,
            };
            record.last_error = Some(format!("{}: {}", permanent, error));
            record.next_retry_at = None;
            record.transition(MountState::Failed);

            if self.inner.registry.mark_offline(&record.device_id) {
                self.inner
                    .catalog
                    .report_status(&record.device_id, false)
                    .await;
            }
            return;
        }

        match record.state {
            MountState::Active => {
                record.transition(MountState::Degraded);
            }
            MountState::Degraded | MountState::Recovering => {
                let delay = config.backoff.next_delay(failures.saturating_sub(2));
                record.next_retry_at = Some(Instant::now() + delay);
                record.transition(MountState::Recovering);

                tracing::debug!(
                    device = %record.device_id,
                    failures = failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "Recovery scheduled"
                );
            }
            _ => {}
        }
    }
}

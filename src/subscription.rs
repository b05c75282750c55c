//! Subscription tracking
//!
//! Counts viewers per mountpoint and arms the teardown timer when the last
//! one leaves. The timer itself is enforced by the health monitor's sweep.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::registry::{MountpointRecord, SubscriptionId};

/// Attaches and detaches subscriptions on a locked record
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionTracker {
    grace_period: Duration,
}

impl SubscriptionTracker {
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    /// Get the teardown grace period
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Register a subscriber on a mountpoint that already has an endpoint
    ///
    /// Cancels any pending teardown.
    pub fn attach(&self, record: &mut MountpointRecord) -> Result<SubscriptionId> {
        if !record.state.has_endpoint() {
            return Err(Error::provisioning(
                &record.device_id,
                format!("mountpoint not live (state {})", record.state),
            ));
        }

        let id = record.add_subscription();
        if record.teardown_deadline.take().is_some() {
            tracing::debug!(device = %record.device_id, "Pending teardown cancelled");
        }

        Ok(id)
    }

    /// Remove a subscriber, returning the remaining count
    ///
    /// Arms the teardown deadline when the count reaches zero.
    pub fn detach(&self, record: &mut MountpointRecord, id: SubscriptionId) -> Result<u32> {
        let Some(subscription) = record.remove_subscription(&id) else {
            return Err(Error::InvalidSubscription {
                device_id: record.device_id.clone(),
                subscription: id.to_string(),
            });
        };

        tracing::debug!(
            device = %subscription.device_id,
            subscription = %subscription.id,
            held_ms = subscription.created_at.elapsed().as_millis() as u64,
            "Subscription released"
        );

        let remaining = record.subscriber_count();
        if remaining == 0 {
            record.teardown_deadline = Some(Instant::now() + self.grace_period);
        }

        Ok(remaining)
    }

    /// Check if a record has been idle past its deadline
    pub fn teardown_due(&self, record: &MountpointRecord, now: Instant) -> bool {
        record.subscriber_count() == 0
            && record.teardown_deadline.is_some_and(|deadline| now >= deadline)
    }
}

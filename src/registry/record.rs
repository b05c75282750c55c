//! Mountpoint record and state types
//!
//! This module defines the per-device state stored in the registry.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};
use tokio::time::Instant;
use uuid::Uuid;

use crate::catalog::Device;
use crate::relay::EndpointId;

/// Health state of a mountpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MountState {
    /// No endpoint exists
    Absent,
    /// Endpoint creation in flight
    Provisioning,
    /// Endpoint healthy
    Active,
    /// One failed health check
    Degraded,
    /// Repeated failures, endpoint being recreated under backoff
    Recovering,
    /// Retry budget exhausted, device reported offline
    Failed,
}

impl MountState {
    /// States in which subscribers may hold the mountpoint
    pub fn is_live(self) -> bool {
        matches!(
            self,
            MountState::Provisioning
                | MountState::Active
                | MountState::Degraded
                | MountState::Recovering
        )
    }

    /// States that already have an endpoint and are served without a relay call
    pub fn has_endpoint(self) -> bool {
        matches!(
            self,
            MountState::Active | MountState::Degraded | MountState::Recovering
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MountState::Absent => "ABSENT",
            MountState::Provisioning => "PROVISIONING",
            MountState::Active => "ACTIVE",
            MountState::Degraded => "DEGRADED",
            MountState::Recovering => "RECOVERING",
            MountState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for MountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-held handle for one viewer's interest in a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered subscription
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub device_id: String,
    pub created_at: Instant,
}

/// Registry entry for a single device
#[derive(Debug)]
pub struct MountpointRecord {
    /// Device this record belongs to
    pub device_id: String,

    /// Relay endpoint, absent until provisioned
    pub endpoint_id: Option<EndpointId>,

    /// Current health state
    pub state: MountState,

    /// Consecutive failed checks or recovery attempts
    pub consecutive_failures: u32,

    /// Earliest time of the next recovery attempt (RECOVERING only)
    pub next_retry_at: Option<Instant>,

    /// When the record becomes eligible for teardown (no subscribers only)
    pub teardown_deadline: Option<Instant>,

    /// Last error observed on this record
    pub last_error: Option<String>,

    /// Device snapshot the current endpoint was created from
    pub(crate) device: Option<Device>,

    /// Active subscriptions
    subscriptions: HashMap<SubscriptionId, Subscription>,

    /// When the state last changed
    state_changed_at: Instant,

    /// Set once the record has been removed from the registry map
    pub(crate) retired: bool,
}

impl MountpointRecord {
    /// Create an empty record in `Absent` state
    pub(super) fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            endpoint_id: None,
            state: MountState::Absent,
            consecutive_failures: 0,
            next_retry_at: None,
            teardown_deadline: None,
            last_error: None,
            device: None,
            subscriptions: HashMap::new(),
            state_changed_at: Instant::now(),
            retired: false,
        }
    }

    /// Get the number of subscribers
    pub fn subscriber_count(&self) -> u32 {
        self.subscriptions.len() as u32
    }

    /// Check if a subscription belongs to this record
    #[cfg(test)]
    pub fn has_subscription(&self, id: &SubscriptionId) -> bool {
        self.subscriptions.contains_key(id)
    }

    pub(crate) fn add_subscription(&mut self) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.subscriptions.insert(
            id,
            Subscription {
                id,
                device_id: self.device_id.clone(),
                created_at: Instant::now(),
            },
        );
        id
    }

    pub(crate) fn remove_subscription(&mut self, id: &SubscriptionId) -> Option<Subscription> {
        self.subscriptions.remove(id)
    }

    /// Move to a new state, logging the transition
    ///
    /// Returns the previous state.
    pub(crate) fn transition(&mut self, to: MountState) -> MountState {
        let from = self.state;
        if from == to {
            return from;
        }

        self.state = to;
        self.state_changed_at = Instant::now();

        match to {
            MountState::Degraded | MountState::Recovering | MountState::Failed => {
                tracing::warn!(
                    device = %self.device_id,
                    endpoint = ?self.endpoint_id,
                    from = %from,
                    to = %to,
                    failures = self.consecutive_failures,
                    error = self.last_error.as_deref().unwrap_or(""),
                    "Mountpoint state changed"
                );
            }
            _ => {
                tracing::info!(
                    device = %self.device_id,
                    endpoint = ?self.endpoint_id,
                    from = %from,
                    to = %to,
                    failures = self.consecutive_failures,
                    "Mountpoint state changed"
                );
            }
        }

        from
    }

    /// Clear failure bookkeeping after a success
    pub(crate) fn reset_failures(&mut self) {
        self.consecutive_failures = 0;
        self.next_retry_at = None;
        self.last_error = None;
    }

    /// Take a read-only snapshot
    pub fn snapshot(&self) -> HealthSnapshot {
        let now = Instant::now();

        HealthSnapshot {
            device_id: self.device_id.clone(),
            state: self.state,
            subscriber_count: self.subscriber_count(),
            consecutive_failures: self.consecutive_failures,
            endpoint_id: self.endpoint_id,
            in_state_for: now.saturating_duration_since(self.state_changed_at),
            retry_in: self
                .next_retry_at
                .map(|at| at.saturating_duration_since(now)),
            teardown_in: self
                .teardown_deadline
                .map(|at| at.saturating_duration_since(now)),
            last_error: self.last_error.clone(),
        }
    }
}

/// Read-only view of a mountpoint record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub device_id: String,
    pub state: MountState,
    pub subscriber_count: u32,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<EndpointId>,
    #[serde(rename = "in_state_for_ms", serialize_with = "millis")]
    pub in_state_for: Duration,
    #[serde(rename = "retry_in_ms", serialize_with = "opt_millis")]
    pub retry_in: Option<Duration>,
    #[serde(rename = "teardown_in_ms", serialize_with = "opt_millis")]
    pub teardown_in: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl HealthSnapshot {
    /// Snapshot for a known device with no record
    pub fn absent(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            state: MountState::Absent,
            subscriber_count: 0,
            consecutive_failures: 0,
            endpoint_id: None,
            in_state_for: Duration::ZERO,
            retry_in: None,
            teardown_in: None,
            last_error: None,
        }
    }
}

fn millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

fn opt_millis<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => s.serialize_some(&(d.as_millis() as u64)),
        None => s.serialize_none(),
    }
}

//! Error types
//!
//! `ProvisioningFailed` and `NotFound` are what callers of
//! [`StreamManager::acquire`](crate::StreamManager::acquire) see. The
//! health-related variants are only ever recorded on a mountpoint and
//! surfaced through its status snapshot.

use std::time::Duration;

use crate::relay::RelayError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for stream lifecycle operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Device is not known to the catalog
    #[error("Device not found: {0}")]
    NotFound(String),

    /// Relay could not create an endpoint for the device
    #[error("Provisioning failed for device {device_id}: {reason}")]
    ProvisioningFailed { device_id: String, reason: String },

    /// Health check failed (relay endpoint dead or upstream unreachable)
    #[error("Device {device_id} unreachable: {reason}")]
    Unreachable { device_id: String, reason: String },

    /// Retry budget exhausted, device reported offline
    #[error("Device {device_id} failed permanently after {failures} consecutive failures")]
    PermanentFailure { device_id: String, failures: u32 },

    /// Release of a subscription the device does not hold
    #[error("Invalid subscription {subscription} for device {device_id}")]
    InvalidSubscription {
        device_id: String,
        subscription: String,
    },

    /// Relay control API error
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    /// Device catalog error
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Operation exceeded its time budget
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Wrap any failure that happened while creating an endpoint
    pub(crate) fn provisioning(device_id: &str, cause: impl std::fmt::Display) -> Self {
        Error::ProvisioningFailed {
            device_id: device_id.to_string(),
            reason: cause.to_string(),
        }
    }

    /// Wrap any failure that happened during a health check
    pub(crate) fn unreachable(device_id: &str, cause: impl std::fmt::Display) -> Self {
        Error::Unreachable {
            device_id: device_id.to_string(),
            reason: cause.to_string(),
        }
    }

    /// Check if this error means the device is unknown
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

//! Fleet-wide statistics

use serde::Serialize;

use crate::registry::{HealthSnapshot, MountState};

/// Summary of every mountpoint the manager holds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FleetStats {
    /// Mountpoints with a record
    pub mountpoints: u32,
    /// Endpoints creation in flight
    pub provisioning: u32,
    /// Healthy endpoints
    pub active: u32,
    /// Endpoints with one failed check
    pub degraded: u32,
    /// Endpoints being recreated
    pub recovering: u32,
    /// Devices reported offline
    pub failed: u32,
    /// Subscribers across all mountpoints
    pub subscribers: u32,
    /// Mountpoints with no subscribers awaiting teardown
    pub idle: u32,
    /// No mountpoint is outside `ACTIVE`
    pub healthy: bool,
}

impl FleetStats {
    /// Summarize a set of snapshots, usually from `list_active`
    pub fn from_snapshots<'a>(snapshots: impl IntoIterator<Item = &'a HealthSnapshot>) -> Self {
        let mut stats = Self::default();

        for snap in snapshots {
            match snap.state {
                MountState::Absent => continue,
                MountState::Provisioning => stats.provisioning += 1,
                MountState::Active => stats.active += 1,
                MountState::Degraded => stats.degraded += 1,
                MountState::Recovering => stats.recovering += 1,
                MountState::Failed => stats.failed += 1,
            }

            stats.mountpoints += 1;
            stats.subscribers += snap.subscriber_count;
            if snap.subscriber_count == 0 {
                stats.idle += 1;
            }
        }

        stats.healthy = stats.mountpoints == stats.active;
        stats
    }
}

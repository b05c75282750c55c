//! Stream lifecycle management for camera devices behind a media relay
//!
//! The manager binds each device to at most one relay endpoint (a Janus
//! streaming mountpoint in production) and keeps it alive only while
//! somebody is watching:
//!
//! - **Single-flight provisioning**: concurrent `acquire` calls for a device
//!   share one relay create.
//! - **Reference counting**: endpoints are torn down after the last viewer
//!   leaves and a grace period elapses.
//! - **Health monitoring**: a background loop checks live endpoints and
//!   recreates broken ones with capped exponential backoff, reporting
//!   devices offline once the retry budget is spent.
//!
//! # Example
//!
//! ```no_run
//! use mountpoint_manager::{
//!     Device, JanusRelay, ManagerConfig, MemoryCatalog, StreamManager, TcpProbe,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = MemoryCatalog::with_devices([Device::new(
//!         "lobby",
//!         "rtsp://10.0.0.20:554/stream1",
//!     )]);
//!     let manager = StreamManager::new(
//!         JanusRelay::from_env()?,
//!         catalog,
//!         TcpProbe,
//!         ManagerConfig::default(),
//!     )?;
//!     let monitor = manager.spawn_monitor();
//!
//!     let (info, subscription) = manager.acquire("lobby").await?;
//!     println!("watch mountpoint {} at {}", info.endpoint_id, info.relay.websocket_url);
//!     manager.release("lobby", subscription).await?;
//!
//!     monitor.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod health;
pub mod manager;
pub mod probe;
pub mod relay;
pub mod stats;

pub(crate) mod provision;
pub(crate) mod subscription;

mod registry;

#[cfg(test)]
mod testing;

pub use catalog::{Credentials, Device, DeviceCatalog, MemoryCatalog};
pub use config::ManagerConfig;
pub use error::{Error, Result};
pub use health::{BackoffPolicy, HealthMonitor};
pub use manager::{ConnectionInfo, MonitorHandle, StreamManager};
pub use probe::{TcpProbe, UpstreamProbe};
pub use registry::{HealthSnapshot, MountState, SubscriptionId};
pub use relay::{EndpointId, EndpointState, JanusConfig, JanusRelay, RelayAccess, RelayClient, RelayError};
pub use stats::FleetStats;

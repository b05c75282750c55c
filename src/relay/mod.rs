//! Media-relay control plane
//!
//! The relay is a black box that owns the media path. The lifecycle manager
//! only ever talks to its administrative API through [`RelayClient`]:
//! create an endpoint (mountpoint) for an upstream source, destroy it, and
//! ask whether it is still alive.
//!
//! [`JanusRelay`] is the production adapter for the Janus streaming plugin.

pub mod config;
pub mod error;
pub mod janus;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::Device;

pub use config::JanusConfig;
pub use error::RelayError;
pub use janus::JanusRelay;

/// Relay-assigned endpoint identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(pub u64);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Relay's own view of an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointState {
    /// Whether the relay considers the endpoint usable
    pub alive: bool,
    /// Human-readable detail from the relay
    pub detail: String,
}

impl EndpointState {
    pub fn alive(detail: impl Into<String>) -> Self {
        Self {
            alive: true,
            detail: detail.into(),
        }
    }

    pub fn dead(detail: impl Into<String>) -> Self {
        Self {
            alive: false,
            detail: detail.into(),
        }
    }
}

/// ICE server handed to viewers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: String,
}

/// How a viewer reaches the relay once it holds an endpoint id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayAccess {
    /// Relay WebSocket signalling URL
    pub websocket_url: String,
    /// Relay HTTP signalling URL
    pub http_url: String,
    /// Relay plugin the viewer must attach to
    pub plugin: String,
    /// ICE servers for the browser's peer connection
    pub ice_servers: Vec<IceServer>,
    /// Suggested client-side connection timeout
    #[serde(rename = "connection_timeout_ms", serialize_with = "as_millis")]
    pub connection_timeout: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Administrative control API of an external media relay
///
/// Implementations should bound their own I/O, but the manager also wraps
/// every call in its configured relay timeout and treats a timeout the same
/// as any other failure.
pub trait RelayClient: Send + Sync + 'static {
    /// Create an endpoint pulling from the device's upstream source
    fn create_endpoint(
        &self,
        device: &Device,
    ) -> impl Future<Output = Result<EndpointId, RelayError>> + Send;

    /// Destroy an endpoint. Destroying an unknown endpoint is not an error.
    fn destroy_endpoint(
        &self,
        endpoint: EndpointId,
    ) -> impl Future<Output = Result<(), RelayError>> + Send;

    /// Query the relay's view of an endpoint
    fn query_endpoint_state(
        &self,
        endpoint: EndpointId,
    ) -> impl Future<Output = Result<EndpointState, RelayError>> + Send;

    /// Static viewer access details for this relay
    fn access(&self) -> RelayAccess;
}

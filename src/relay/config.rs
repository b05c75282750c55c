//! Janus relay configuration

use std::time::Duration;

use super::{IceServer, RelayAccess};

/// Default Janus HTTP transport URL
pub const DEFAULT_HTTP_URL: &str = "http://localhost:8088/janus";

/// Default Janus WebSocket transport URL
pub const DEFAULT_WS_URL: &str = "ws://localhost:8188/janus";

/// Streaming plugin package name
pub const STREAMING_PLUGIN: &str = "janus.plugin.streaming";

/// Janus relay configuration options
#[derive(Debug, Clone)]
pub struct JanusConfig {
    /// HTTP transport endpoint used for control requests
    pub http_url: String,

    /// WebSocket endpoint handed to viewers
    pub ws_url: String,

    /// Streaming plugin admin key (required when the plugin sets `admin_key`)
    pub admin_key: Option<String>,

    /// Timeout for each HTTP request to Janus
    pub request_timeout: Duration,

    /// An endpoint whose freshest media is older than this is considered dead
    pub media_stale_after: Duration,

    /// ICE servers handed to viewers
    pub ice_servers: Vec<IceServer>,

    /// Suggested client connection timeout handed to viewers
    pub client_connection_timeout: Duration,
}

impl Default for JanusConfig {
    fn default() -> Self {
        Self {
            http_url: DEFAULT_HTTP_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            admin_key: None,
            request_timeout: Duration::from_secs(10),
            media_stale_after: Duration::from_secs(10),
            ice_servers: vec![
                IceServer {
                    urls: "stun:stun.l.google.com:19302".into(),
                },
                IceServer {
                    urls: "stun:stun1.l.google.com:19302".into(),
                },
            ],
            client_connection_timeout: Duration::from_secs(30),
        }
    }
}

impl JanusConfig {
    /// Load from `JANUS_HTTP_URL`, `JANUS_WS_URL` and `JANUS_ADMIN_SECRET`,
    /// falling back to defaults for anything unset
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("JANUS_HTTP_URL") {
            config.http_url = url;
        }
        if let Ok(url) = std::env::var("JANUS_WS_URL") {
            config.ws_url = url;
        }
        if let Ok(key) = std::env::var("JANUS_ADMIN_SECRET") {
            if !key.is_empty() {
                config.admin_key = Some(key);
            }
        }
        config
    }

    /// Set the HTTP transport URL
    pub fn http_url(mut self, url: impl Into<String>) -> Self {
        self.http_url = url.into();
        self
    }

    /// Set the WebSocket URL handed to viewers
    pub fn ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    /// Set the streaming plugin admin key
    pub fn admin_key(mut self, key: impl Into<String>) -> Self {
        self.admin_key = Some(key.into());
        self
    }

    /// Set the per-request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the media staleness threshold
    pub fn media_stale_after(mut self, threshold: Duration) -> Self {
        self.media_stale_after = threshold;
        self
    }

    /// Replace the ICE server list
    pub fn ice_servers(mut self, servers: Vec<IceServer>) -> Self {
        self.ice_servers = servers;
        self
    }

    /// Viewer access details derived from this config
    pub fn access(&self) -> RelayAccess {
        RelayAccess {
            websocket_url: self.ws_url.clone(),
            http_url: self.http_url.clone(),
            plugin: STREAMING_PLUGIN.to_string(),
            ice_servers: self.ice_servers.clone(),
            connection_timeout: self.client_connection_timeout,
        }
    }
}

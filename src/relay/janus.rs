//! Janus streaming-plugin adapter
//!
//! Talks to the Janus HTTP transport. Every control operation opens a
//! short-lived Janus session, attaches a `janus.plugin.streaming` handle,
//! sends one synchronous plugin request and destroys the session again:
//!
//! ```text
//! POST /janus                     {"janus":"create"}            -> session id
//! POST /janus/{session}           {"janus":"attach", plugin}    -> handle id
//! POST /janus/{session}/{handle}  {"janus":"message", body}     -> plugindata
//! POST /janus/{session}           {"janus":"destroy"}
//! ```
//!
//! Janus keeps sessions alive for 60s without keepalives, so holding one
//! open between health ticks would need its own keepalive task. A session
//! per request keeps the adapter stateless.

use std::time::Duration;

use serde_json::{json, Value};

use crate::catalog::Device;

use super::config::{JanusConfig, STREAMING_PLUGIN};
use super::error::RelayError;
use super::{EndpointId, EndpointState, RelayAccess, RelayClient};

/// Streaming plugin error code for an unknown mountpoint
const NO_SUCH_MOUNTPOINT: i64 = 455;

/// Janus relay client
pub struct JanusRelay {
    client: reqwest::Client,
    config: JanusConfig,
}

impl JanusRelay {
    /// Create a new client
    pub fn new(config: JanusConfig) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, config })
    }

    /// Create a client from `JANUS_*` environment variables
    pub fn from_env() -> Result<Self, RelayError> {
        Self::new(JanusConfig::from_env())
    }

    /// Get the client configuration
    pub fn config(&self) -> &JanusConfig {
        &self.config
    }

    /// Send one synchronous streaming-plugin request and return its `data`
    async fn streaming_request(&self, body: Value) -> Result<Value, RelayError> {
        let session = self.create_session().await?;

        let result = async {
            let handle = self.attach(session).await?;
            let url = format!("{}/{}/{}", self.config.http_url, session, handle);
            let response = self
                .post(&url, json!({ "janus": "message", "body": body }))
                .await?;
            plugin_data(&response)
        }
        .await;

        if let Err(e) = self.destroy_session(session).await {
            tracing::debug!(session = session, error = %e, "Failed to destroy Janus session");
        }

        result
    }

    async fn create_session(&self) -> Result<u64, RelayError> {
        let response = self
            .post(&self.config.http_url, json!({ "janus": "create" }))
            .await?;
        data_id(&response)
    }

    async fn attach(&self, session: u64) -> Result<u64, RelayError> {
        let url = format!("{}/{}", self.config.http_url, session);
        let response = self
            .post(&url, json!({ "janus": "attach", "plugin": STREAMING_PLUGIN }))
            .await?;
        data_id(&response)
    }

    async fn destroy_session(&self, session: u64) -> Result<(), RelayError> {
        let url = format!("{}/{}", self.config.http_url, session);
        self.post(&url, json!({ "janus": "destroy" })).await?;
        Ok(())
    }

    /// POST a Janus envelope with a fresh transaction id
    async fn post(&self, url: &str, mut envelope: Value) -> Result<Value, RelayError> {
        envelope["transaction"] = Value::String(uuid::Uuid::new_v4().to_string());

        let resp = self.client.post(url).json(&envelope).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RelayError::Status(status.as_u16(), text));
        }

        let body: Value = resp.json().await?;
        check_envelope(body)
    }
}

impl RelayClient for JanusRelay {
    async fn create_endpoint(&self, device: &Device) -> Result<EndpointId, RelayError> {
        let body = create_request(device, self.config.admin_key.as_deref());
        let data = self.streaming_request(body).await?;
        let endpoint = parse_created(&data)?;

        tracing::debug!(device = %device.id, endpoint = %endpoint, "Janus mountpoint created");
        Ok(endpoint)
    }

    async fn destroy_endpoint(&self, endpoint: EndpointId) -> Result<(), RelayError> {
        let body = with_admin_key(
            json!({ "request": "destroy", "id": endpoint.0, "permanent": false }),
            self.config.admin_key.as_deref(),
        );

        match self.streaming_request(body).await {
            Ok(_) => Ok(()),
            Err(RelayError::Rejected { code, .. }) if code == NO_SUCH_MOUNTPOINT => {
                tracing::debug!(endpoint = %endpoint, "Janus mountpoint already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn query_endpoint_state(&self, endpoint: EndpointId) -> Result<EndpointState, RelayError> {
        let body = with_admin_key(
            json!({ "request": "info", "id": endpoint.0 }),
            self.config.admin_key.as_deref(),
        );

        match self.streaming_request(body).await {
            Ok(data) => Ok(parse_info(&data, self.config.media_stale_after)),
            Err(RelayError::Rejected { code, .. }) if code == NO_SUCH_MOUNTPOINT => {
                Ok(EndpointState::dead("no such mountpoint"))
            }
            Err(e) => Err(e),
        }
    }

    fn access(&self) -> RelayAccess {
        self.config.access()
    }
}

/// Build the streaming `create` request for an RTSP upstream
fn create_request(device: &Device, admin_key: Option<&str>) -> Value {
    let mut body = json!({
        "request": "create",
        "type": "rtsp",
        "description": device.id,
        "url": device.upstream_url,
        "is_private": false,
        "permanent": false,
        "video": true,
        "audio": false,
    });

    if let Some(creds) = &device.credentials {
        body["rtsp_user"] = Value::String(creds.username.clone());
        body["rtsp_pwd"] = Value::String(creds.password.clone());
    }

    with_admin_key(body, admin_key)
}

fn with_admin_key(mut body: Value, admin_key: Option<&str>) -> Value {
    if let Some(key) = admin_key {
        body["admin_key"] = Value::String(key.to_string());
    }
    body
}

/// Reject `{"janus":"error"}` envelopes
fn check_envelope(body: Value) -> Result<Value, RelayError> {
    if body.get("janus").and_then(Value::as_str) == Some("error") {
        let error = body.get("error").cloned().unwrap_or(Value::Null);
        return Err(RelayError::Rejected {
            code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
            reason: error
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("unknown Janus error")
                .to_string(),
        });
    }
    Ok(body)
}

/// Extract `data.id` from a create/attach response
fn data_id(body: &Value) -> Result<u64, RelayError> {
    body.get("data")
        .and_then(|d| d.get("id"))
        .and_then(Value::as_u64)
        .ok_or_else(|| RelayError::Protocol(format!("missing data.id in {}", body)))
}

/// Extract streaming plugin `data`, turning `error_code` payloads into errors
fn plugin_data(body: &Value) -> Result<Value, RelayError> {
    let data = body
        .get("plugindata")
        .and_then(|p| p.get("data"))
        .cloned()
        .ok_or_else(|| RelayError::Protocol(format!("missing plugindata in {}", body)))?;

    if let Some(code) = data.get("error_code").and_then(Value::as_i64) {
        return Err(RelayError::Rejected {
            code,
            reason: data
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("streaming plugin error")
                .to_string(),
        });
    }

    Ok(data)
}

fn parse_created(data: &Value) -> Result<EndpointId, RelayError> {
    data.get("stream")
        .and_then(|s| s.get("id"))
        .and_then(Value::as_u64)
        .map(EndpointId)
        .ok_or_else(|| RelayError::Protocol(format!("missing stream.id in {}", data)))
}

/// Interpret an `info` response
fn parse_info(data: &Value, stale_after: Duration) -> EndpointState {
    let Some(info) = data.get("info") else {
        return EndpointState::dead("info response without mountpoint");
    };

    if info.get("enabled").and_then(Value::as_bool) == Some(false) {
        return EndpointState::dead("mountpoint disabled");
    }

    // Janus 1.x reports per-media ages; 0.x reports video/audio ages
    let mut ages: Vec<u64> = info
        .get("media")
        .and_then(Value::as_array)
        .map(|media| {
            media
                .iter()
                .filter_map(|m| m.get("age_ms").and_then(Value::as_u64))
                .collect()
        })
        .unwrap_or_default();
    for key in ["video_age_ms", "audio_age_ms"] {
        if let Some(age) = info.get(key).and_then(Value::as_u64) {
            ages.push(age);
        }
    }

    match ages.into_iter().min() {
        Some(age) if age > stale_after.as_millis() as u64 => {
            EndpointState::dead(format!("media stale for {}ms", age))
        }
        Some(age) => EndpointState::alive(format!("media age {}ms", age)),
        None => EndpointState::alive("enabled, no media age reported"),
    }
}

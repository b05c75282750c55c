//! Upstream reachability probes

use std::future::Future;

use reqwest::Url;
use tokio::net::TcpStream;

use crate::catalog::Device;
use crate::error::{Error, Result};

/// Lightweight check that a device's upstream source answers
pub trait UpstreamProbe: Send + Sync + 'static {
    fn probe(&self, device: &Device) -> impl Future<Output = Result<()>> + Send;
}

/// Probe that opens (and immediately drops) a TCP connection to the
/// upstream host
///
/// Cheap enough to run every health tick, and it does not consume one of
/// the camera's limited RTSP sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

impl UpstreamProbe for TcpProbe {
    async fn probe(&self, device: &Device) -> Result<()> {
        let (host, port) =
            upstream_addr(&device.upstream_url).map_err(|e| Error::unreachable(&device.id, e))?;

        TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| Error::unreachable(&device.id, format!("{}:{}: {}", host, port, e)))?;

        Ok(())
    }
}

/// Resolve host and port of an upstream URL, defaulting the port by scheme
fn upstream_addr(upstream_url: &str) -> std::result::Result<(String, u16), String> {
    let url = Url::parse(upstream_url)
        .map_err(|e| format!("invalid upstream URL {}: {}", upstream_url, e))?;

    let host = url
        .host_str()
        .ok_or_else(|| format!("upstream URL has no host: {}", upstream_url))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();

    let port = match url.port_or_known_default() {
        Some(port) => port,
        None => match url.scheme() {
            "rtsp" => 554,
            "rtsps" => 322,
            "rtmp" => 1935,
            scheme => return Err(format!("no default port for scheme {}", scheme)),
        },
    };

    Ok((host, port))
}

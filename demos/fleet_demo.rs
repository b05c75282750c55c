//! Fleet demo: manage Janus mountpoints for a handful of cameras
//!
//! Run with: cargo run --example fleet_demo [ID=RTSP_URL]...
//!
//! Examples:
//!   cargo run --example fleet_demo
//!   cargo run --example fleet_demo lobby=rtsp://10.0.0.20:554/stream1
//!
//! The relay is configured from the environment:
//!   JANUS_HTTP_URL      Janus HTTP endpoint (default http://localhost:8088/janus)
//!   JANUS_WS_URL        Janus WebSocket endpoint handed to viewers
//!   JANUS_ADMIN_SECRET  streaming plugin admin key, if one is set
//!
//! The demo acquires every device once, prints the connection info a
//! browser would receive, releases the subscriptions again and then prints
//! a fleet summary every few seconds until Ctrl+C. Idle mountpoints are
//! torn down after the grace period.

use std::time::Duration;

use mountpoint_manager::{
    Device, FleetStats, JanusRelay, ManagerConfig, MemoryCatalog, StreamManager, TcpProbe,
};

const REPORT_INTERVAL: Duration = Duration::from_secs(5);

fn parse_device(arg: &str) -> Result<Device, String> {
    let (id, url) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected ID=RTSP_URL, got {}", arg))?;
    if id.is_empty() || url.is_empty() {
        return Err(format!("expected ID=RTSP_URL, got {}", arg));
    }
    Ok(Device::new(id, url))
}

fn sample_devices() -> Vec<Device> {
    vec![
        Device::new("lobby", "rtsp://10.0.0.20:554/stream1"),
        Device::new("loading-dock", "rtsp://10.0.0.21:554/stream1"),
        Device::new("parking", "rtsp://10.0.0.22/h264"),
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mountpoint_manager=debug".parse()?)
                .add_directive("fleet_demo=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let devices = if args.is_empty() {
        sample_devices()
    } else {
        args.iter()
            .map(|arg| parse_device(arg))
            .collect::<Result<Vec<_>, _>>()?
    };
    let ids: Vec<String> = devices.iter().map(|d| d.id.clone()).collect();

    let relay = JanusRelay::from_env()?;
    println!("Janus: {}", relay.config().http_url);

    let manager = StreamManager::new(
        relay,
        MemoryCatalog::with_devices(devices),
        TcpProbe,
        ManagerConfig::default(),
    )?;
    let monitor = manager.spawn_monitor();

    for id in &ids {
        match manager.acquire(id).await {
            Ok((info, subscription)) => {
                println!("{}", serde_json::to_string_pretty(&info)?);
                manager.release(id, subscription).await?;
            }
            Err(e) => eprintln!("{}: {}", id, e),
        }
    }

    println!();
    println!("Watching fleet, Ctrl+C to stop");

    let mut ticker = tokio::time::interval(REPORT_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let snapshots = manager.list_active().await;
                let stats = FleetStats::from_snapshots(&snapshots);
                println!("{}", serde_json::to_string(&stats)?);
                for snap in &snapshots {
                    println!("  {}", serde_json::to_string(snap)?);
                }
            }
        }
    }

    monitor.shutdown().await;
    println!("Stopped");
    Ok(())
}

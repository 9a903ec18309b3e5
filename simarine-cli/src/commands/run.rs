//! `run` — polling snapshot emitter.
//!
//! Connects (or auto-discovers), enumerates everything once, then refreshes
//! sensor state on an interval and prints one snapshot JSON document per
//! round: `{system_info, system_device, devices, sensors, timestamp}`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serde_json::{json, Map, Value};
use simarine_client::PicoClient;
use tokio_util::sync::CancellationToken;

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Controller address; auto-discovered when omitted
    #[arg(long)]
    pub host: Option<String>,

    /// Indent the snapshot JSON
    #[arg(long)]
    pub pretty: bool,

    /// Seconds between state refreshes
    #[arg(long, default_value_t = 5.0)]
    pub interval: f64,
}

pub async fn run(args: RunArgs, token: CancellationToken) -> Result<()> {
    let mut client = PicoClient::connect(args.host).await?;

    let (serial_number, firmware) = client.get_system_info().await?;
    let system_device = client.get_system_device().await?;
    let devices = client.get_devices(true).await?;
    let mut sensors = client.get_sensors().await?;

    let device_snapshots: Map<String, Value> = devices
        .iter()
        .map(|(id, device)| (id.to_string(), device.snapshot()))
        .collect();

    while !token.is_cancelled() {
        client.update_sensors_state(&mut sensors).await?;

        let sensor_snapshots: Map<String, Value> = sensors
            .iter()
            .map(|(id, sensor)| (id.to_string(), sensor.snapshot()))
            .collect();

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        let snapshot = json!({
            "system_info": {
                "serial_number": serial_number,
                "firmware": firmware,
            },
            "system_device": system_device.snapshot(),
            "devices": device_snapshots,
            "sensors": sensor_snapshots,
            "timestamp": timestamp,
        });

        if args.pretty {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        } else {
            println!("{snapshot}");
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs_f64(args.interval)) => {}
        }
    }

    client.close().await;
    Ok(())
}

//! `monitor pressure` — delta between the TCP sensor reading and the head
//! of the UDP pressure-history broadcast.
//!
//! The broadcast handler only forwards the newest sample into a channel; the
//! TCP queries run in this task so the request path stays strictly
//! sequential.

use anyhow::Result;
use chrono::Local;
use clap::Subcommand;
use simarine_client::{PicoClient, UdpTransport};
use simarine_proto::MessageType;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Subcommand, Debug)]
pub enum MonitorCommand {
    /// Print sensor-vs-broadcast pressure deltas as they arrive
    Pressure {
        /// Sensor to read over TCP
        sensor_id: u8,

        /// Controller address; auto-discovered when omitted
        #[arg(long)]
        host: Option<String>,

        /// Convert raw values to millibars (sensor /100, history *0.05
        /// plus altitude compensation)
        #[arg(long)]
        convert: bool,
    },
}

pub async fn run(cmd: MonitorCommand, token: CancellationToken) -> Result<()> {
    let MonitorCommand::Pressure {
        sensor_id,
        host,
        convert,
    } = cmd;

    let mut client = PicoClient::connect(host).await?;
    let sensor = client.get_sensor(sensor_id).await?;
    let device_id = sensor.device_id().unwrap_or(0) as u8;
    let device = client.get_device(device_id).await?;
    let altitude = device.altitude().unwrap_or(0);
    info!(
        "monitoring sensor {sensor_id} ({}) against broadcast history, altitude {altitude} m",
        sensor.type_name()
    );

    let mut udp = UdpTransport::new();
    udp.open()?;

    let (head_tx, mut head_rx) = mpsc::channel::<u16>(8);
    let listen_token = token.clone();
    let listener = tokio::spawn(async move {
        let _ = udp
            .listen(listen_token, |msg, _| {
                if msg.message_type() != MessageType::AtmosphericPressureHistory {
                    return;
                }
                let head = msg
                    .fields()
                    .get(0)
                    .and_then(|f| f.timeseries())
                    .and_then(|s| s.first().copied());
                if let Some(head) = head {
                    let _ = head_tx.try_send(head);
                }
            })
            .await;
    });

    loop {
        let head = tokio::select! {
            _ = token.cancelled() => break,
            head = head_rx.recv() => head,
        };
        let Some(head) = head else { break };

        let state = client.get_sensors_state().await?;
        let raw = state.get(&sensor_id).map(|f| f.int32()).unwrap_or_default();

        let (sensor_value, history_value) = if convert {
            (
                raw as f64 / 100.0,
                head as f64 * 0.05 + altitude as f64 * 0.125,
            )
        } else {
            (raw as f64, head as f64)
        };
        let delta = history_value - sensor_value;

        println!(
            "[{}] sensor={sensor_value} udp={history_value} delta={delta:+.2}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
    }

    let _ = listener.await;
    client.close().await;
    Ok(())
}

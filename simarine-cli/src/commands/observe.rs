//! `observe device|sensor` — diff observer for one object.

use std::time::Duration;

use anyhow::Result;
use clap::Subcommand;
use simarine_client::{ObjectObserver, ObserveTarget, PicoClient};
use tokio_util::sync::CancellationToken;

#[derive(clap::Args, Debug)]
pub struct ObserveOpts {
    /// Controller address; auto-discovered when omitted
    #[arg(long)]
    pub host: Option<String>,

    /// Seconds between polls
    #[arg(long, default_value_t = 1.0)]
    pub interval: f64,

    /// Take a single sample (sets the baseline) and exit
    #[arg(long)]
    pub once: bool,

    /// Comma-separated field names or paths (ex: ohms,state_field,fields.18)
    #[arg(long)]
    pub fields: Option<String>,

    /// Emit diffs as JSON
    #[arg(long)]
    pub json: bool,

    /// Include unchanged fields in output
    #[arg(long)]
    pub include_unchanged: bool,

    /// Classify numeric deltas (counter vs analog vs flag)
    #[arg(long)]
    pub re_hints: bool,
}

#[derive(Subcommand, Debug)]
pub enum ObserveCommand {
    /// Observe a device by ID
    Device {
        device_id: u8,
        #[command(flatten)]
        opts: ObserveOpts,
    },
    /// Observe a sensor by ID
    Sensor {
        sensor_id: u8,
        #[command(flatten)]
        opts: ObserveOpts,
    },
}

pub async fn run(cmd: ObserveCommand, token: CancellationToken) -> Result<()> {
    let (target, opts) = match cmd {
        ObserveCommand::Device { device_id, opts } => (ObserveTarget::Device(device_id), opts),
        ObserveCommand::Sensor { sensor_id, opts } => (ObserveTarget::Sensor(sensor_id), opts),
    };

    let mut client = PicoClient::connect(opts.host.clone()).await?;
    let mut observer = ObjectObserver::new(Duration::from_secs_f64(opts.interval))
        .field_filter(opts.fields.as_deref())
        .json_mode(opts.json)
        .include_unchanged(opts.include_unchanged)
        .re_hints(opts.re_hints);

    if opts.once {
        observer.sample(&mut client, target).await?;
    } else {
        observer.run(&mut client, target, token).await;
    }

    client.close().await;
    Ok(())
}

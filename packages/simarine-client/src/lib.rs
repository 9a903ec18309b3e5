//! # simarine-client
//!
//! Client library for Simarine Pico marine monitoring controllers.
//!
//! ## Architecture
//! - `transport`: TCP request/response (port 5001), UDP broadcast ingestion
//!   (port 43210) and the vendor MQTT bridge, all speaking the frame format
//!   from `simarine-proto`
//! - `device` / `sensor`: typed object model built from DEVICE_INFO and
//!   SENSOR_INFO responses, with per-variant attribute descriptor tables
//! - `client`: the [`PicoClient`] facade: typed queries, sensor state
//!   refresh, passive discovery, background UDP listener
//! - `observer`: poll → normalize → diff → render loop for watching a
//!   single device or sensor change over time
//!
//! The TCP path is strictly sequential per client, the UDP worker is the
//! only background task, and `Sensor::state_field` is the only long-lived
//! mutable reference; everything else is immutable after construction.

mod attrs;
pub mod client;
pub mod device;
pub mod error;
pub mod observer;
pub mod sensor;
pub mod transport;

pub use client::{Discovered, PicoClient};
pub use device::{
    BatteryType, Device, DeviceKind, InclinometerAxis, InclinometerDisplayType, OnOff,
    TankFluidType, ThermometerType,
};
pub use error::{ClientError, TransportError};
pub use observer::{ObjectDiff, ObjectObserver, ObserveTarget};
pub use sensor::{Sensor, SensorKind, TimestampStateType};
pub use transport::{MqttTransport, TcpTransport, UdpTransport};

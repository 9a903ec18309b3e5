//! High-level client facade.
//!
//! Wraps the TCP control channel with typed queries, drives the background
//! UDP listener, and performs passive auto-discovery. The TCP request path
//! is strictly sequential per client: one frame out, one frame in.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};

use simarine_proto::{Field, Message, MessageType};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::device::Device;
use crate::error::ClientError;
use crate::sensor::Sensor;
use crate::transport::{TcpTransport, UdpTransport};

/// Result of passive discovery. All fields stay `None` on a silent network;
/// `ip` alone is set when a controller was heard but the TCP probe failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovered {
    pub ip: Option<IpAddr>,
    pub serial_number: Option<u32>,
    pub firmware: Option<String>,
}

struct UdpListenerHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

pub struct PicoClient {
    tcp: TcpTransport,
    udp_listener: Option<UdpListenerHandle>,
}

impl PicoClient {
    pub fn new(host: impl Into<String>) -> Self {
        Self::with_transport(TcpTransport::new(host))
    }

    pub fn with_transport(tcp: TcpTransport) -> Self {
        PicoClient {
            tcp,
            udp_listener: None,
        }
    }

    /// Connect to `host`, or to whatever controller passive discovery hears
    /// when no host is given.
    pub async fn connect(host: Option<String>) -> Result<PicoClient, ClientError> {
        let host = match host {
            Some(host) => host,
            None => Self::discover()
                .await
                .ip
                .map(|ip| ip.to_string())
                .ok_or(ClientError::NoControllerFound)?,
        };
        let mut client = PicoClient::new(host);
        client.open().await?;
        Ok(client)
    }

    pub async fn open(&mut self) -> Result<(), ClientError> {
        Ok(self.tcp.open().await?)
    }

    pub async fn close(&mut self) {
        self.tcp.close();
        if self.udp_listener.is_some() {
            let _ = self.stop_udp_listener().await;
        }
    }

    // ── System information ────────────────────────────────────────────────────

    async fn request(
        &mut self,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<Message, ClientError> {
        Ok(self.tcp.request(message_type, payload).await?)
    }

    fn require(msg: &Message, id: u8) -> Result<Field, ClientError> {
        msg.fields().get(id).ok_or(ClientError::MissingField(id))
    }

    /// Controller serial number and firmware version ("hi.lo").
    pub async fn get_system_info(&mut self) -> Result<(u32, String), ClientError> {
        let msg = self.request(MessageType::SystemInfo, &[]).await?;
        let serial = Self::require(&msg, 1)?.uint32();
        let version = Self::require(&msg, 2)?;
        let firmware = format!("{}.{}", version.int16_hi(), version.int16_lo());
        Ok((serial, firmware))
    }

    /// Device and sensor counts. Both are zero-indexed last ids: a
    /// controller with counts `(19, 26)` answers device queries 0..=19.
    pub async fn get_counts(&mut self) -> Result<(u8, u8), ClientError> {
        let msg = self.request(MessageType::DeviceSensorCount, &[]).await?;
        let devices = Self::require(&msg, 1)?.int32() as u8;
        let sensors = Self::require(&msg, 2)?.int32() as u8;
        Ok((devices, sensors))
    }

    // ── Devices ───────────────────────────────────────────────────────────────

    fn device_info_request_payload(id: u8) -> [u8; 19] {
        [
            0xFF, 0x00, 0x01, 0x00, 0x00, 0x00, id, 0xFF, 0x01, 0x03, 0x00, 0x00, 0x00, 0x00,
            0xFF, 0x00, 0x00, 0x00, 0x00,
        ]
    }

    pub async fn get_device(&mut self, id: u8) -> Result<Device, ClientError> {
        let msg = self
            .request(MessageType::DeviceInfo, &Self::device_info_request_payload(id))
            .await?;
        Ok(Device::from_fields(msg.fields().clone())?)
    }

    /// The controller's own system device (index 0).
    pub async fn get_system_device(&mut self) -> Result<Device, ClientError> {
        self.get_device(0).await
    }

    /// Query every device. Index 0 is the system device and skipped unless
    /// `exclude_system` is off.
    pub async fn get_devices(
        &mut self,
        exclude_system: bool,
    ) -> Result<BTreeMap<u8, Device>, ClientError> {
        let (device_count, _) = self.get_counts().await?;
        info!("device count: {device_count}");

        let first = if exclude_system { 1 } else { 0 };
        let mut devices = BTreeMap::new();
        for id in first..=device_count {
            let device = self.get_device(id).await?;
            info!(
                "device index={id} id={:?} type={} name={:?}",
                device.id(),
                device.type_name(),
                device.name()
            );
            devices.insert(id, device);
        }
        Ok(devices)
    }

    // ── Sensors ───────────────────────────────────────────────────────────────

    fn sensor_info_request_payload(id: u8) -> [u8; 14] {
        [
            0xFF, 0x01, 0x01, 0x00, 0x00, 0x00, id, 0xFF, 0x02, 0x01, 0x00, 0x00, 0x00, 0x00,
        ]
    }

    pub async fn get_sensor(&mut self, id: u8) -> Result<Sensor, ClientError> {
        let msg = self
            .request(MessageType::SensorInfo, &Self::sensor_info_request_payload(id))
            .await?;
        Ok(Sensor::from_fields(msg.fields().clone())?)
    }

    pub async fn get_sensors(&mut self) -> Result<BTreeMap<u8, Sensor>, ClientError> {
        let (_, sensor_count) = self.get_counts().await?;
        info!("sensor count: {sensor_count}");

        let mut sensors = BTreeMap::new();
        for id in 0..=sensor_count {
            let sensor = self.get_sensor(id).await?;
            info!("sensor index={id} id={:?} type={}", sensor.id(), sensor.type_name());
            sensors.insert(id, sensor);
        }
        Ok(sensors)
    }

    /// Latest state of every sensor, keyed by sensor id.
    pub async fn get_sensors_state(&mut self) -> Result<BTreeMap<u8, Field>, ClientError> {
        let msg = self.request(MessageType::SensorsState, &[]).await?;
        Ok(msg.fields().as_map()?.clone())
    }

    /// Refresh state in place: every sensor whose id appears in the
    /// SENSORS_STATE response gets its state field rebound, the rest keep
    /// their previous state.
    pub async fn update_sensors_state(
        &mut self,
        sensors: &mut BTreeMap<u8, Sensor>,
    ) -> Result<(), ClientError> {
        let state = self.get_sensors_state().await?;
        for (id, field) in state {
            if let Some(sensor) = sensors.get_mut(&id) {
                sensor.set_state_field(field);
            }
        }
        Ok(())
    }

    // ── UDP listening ─────────────────────────────────────────────────────────

    /// Start the background broadcast listener. The handler runs once per
    /// decoded frame; its errors are logged and swallowed so one bad message
    /// never kills the worker.
    pub fn start_udp_listener<F>(&mut self, handler: F) -> Result<(), ClientError>
    where
        F: FnMut(Message, SocketAddr) -> anyhow::Result<()> + Send + 'static,
    {
        self.start_udp_listener_on(UdpTransport::new(), handler)
    }

    /// As [`start_udp_listener`](Self::start_udp_listener) with a caller
    /// supplied (possibly pre-bound) transport.
    pub fn start_udp_listener_on<F>(
        &mut self,
        mut udp: UdpTransport,
        mut handler: F,
    ) -> Result<(), ClientError>
    where
        F: FnMut(Message, SocketAddr) -> anyhow::Result<()> + Send + 'static,
    {
        if let Some(handle) = &self.udp_listener {
            if !handle.task.is_finished() {
                return Err(ClientError::UdpListenerAlreadyRunning);
            }
        }

        if !udp.is_open() {
            udp.open()?;
        }

        let token = CancellationToken::new();
        let worker_token = token.clone();
        let task = tokio::spawn(async move {
            let result = udp
                .listen(worker_token, |message, addr| {
                    if let Err(e) = handler(message, addr) {
                        warn!("udp handler error: {e:#}");
                    }
                })
                .await;
            if let Err(e) = result {
                warn!("udp listener stopped: {e}");
            }
        });

        info!("udp listener started");
        self.udp_listener = Some(UdpListenerHandle { token, task });
        Ok(())
    }

    /// Signal the worker and wait for it to drain.
    pub async fn stop_udp_listener(&mut self) -> Result<(), ClientError> {
        let handle = self
            .udp_listener
            .take()
            .ok_or(ClientError::UdpListenerNotRunning)?;
        handle.token.cancel();
        let _ = handle.task.await;
        info!("udp listener stopped");
        Ok(())
    }

    // ── Discovery ─────────────────────────────────────────────────────────────

    /// Passively listen for one broadcast, then probe the sender over TCP.
    /// Timeouts are "not found", never an error.
    pub async fn discover() -> Discovered {
        Self::discover_on(UdpTransport::new()).await
    }

    pub async fn discover_on(mut udp: UdpTransport) -> Discovered {
        info!("discovering controller via passive broadcast listen");
        if !udp.is_open() {
            if let Err(e) = udp.open() {
                warn!("discovery failed to bind: {e}");
                return Discovered::default();
            }
        }

        let addr = match udp.recv().await {
            Ok((_, addr)) => addr,
            Err(e) if e.is_timeout() => {
                info!("discovery timed out");
                return Discovered::default();
            }
            Err(e) => {
                warn!("discovery failed: {e}");
                return Discovered::default();
            }
        };
        udp.close();

        let ip = addr.ip();
        info!("controller heard at {ip}, probing system information");
        let mut client = PicoClient::new(ip.to_string());
        let probed: Result<(u32, String), ClientError> = async {
            client.open().await?;
            client.get_system_info().await
        }
        .await;
        client.close().await;

        match probed {
            Ok((serial_number, firmware)) => {
                info!("controller at {ip}: serial={serial_number} firmware={firmware}");
                Discovered {
                    ip: Some(ip),
                    serial_number: Some(serial_number),
                    firmware: Some(firmware),
                }
            }
            Err(e) => {
                warn!("failed to probe system information: {e}");
                Discovered {
                    ip: Some(ip),
                    ..Discovered::default()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, UdpSocket};

    /// Mock controller answering a scripted sequence of requests.
    async fn scripted_controller(script: Vec<(Vec<u8>, Vec<u8>)>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            for (expected, response) in script {
                let mut buf = vec![0u8; 8192];
                let n = stream.read(&mut buf).await.unwrap();
                assert_eq!(&buf[..n], &expected[..], "unexpected request frame");
                stream.write_all(&response).await.unwrap();
            }
        });
        port
    }

    async fn client_for(port: u16) -> PicoClient {
        let tcp = TcpTransport::new_with("127.0.0.1", port, Duration::from_millis(500));
        let mut client = PicoClient::with_transport(tcp);
        client.open().await.unwrap();
        client
    }

    fn count_response() -> Vec<u8> {
        hex::decode("0000000000ff0284b3ee930011ff010100000013ff02010000001aff76e9").unwrap()
    }

    #[tokio::test]
    async fn get_system_info_reference_response() {
        let port = scripted_controller(vec![(
            hex::decode("0000000000ff01000000000003ff89b8").unwrap(),
            hex::decode("0000000000ff0184b3ee930011ff010184b3ee93ff020100010015ff97a3").unwrap(),
        )])
        .await;

        let mut client = client_for(port).await;
        let (serial, firmware) = client.get_system_info().await.unwrap();
        assert_eq!(serial, 2_226_384_531);
        assert_eq!(firmware, "1.21");
    }

    #[tokio::test]
    async fn get_counts_reference_response() {
        let port = scripted_controller(vec![(
            hex::decode("0000000000ff02000000000003ff7688").unwrap(),
            count_response(),
        )])
        .await;

        let mut client = client_for(port).await;
        assert_eq!(client.get_counts().await.unwrap(), (19, 26));
    }

    #[tokio::test]
    async fn get_device_sends_fixed_payload() {
        let device_fields =
            hex::decode("ff00010000000bff010365932547ff00000001ff020100000000").unwrap();
        let response = Message::build_with_serial(MessageType::DeviceInfo, &device_fields, 7);
        let port = scripted_controller(vec![(
            Message::build(
                MessageType::DeviceInfo,
                &PicoClient::device_info_request_payload(11),
            )
            .as_bytes()
            .to_vec(),
            response.as_bytes().to_vec(),
        )])
        .await;

        let mut client = client_for(port).await;
        let device = client.get_device(11).await.unwrap();
        assert_eq!(device.id(), Some(11));
        assert_eq!(device.type_name(), "voltmeter");
    }

    #[tokio::test]
    async fn update_sensors_state_mutates_only_reported_ids() {
        // sensors 0 (voltage) and 1 (temperature)
        let mk_sensor = |id: u8, type_id: u8| {
            let payload = hex::decode(format!(
                "ff01010000000{id}ff0201000000{type_id:02x}ff030100000000"
            ))
            .unwrap();
            Sensor::from_fields(simarine_proto::MessageFields::new(bytes::Bytes::from(payload)))
                .unwrap()
        };
        let mut sensors = BTreeMap::new();
        sensors.insert(0u8, mk_sensor(0, 1));
        sensors.insert(1u8, mk_sensor(1, 4));

        // give sensor 1 a pre-existing state the refresh must not touch
        let old_state = simarine_proto::MessageFields::new(bytes::Bytes::from(
            hex::decode("ff0101000000c8").unwrap(),
        ))
        .get(1)
        .unwrap();
        sensors.get_mut(&1).unwrap().set_state_field(old_state);

        // state response reports ids 0 and 2 only
        let state_payload = hex::decode("ff0001000030a2ff0201000001dd").unwrap();
        let response = Message::build_with_serial(MessageType::SensorsState, &state_payload, 7);
        let port = scripted_controller(vec![(
            Message::build(MessageType::SensorsState, &[]).as_bytes().to_vec(),
            response.as_bytes().to_vec(),
        )])
        .await;

        let mut client = client_for(port).await;
        client.update_sensors_state(&mut sensors).await.unwrap();

        let volts = sensors[&0].volts().unwrap();
        assert!((volts - 12.45).abs() < 1e-9);
        // untouched sensor keeps its previous state
        assert_eq!(sensors[&1].state_raw(), Some(200));
    }

    #[tokio::test]
    async fn discover_on_silent_network_returns_nulls_within_one_timeout() {
        let udp = UdpTransport::new_with("127.0.0.1", 0, Duration::from_millis(80));
        let started = std::time::Instant::now();
        let found = PicoClient::discover_on(udp).await;
        assert_eq!(found, Discovered::default());
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn udp_listener_swallows_handler_errors_and_keeps_going() {
        let mut udp = UdpTransport::new_with("127.0.0.1", 0, Duration::from_millis(50));
        udp.open().unwrap();
        let target = udp.local_addr().unwrap();

        let seen: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut client = PicoClient::new("127.0.0.1");
        client
            .start_udp_listener_on(udp, move |msg, _| {
                sink.lock().unwrap().push(msg.serial_number());
                anyhow::bail!("handler always fails");
            })
            .unwrap();

        // a second listener on the same client is refused
        let err = client
            .start_udp_listener(|_, _| Ok(()))
            .unwrap_err();
        assert!(matches!(err, ClientError::UdpListenerAlreadyRunning));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for serial in [1u32, 2] {
            let frame = Message::build_with_serial(MessageType::SystemInfo, &[], serial);
            sender.send_to(frame.as_bytes(), target).await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if seen.lock().unwrap().len() == 2 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("both datagrams should reach the handler");

        client.stop_udp_listener().await.unwrap();
        assert!(matches!(
            client.stop_udp_listener().await.unwrap_err(),
            ClientError::UdpListenerNotRunning
        ));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn pressure_history_broadcast_end_to_end() {
        let mut payload = hex::decode("ff000b691c89f0ff691c89f0ff").unwrap();
        payload.push(225);
        for i in 0..225u16 {
            payload.push(0xFF);
            payload.extend_from_slice(&(0x560B - i).to_be_bytes());
            payload.extend_from_slice(&(0x560A - i).to_be_bytes());
        }
        payload.push(0xFF);
        let frame =
            Message::build_with_serial(MessageType::AtmosphericPressureHistory, &payload, 7);

        let mut udp = UdpTransport::new_with("127.0.0.1", 0, Duration::from_millis(50));
        udp.open().unwrap();
        let target = udp.local_addr().unwrap();

        let series: Arc<Mutex<Vec<u16>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = series.clone();
        let mut client = PicoClient::new("127.0.0.1");
        client
            .start_udp_listener_on(udp, move |msg, _| {
                if msg.message_type() == MessageType::AtmosphericPressureHistory {
                    if let Some(field) = msg.fields().get(0) {
                        *sink.lock().unwrap() = field.timeseries().unwrap_or_default();
                    }
                }
                Ok(())
            })
            .unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(frame.as_bytes(), target).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if !series.lock().unwrap().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("broadcast should be decoded");

        client.stop_udp_listener().await.unwrap();
        let series = series.lock().unwrap();
        assert_eq!(series.len(), 450);
        assert_eq!((series[0], series[1]), (0x560B, 0x560A));
    }
}

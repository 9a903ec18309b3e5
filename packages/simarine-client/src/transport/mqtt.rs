//! MQTT bridged control.
//!
//! The vendor broker relays frames between the app and the controller on a
//! topic pair keyed by the controller's serial: we publish requests to
//! `/<serial>_APP` and the controller answers on `/<serial>_DEV`, frame bytes
//! verbatim in the MQTT payload.
//!
//! The inbox is bounded at one message on purpose: the protocol is
//! single-outstanding by contract, so a second in-flight response means the
//! caller overlapped requests. Overflow drops the arrival with a warning
//! rather than failing the session.

use std::time::Duration;

use bytes::Bytes;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use simarine_proto::{Message, MessageType};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::TransportError;

use super::{DEFAULT_MQTT_HOST, DEFAULT_MQTT_PORT, DEFAULT_TIMEOUT};

pub struct MqttTransport {
    serial_number: u32,
    timeout: Duration,
    client: AsyncClient,
    inbox: mpsc::Receiver<Bytes>,
    inbox_tx: mpsc::Sender<Bytes>,
    publish_topic: String,
    worker: JoinHandle<()>,
}

impl MqttTransport {
    /// Connect to the vendor broker for the controller with this serial.
    pub async fn connect(serial_number: u32) -> Result<Self, TransportError> {
        let host = std::env::var("SIMARINE_MQTT_HOST")
            .unwrap_or_else(|_| DEFAULT_MQTT_HOST.to_string());
        Self::connect_with(serial_number, &host, DEFAULT_MQTT_PORT, DEFAULT_TIMEOUT).await
    }

    pub async fn connect_with(
        serial_number: u32,
        host: &str,
        port: u16,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client_id = format!("simarine-{serial_number}-{}", std::process::id());
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut eventloop) = AsyncClient::new(options, 16);

        let subscribe_topic = format!("/{serial_number}_DEV");
        let publish_topic = format!("/{serial_number}_APP");
        client
            .subscribe(subscribe_topic.clone(), QoS::AtLeastOnce)
            .await?;
        info!("mqtt bridge to {host}:{port}, subscribed to {subscribe_topic}");

        let (inbox_tx, inbox) = mpsc::channel(1);
        let tx = inbox_tx.clone();
        let worker = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!("mqtt recv on {}: {}", publish.topic, hex::encode(&publish.payload));
                        if tx.try_send(publish.payload).is_err() {
                            warn!("mqtt inbox full, dropping incoming message");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("mqtt connection error: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(MqttTransport {
            serial_number,
            timeout: request_timeout,
            client,
            inbox,
            inbox_tx,
            publish_topic,
            worker,
        })
    }

    pub fn serial_number(&self) -> u32 {
        self.serial_number
    }

    /// Publish one request frame and wait for the next inbound payload.
    ///
    /// Any stale payload sitting in the inbox is discarded first, so a
    /// response dropped by an earlier timeout cannot satisfy this request.
    pub async fn request(
        &mut self,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<Message, TransportError> {
        while self.inbox.try_recv().is_ok() {}

        let frame = Message::build(message_type, payload);
        debug!("mqtt send to {}: {}", self.publish_topic, hex::encode(frame.as_bytes()));
        self.client
            .publish(
                self.publish_topic.clone(),
                QoS::AtLeastOnce,
                false,
                frame.as_bytes().to_vec(),
            )
            .await?;

        let bytes = timeout(self.timeout, self.inbox.recv())
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .ok_or(TransportError::NotOpen)?;

        Ok(Message::parse(bytes, Some(message_type))?)
    }

    pub async fn close(&mut self) {
        let _ = self.client.disconnect().await;
        self.worker.abort();
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn offline_transport() -> MqttTransport {
        // nothing listens on this port; the event loop just retries in the
        // background while the request path exercises the inbox contract
        MqttTransport::connect_with(2_226_384_531, "127.0.0.1", 18983, Duration::from_millis(100))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn topics_are_keyed_by_serial() {
        let mqtt = offline_transport().await;
        assert_eq!(mqtt.publish_topic, "/2226384531_APP");
    }

    #[tokio::test]
    async fn request_times_out_without_response() {
        let mut mqtt = offline_transport().await;
        let err = mqtt.request(MessageType::SystemInfo, &[]).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn request_parses_inbound_payload() {
        let mut mqtt = offline_transport().await;
        let response =
            hex::decode("0000000000ff0184b3ee930011ff010184b3ee93ff020100010015ff97a3").unwrap();
        let tx = mqtt.inbox_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.try_send(Bytes::from(response)).unwrap();
        });

        let msg = mqtt.request(MessageType::SystemInfo, &[]).await.unwrap();
        assert_eq!(msg.serial_number(), 0x84B3EE93);
    }

    #[tokio::test]
    async fn stale_inbox_payload_is_drained_before_publishing() {
        let mut mqtt = offline_transport().await;
        mqtt.inbox_tx
            .try_send(Bytes::from_static(b"stale"))
            .unwrap();
        // the stale (and unparseable) payload must not satisfy the request
        let err = mqtt.request(MessageType::SystemInfo, &[]).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn inbox_overflow_drops_the_arrival() {
        let mqtt = offline_transport().await;
        mqtt.inbox_tx.try_send(Bytes::from_static(b"one")).unwrap();
        assert!(mqtt.inbox_tx.try_send(Bytes::from_static(b"two")).is_err());
    }
}

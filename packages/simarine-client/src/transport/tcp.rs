//! TCP request/response transport.
//!
//! Strictly sequential: one frame out, one frame in, no pipelining. The
//! controller answers every request with exactly one frame that fits in a
//! single segment, so a single bounded read suffices. On a failed request
//! the connection is left open; reconnecting is the caller's decision.

use std::time::Duration;

use simarine_proto::{Message, MessageType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::TransportError;

use super::{env_port, DEFAULT_TCP_PORT, DEFAULT_TIMEOUT, RECV_BUFFER_SIZE};

pub struct TcpTransport {
    host: String,
    port: u16,
    timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>) -> Self {
        Self::new_with(host, env_port("SIMARINE_TCP_PORT", DEFAULT_TCP_PORT), DEFAULT_TIMEOUT)
    }

    pub fn new_with(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        TcpTransport {
            host: host.into(),
            port,
            timeout,
            stream: None,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Connect. Fails with [`TransportError::AlreadyOpen`] when the socket
    /// is live.
    pub async fn open(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Err(TransportError::AlreadyOpen);
        }

        let endpoint = self.endpoint();
        let stream = timeout(self.timeout, TcpStream::connect(&endpoint))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(|source| TransportError::Open {
                endpoint: endpoint.clone(),
                source,
            })?;

        info!("connected to {endpoint}");
        self.stream = Some(stream);
        Ok(())
    }

    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            info!("closed connection to {}", self.endpoint());
        }
    }

    /// Send one request frame and decode the single response frame, which
    /// must carry the request's type.
    pub async fn request(
        &mut self,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<Message, TransportError> {
        let io_timeout = self.timeout;
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;

        let request = Message::build(message_type, payload);
        debug!("tcp send: {}", hex::encode(request.as_bytes()));
        timeout(io_timeout, stream.write_all(request.as_bytes()))
            .await
            .map_err(|_| TransportError::Timeout(io_timeout))??;

        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let n = timeout(io_timeout, stream.read(&mut buf))
            .await
            .map_err(|_| TransportError::Timeout(io_timeout))??;
        buf.truncate(n);
        debug!("tcp recv: {}", hex::encode(&buf));

        Ok(Message::parse(buf, Some(message_type))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simarine_proto::ProtocolError;
    use tokio::net::TcpListener;

    fn transport(host: &str, port: u16) -> TcpTransport {
        TcpTransport::new_with(host, port, Duration::from_millis(500))
    }

    #[tokio::test]
    async fn request_round_trip() {
        let response =
            hex::decode("0000000000ff0184b3ee930011ff010184b3ee93ff020100010015ff97a3").unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; RECV_BUFFER_SIZE];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(&response).await.unwrap();
            buf.truncate(n);
            buf
        });

        let mut tcp = transport("127.0.0.1", port);
        tcp.open().await.unwrap();
        let msg = tcp.request(MessageType::SystemInfo, &[]).await.unwrap();
        assert_eq!(msg.serial_number(), 0x84B3EE93);
        assert_eq!(msg.fields().get(1).unwrap().uint32(), 0x84B3EE93);

        let seen = server.await.unwrap();
        assert_eq!(seen, hex::decode("0000000000ff01000000000003ff89b8").unwrap());
    }

    #[tokio::test]
    async fn rejects_response_of_wrong_type() {
        // a valid DEVICE_SENSOR_COUNT response to a SYSTEM_INFO request
        let response =
            hex::decode("0000000000ff0284b3ee930011ff010100000013ff02010000001aff76e9").unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; RECV_BUFFER_SIZE];
            let _ = stream.read(&mut buf).await.unwrap();
            stream.write_all(&response).await.unwrap();
        });

        let mut tcp = transport("127.0.0.1", port);
        tcp.open().await.unwrap();
        let err = tcp.request(MessageType::SystemInfo, &[]).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Protocol(ProtocolError::MessageTypeMismatch { .. })
        ));
        // the connection stays open; the caller decides whether to reconnect
        assert!(tcp.is_open());
    }

    #[tokio::test]
    async fn open_twice_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut tcp = transport("127.0.0.1", port);
        tcp.open().await.unwrap();
        assert!(matches!(
            tcp.open().await.unwrap_err(),
            TransportError::AlreadyOpen
        ));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let mut tcp = transport("127.0.0.1", port);
        tcp.open().await.unwrap();
        let err = tcp.request(MessageType::SystemInfo, &[]).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn request_without_open_fails() {
        let mut tcp = transport("127.0.0.1", 1);
        assert!(matches!(
            tcp.request(MessageType::SystemInfo, &[]).await.unwrap_err(),
            TransportError::NotOpen
        ));
    }
}

//! UDP broadcast ingestion.
//!
//! The controller announces itself and streams the pressure history on port
//! 43210. The socket is opened with `SO_REUSEADDR`/`SO_REUSEPORT` (other
//! observers may share the port) and `SO_BROADCAST`. The receive loop treats
//! per-receive timeouts as a no-op continuation; only cancellation or a dead
//! socket ends it.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use simarine_proto::Message;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TransportError;

use super::{env_port, DEFAULT_TIMEOUT, DEFAULT_UDP_PORT, RECV_BUFFER_SIZE};

pub struct UdpTransport {
    host: String,
    port: u16,
    timeout: Duration,
    socket: Option<UdpSocket>,
}

impl UdpTransport {
    pub fn new() -> Self {
        Self::new_with("", env_port("SIMARINE_UDP_PORT", DEFAULT_UDP_PORT), DEFAULT_TIMEOUT)
    }

    /// `host` empty means all interfaces.
    pub fn new_with(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        UdpTransport {
            host: host.into(),
            port,
            timeout,
            socket: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn bind_addr(&self) -> Result<SocketAddr, TransportError> {
        let ip: IpAddr = if self.host.is_empty() {
            Ipv4Addr::UNSPECIFIED.into()
        } else {
            self.host.parse().map_err(|_| TransportError::Open {
                endpoint: format!("{}:{}", self.host, self.port),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "invalid bind address",
                ),
            })?
        };
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn open(&mut self) -> Result<(), TransportError> {
        if self.socket.is_some() {
            return Err(TransportError::AlreadyOpen);
        }

        let addr = self.bind_addr()?;
        let open_err = |source| TransportError::Open {
            endpoint: addr.to_string(),
            source,
        };

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(open_err)?;
        socket.set_reuse_address(true).map_err(open_err)?;
        #[cfg(unix)]
        socket.set_reuse_port(true).map_err(open_err)?;
        socket.set_broadcast(true).map_err(open_err)?;
        socket.set_nonblocking(true).map_err(open_err)?;
        socket.bind(&addr.into()).map_err(open_err)?;

        let socket = UdpSocket::from_std(socket.into()).map_err(open_err)?;
        info!("listening for broadcasts on {addr}");
        self.socket = Some(socket);
        Ok(())
    }

    pub fn close(&mut self) {
        if self.socket.take().is_some() {
            info!("closed broadcast socket on port {}", self.port);
        }
    }

    /// Bound address, once open. Useful when bound to an ephemeral port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Receive and decode one datagram.
    pub async fn recv(&self) -> Result<(Message, SocketAddr), TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotOpen)?;

        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let (n, addr) = timeout(self.timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))??;
        buf.truncate(n);
        debug!("udp recv from {addr}: {}", hex::encode(&buf));

        let message = Message::parse(buf, None)?;
        Ok((message, addr))
    }

    /// Receive datagrams until the token is cancelled or the socket dies,
    /// invoking `on_message` per decoded frame. Restartable; malformed
    /// datagrams are logged and skipped (anything may share the broadcast
    /// port).
    pub async fn listen<F>(
        &self,
        token: CancellationToken,
        mut on_message: F,
    ) -> Result<(), TransportError>
    where
        F: FnMut(Message, SocketAddr),
    {
        let socket = self.socket.as_ref().ok_or(TransportError::NotOpen)?;
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            let received = tokio::select! {
                _ = token.cancelled() => return Ok(()),
                r = timeout(self.timeout, socket.recv_from(&mut buf)) => r,
            };

            match received {
                // per-receive timeout is not a termination condition
                Err(_elapsed) => continue,
                Ok(Err(e)) => {
                    info!("broadcast socket closed: {e}");
                    return Ok(());
                }
                Ok(Ok((n, addr))) => match Message::parse(buf[..n].to_vec(), None) {
                    Ok(message) => on_message(message, addr),
                    Err(e) => warn!("dropping malformed datagram from {addr}: {e}"),
                },
            }
        }
    }
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new()
    }
}

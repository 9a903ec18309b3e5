//! Transport and client error taxonomy.
//!
//! Protocol errors ([`ProtocolError`]) indicate corruption and propagate
//! unretried; transport errors carry the underlying cause; timeouts are a
//! distinct category so discovery can map them to "not found".

use std::time::Duration;

use simarine_proto::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Connect or bind failed.
    #[error("failed to open transport to {endpoint}")]
    Open {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport already open")]
    AlreadyOpen,

    #[error("transport not open")]
    NotOpen,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A bounded wait expired.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// MQTT publish/subscribe failure.
    #[error("mqtt: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A mandated field is absent from an otherwise valid response.
    #[error("response missing field {0}")]
    MissingField(u8),

    #[error("udp listener already running")]
    UdpListenerAlreadyRunning,

    #[error("udp listener not running")]
    UdpListenerNotRunning,

    /// Passive discovery heard nothing and no host was given.
    #[error("no controller discovered on the local network")]
    NoControllerFound,
}

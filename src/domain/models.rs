use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform identifier of a peripheral (MAC on Linux/Windows, UUID on macOS).
/// Never interpreted, only compared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedDevice {
    pub name: String,
    pub address: DeviceAddress,
}

/// Lifecycle of the single device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Negotiating,
    Streaming,
    Disconnecting,
}

impl SessionState {
    /// Whether `next` is a legal transition from `self`.
    ///
    /// Disconnected is reachable from everywhere. `Negotiating -> Connected`
    /// is the exhaustion rollback; the session keeps its connection but has
    /// no stream.
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (_, Disconnected) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Connected) => true,
            (Connected, Negotiating) => true,
            (Negotiating, Streaming) => true,
            (Negotiating, Connected) => true,
            (Connected | Negotiating | Streaming, Disconnecting) => true,
            _ => false,
        }
    }
}

/// One decoded notification from the trainer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsFrame {
    pub power: u16,
    pub cadence: u16,
    #[serde(rename = "speed")]
    pub speed_kph: f64,
}

/// A message on the streaming channel: either metrics or an error record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamMessage {
    Metrics(MetricsFrame),
    Error { error: String },
}

impl StreamMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    AlreadyConnected { device: DeviceAddress },
    Connected { device: DeviceAddress },
    Failed { error: TransportError },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectOutcome {
    Disconnected,
    NotConnected,
    /// The transport refused, but local bookkeeping was cleared anyway.
    Failed { error: TransportError },
}

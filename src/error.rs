//! Error taxonomy for the bridge core.
//!
//! Transport and negotiation failures are returned to whoever asked for the
//! operation. Decode failures are per-frame and never end a stream.

use thiserror::Error;
use uuid::Uuid;

/// Failures reported by the BLE transport adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("no Bluetooth adapter available")]
    NoAdapter,

    #[error("device {0} not found")]
    DeviceNotFound(String),

    #[error("device is not connected")]
    NotConnected,

    #[error("characteristic {0} not exposed by device")]
    CharacteristicNotFound(Uuid),

    #[error("characteristic {0} does not support notifications")]
    NotNotifiable(Uuid),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("Bluetooth stack error: {0}")]
    Adapter(String),
}

impl From<btleplug::Error> for TransportError {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::NotConnected => Self::NotConnected,
            btleplug::Error::DeviceNotFound => Self::DeviceNotFound("peripheral".to_string()),
            btleplug::Error::TimedOut(_) => Self::Timeout("Bluetooth operation"),
            other => Self::Adapter(other.to_string()),
        }
    }
}

/// One candidate characteristic that could not be subscribed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAttempt {
    pub characteristic: Uuid,
    pub error: TransportError,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("no candidate characteristics configured")]
    NoCandidates,

    /// Every candidate was tried in order and none subscribed.
    #[error("no supported characteristic ({} candidates failed)", attempts.len())]
    Exhausted { attempts: Vec<FailedAttempt> },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame too short: {len} bytes, need {required}")]
    TooShort { len: usize, required: usize },
}

/// Reasons a stream could not be opened or ended abnormally.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("no device connected")]
    NoDevice,

    #[error("stream already active")]
    AlreadyStreaming,

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// The stream consumer went away. Expected; triggers teardown.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("stream consumer disconnected")]
pub struct ConsumerGone;

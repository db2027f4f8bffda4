//! Transport Adapter seam.
//!
//! The session core only talks to the BLE stack through these traits, so it
//! can be driven by the platform adapter or by a scripted one in tests.

use crate::domain::models::{DeviceAddress, ScannedDevice};
use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Events pushed by a connected link, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Notification { characteristic: Uuid, value: Vec<u8> },
    /// The peripheral dropped the connection.
    Disconnected,
}

pub type LinkEvents = mpsc::UnboundedReceiver<LinkEvent>;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn scan(&self, duration: Duration) -> Result<Vec<ScannedDevice>, TransportError>;

    async fn connect(&self, address: &DeviceAddress) -> Result<Box<dyn Link>, TransportError>;
}

/// An established connection to one peripheral.
#[async_trait]
pub trait Link: Send + Sync {
    async fn is_connected(&self) -> bool;

    async fn disconnect(&self) -> Result<(), TransportError>;

    async fn subscribe(&self, characteristic: Uuid) -> Result<(), TransportError>;

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), TransportError>;

    /// Open a channel of notifications and connection loss. Take it before
    /// subscribing so no early notification is missed.
    async fn events(&self) -> Result<LinkEvents, TransportError>;
}

//! Scripted transport for exercising the session core without a radio.

use crate::domain::models::{DeviceAddress, ScannedDevice};
use crate::error::TransportError;
use crate::infrastructure::bluetooth::transport::{Link, LinkEvent, LinkEvents, Transport};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCall {
    Subscribe(Uuid),
    Unsubscribe(Uuid),
    Disconnect,
}

#[derive(Default)]
pub struct MockTransport {
    devices: Mutex<Vec<ScannedDevice>>,
    unreachable: Mutex<HashSet<String>>,
    rejected: Mutex<HashSet<Uuid>>,
    refuse_disconnect: AtomicBool,
    connect_delay: Mutex<Duration>,
    unsubscribe_delay: Mutex<Duration>,
    links: Mutex<Vec<Arc<MockLinkState>>>,
    connects: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_device(&self, name: &str, address: &str) {
        self.devices.lock().unwrap().push(ScannedDevice {
            name: name.to_string(),
            address: DeviceAddress::new(address),
        });
    }

    pub fn set_unreachable(&self, address: &str) {
        self.unreachable.lock().unwrap().insert(address.to_string());
    }

    /// Subscribing to `characteristic` will fail on every future link.
    pub fn reject_subscribe(&self, characteristic: Uuid) {
        self.rejected.lock().unwrap().insert(characteristic);
    }

    pub fn refuse_disconnect(&self, refuse: bool) {
        self.refuse_disconnect.store(refuse, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    /// Slow down unsubscribe on every future link.
    pub fn set_unsubscribe_delay(&self, delay: Duration) {
        *self.unsubscribe_delay.lock().unwrap() = delay;
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn last_link(&self) -> Arc<MockLinkState> {
        self.links
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no link established")
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn scan(&self, _duration: Duration) -> Result<Vec<ScannedDevice>, TransportError> {
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn connect(&self, address: &DeviceAddress) -> Result<Box<dyn Link>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let delay = *self.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.unreachable.lock().unwrap().contains(address.as_str()) {
            return Err(TransportError::Timeout("connect"));
        }

        let state = Arc::new(MockLinkState {
            address: address.clone(),
            connected: AtomicBool::new(true),
            rejected: self.rejected.lock().unwrap().clone(),
            refuse_disconnect: self.refuse_disconnect.load(Ordering::SeqCst),
            unsubscribe_delay: *self.unsubscribe_delay.lock().unwrap(),
            calls: Mutex::new(Vec::new()),
            events: Mutex::new(None),
        });
        self.links.lock().unwrap().push(state.clone());
        Ok(Box::new(MockLink(state)))
    }
}

pub struct MockLinkState {
    pub address: DeviceAddress,
    connected: AtomicBool,
    rejected: HashSet<Uuid>,
    refuse_disconnect: bool,
    unsubscribe_delay: Duration,
    calls: Mutex<Vec<LinkCall>>,
    events: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
}

impl MockLinkState {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<LinkCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Push a notification as the radio would. Returns false if nobody listens.
    pub fn notify(&self, characteristic: Uuid, value: &[u8]) -> bool {
        match self.events.lock().unwrap().as_ref() {
            Some(tx) => tx
                .send(LinkEvent::Notification {
                    characteristic,
                    value: value.to_vec(),
                })
                .is_ok(),
            None => false,
        }
    }

    /// Simulate the peripheral going out of range.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(tx) = self.events.lock().unwrap().take() {
            let _ = tx.send(LinkEvent::Disconnected);
        }
    }

    fn record(&self, call: LinkCall) {
        self.calls.lock().unwrap().push(call);
    }
}

struct MockLink(Arc<MockLinkState>);

#[async_trait]
impl Link for MockLink {
    async fn is_connected(&self) -> bool {
        self.0.is_connected()
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.0.record(LinkCall::Disconnect);
        if self.0.refuse_disconnect {
            return Err(TransportError::Adapter("disconnect refused".to_string()));
        }
        self.0.connected.store(false, Ordering::SeqCst);
        self.0.events.lock().unwrap().take();
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<(), TransportError> {
        self.0.record(LinkCall::Subscribe(characteristic));
        tokio::task::yield_now().await;
        if !self.0.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if self.0.rejected.contains(&characteristic) {
            return Err(TransportError::CharacteristicNotFound(characteristic));
        }
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), TransportError> {
        self.0.record(LinkCall::Unsubscribe(characteristic));
        if !self.0.unsubscribe_delay.is_zero() {
            tokio::time::sleep(self.0.unsubscribe_delay).await;
        }
        if !self.0.is_connected() {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }

    async fn events(&self) -> Result<LinkEvents, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.0.events.lock().unwrap() = Some(tx);
        Ok(rx)
    }
}

//! Platform BLE transport backed by `btleplug`.

use crate::domain::models::{DeviceAddress, ScannedDevice};
use crate::error::TransportError;
use crate::infrastructure::bluetooth::transport::{Link, LinkEvent, LinkEvents, Transport};
use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Timing for the platform adapter
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// How long a discovery scan runs
    pub scan_duration: Duration,
    /// Bound on connect and service discovery
    pub connect_timeout: Duration,
    /// Bound on a single subscribe/unsubscribe
    pub subscribe_timeout: Duration,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            subscribe_timeout: Duration::from_secs(5),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Devices that could be described; the rest are logged and skipped.
fn keep_described(
    described: impl IntoIterator<Item = (String, Result<ScannedDevice, TransportError>)>,
) -> Vec<ScannedDevice> {
    described
        .into_iter()
        .filter_map(|(id, result)| match result {
            Ok(device) => Some(device),
            Err(e) => {
                warn!(peripheral = %id, "Skipping peripheral: {}", e);
                None
            }
        })
        .collect()
}

/// Drop forwarders that already ended before tracking a new one.
fn track_forwarder(forwarders: &mut Vec<JoinHandle<()>>, handle: JoinHandle<()>) {
    forwarders.retain(|h| !h.is_finished());
    forwarders.push(handle);
}

/// BLE transport using the first adapter of the host.
pub struct BtleTransport {
    adapter: Adapter,
    config: PlatformConfig,
}

impl BtleTransport {
    pub async fn new(config: PlatformConfig) -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;

        match adapter.adapter_info().await {
            Ok(name) => info!(adapter = %name, "Bluetooth adapter ready"),
            Err(e) => debug!("Could not read adapter info: {}", e),
        }

        Ok(Self { adapter, config })
    }

    async fn discover(&self, duration: Duration) -> Result<(), TransportError> {
        info!(duration_ms = millis(duration), "Starting BLE scan");
        self.adapter.start_scan(ScanFilter::default()).await?;
        sleep(duration).await;
        if let Err(e) = self.adapter.stop_scan().await {
            debug!(?e, "Failed to stop scan cleanly");
        }
        Ok(())
    }

    async fn describe(&self, peripheral: &Peripheral) -> Result<ScannedDevice, TransportError> {
        let properties = peripheral.properties().await?;
        let name = properties
            .as_ref()
            .and_then(|p| p.local_name.clone())
            .unwrap_or_else(|| "Unknown device".to_string());

        // macOS hides MAC addresses; fall back to the peripheral id there.
        let address = match properties.as_ref().map(|p| p.address) {
            Some(addr) if addr != BDAddr::default() => addr.to_string(),
            _ => peripheral.id().to_string(),
        };

        Ok(ScannedDevice {
            name,
            address: DeviceAddress::new(address),
        })
    }

    async fn find_peripheral(
        &self,
        address: &DeviceAddress,
    ) -> Result<Option<Peripheral>, TransportError> {
        for peripheral in self.adapter.peripherals().await? {
            let Ok(device) = self.describe(&peripheral).await else {
                continue;
            };
            if device
                .address
                .as_str()
                .eq_ignore_ascii_case(address.as_str())
            {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Transport for BtleTransport {
    async fn scan(&self, duration: Duration) -> Result<Vec<ScannedDevice>, TransportError> {
        self.discover(duration).await?;

        let mut described = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            let result = self.describe(&peripheral).await;
            described.push((peripheral.id().to_string(), result));
        }
        let devices = keep_described(described);
        info!("Found {} devices", devices.len());
        Ok(devices)
    }

    async fn connect(&self, address: &DeviceAddress) -> Result<Box<dyn Link>, TransportError> {
        let peripheral = match self.find_peripheral(address).await? {
            Some(peripheral) => peripheral,
            None => {
                debug!(%address, "Device not known yet, scanning");
                self.discover(self.config.scan_duration).await?;
                self.find_peripheral(address)
                    .await?
                    .ok_or_else(|| TransportError::DeviceNotFound(address.to_string()))?
            }
        };

        if !peripheral.is_connected().await? {
            timeout(self.config.connect_timeout, peripheral.connect())
                .await
                .map_err(|_| TransportError::Timeout("connect"))??;
        }

        timeout(self.config.connect_timeout, peripheral.discover_services())
            .await
            .map_err(|_| TransportError::Timeout("service discovery"))??;

        let characteristics = peripheral.characteristics();
        debug!(%address, "Found {} characteristics", characteristics.len());
        for c in &characteristics {
            debug!("  Characteristic: {} ({:?})", c.uuid, c.properties);
        }

        Ok(Box::new(BtleLink {
            adapter: self.adapter.clone(),
            peripheral,
            subscribe_timeout: self.config.subscribe_timeout,
            forwarders: Mutex::new(Vec::new()),
        }))
    }
}

struct BtleLink {
    adapter: Adapter,
    peripheral: Peripheral,
    subscribe_timeout: Duration,
    /// Notification forwarding tasks, aborted on disconnect
    forwarders: Mutex<Vec<JoinHandle<()>>>,
}

impl BtleLink {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }

    fn abort_forwarders(&self) {
        if let Ok(mut forwarders) = self.forwarders.lock() {
            for handle in forwarders.drain(..) {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl Link for BtleLink {
    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.abort_forwarders();
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<(), TransportError> {
        let c = self.characteristic(characteristic)?;
        if !c
            .properties
            .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
        {
            return Err(TransportError::NotNotifiable(characteristic));
        }

        timeout(self.subscribe_timeout, self.peripheral.subscribe(&c))
            .await
            .map_err(|_| TransportError::Timeout("subscribe"))??;
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), TransportError> {
        let c = self.characteristic(characteristic)?;
        timeout(self.subscribe_timeout, self.peripheral.unsubscribe(&c))
            .await
            .map_err(|_| TransportError::Timeout("unsubscribe"))??;
        Ok(())
    }

    async fn events(&self) -> Result<LinkEvents, TransportError> {
        let mut notifications = self.peripheral.notifications().await?;
        let mut central = self.adapter.events().await?;
        let id = self.peripheral.id();
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    notification = notifications.next() => match notification {
                        Some(n) => {
                            let event = LinkEvent::Notification {
                                characteristic: n.uuid,
                                value: n.value,
                            };
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        None => {
                            debug!("Notification stream ended");
                            let _ = tx.send(LinkEvent::Disconnected);
                            break;
                        }
                    },
                    event = central.next() => match event {
                        Some(CentralEvent::DeviceDisconnected(gone)) if gone == id => {
                            warn!("Peripheral disconnected");
                            let _ = tx.send(LinkEvent::Disconnected);
                            break;
                        }
                        Some(_) => {}
                        None => {
                            let _ = tx.send(LinkEvent::Disconnected);
                            break;
                        }
                    },
                    _ = tx.closed() => break,
                }
            }
        });

        if let Ok(mut forwarders) = self.forwarders.lock() {
            track_forwarder(&mut forwarders, handle);
        }
        Ok(rx)
    }
}

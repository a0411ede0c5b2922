//! btleplug-backed implementation of the link traits.
//!
//! One [`BtleTransport`] wraps one Bluetooth adapter. Scanning is
//! event-driven: the radio scan stops as soon as a matching peripheral
//! advertises, not when the window elapses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vibemon_types::uuids::SENSOR_SERVICE;
use vibemon_types::CharacteristicRole;

use crate::error::{Error, LinkFailureReason, LinkStage, Result};
use crate::link::{LinkEvent, LinkEventStream, PeripheralFilter, SensorLink, SensorTransport};

/// Transport over the first available Bluetooth adapter.
pub struct BtleTransport {
    adapter: Adapter,
}

impl BtleTransport {
    /// Open the first available Bluetooth adapter.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|e| Error::ScanUnavailable(format!("Bluetooth manager: {}", e)))?;
        let adapters = manager
            .adapters()
            .await
            .map_err(|e| Error::ScanUnavailable(format!("adapter enumeration: {}", e)))?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| Error::ScanUnavailable("no Bluetooth adapter available".into()))?;
        Ok(Self { adapter })
    }

    async fn matching_peripheral(
        &self,
        id: &btleplug::platform::PeripheralId,
        filter: &PeripheralFilter,
    ) -> Result<Option<Peripheral>> {
        let peripheral = self.adapter.peripheral(id).await?;
        let Some(properties) = peripheral.properties().await? else {
            return Ok(None);
        };
        // Some platforms ignore the ScanFilter service list, so the
        // advertisement is checked again here.
        if !properties.services.contains(&SENSOR_SERVICE) {
            return Ok(None);
        }
        let address = properties.address.to_string();
        if !filter.matches(properties.local_name.as_deref(), &address) {
            return Ok(None);
        }
        Ok(Some(peripheral))
    }
}

#[async_trait]
impl SensorTransport for BtleTransport {
    async fn scan(
        &self,
        filter: &PeripheralFilter,
        window: Duration,
    ) -> Result<Box<dyn SensorLink>> {
        let mut events = self
            .adapter
            .events()
            .await
            .map_err(|e| Error::ScanUnavailable(format!("adapter events: {}", e)))?;
        self.adapter
            .start_scan(ScanFilter {
                services: vec![SENSOR_SERVICE],
            })
            .await
            .map_err(|e| Error::ScanUnavailable(format!("scan start: {}", e)))?;
        info!(window_secs = window.as_secs(), "scanning for sensor");

        let found = timeout(window, async {
            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                match self.matching_peripheral(&id, filter).await {
                    Ok(Some(peripheral)) => return Some(peripheral),
                    Ok(None) => {}
                    Err(e) => debug!(error = %e, "skipping peripheral"),
                }
            }
            None
        })
        .await;

        if let Err(e) = self.adapter.stop_scan().await {
            warn!(error = %e, "failed to stop scan");
        }

        match found {
            Ok(Some(peripheral)) => {
                let properties = peripheral.properties().await?;
                let name = properties.as_ref().and_then(|p| p.local_name.clone());
                let address = properties
                    .as_ref()
                    .map(|p| p.address.to_string())
                    .unwrap_or_else(|| peripheral.id().to_string());
                info!(?name, %address, "sensor found");
                Ok(Box::new(BtleLink {
                    peripheral,
                    name,
                    address,
                    characteristics: HashMap::new(),
                    disconnected: AtomicBool::new(false),
                }))
            }
            Ok(None) => Err(Error::ScanUnavailable("adapter event stream ended".into())),
            Err(_) => Err(Error::PeripheralUnavailable {
                scan_window: window,
            }),
        }
    }
}

/// An established (or establishing) btleplug connection to one sensor.
pub struct BtleLink {
    peripheral: Peripheral,
    name: Option<String>,
    address: String,
    characteristics: HashMap<Uuid, Characteristic>,
    disconnected: AtomicBool,
}

impl BtleLink {
    fn characteristic(&self, role: CharacteristicRole) -> Result<&Characteristic> {
        let uuid = role.uuid();
        self.characteristics.get(&uuid).ok_or_else(|| {
            Error::link_failure(
                LinkStage::DiscoveringServices,
                LinkFailureReason::CharacteristicMissing {
                    uuid: uuid.to_string(),
                },
            )
        })
    }
}

#[async_trait]
impl SensorLink for BtleLink {
    fn address(&self) -> &str {
        &self.address
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    async fn connect(&mut self) -> Result<()> {
        self.peripheral.connect().await.map_err(|e| {
            Error::link_failure(LinkStage::Connecting, LinkFailureReason::BleError(e.to_string()))
        })
    }

    async fn negotiate_mtu(&mut self, desired: u16) -> Result<u16> {
        // The platform stack negotiates ATT MTU on its own during connect;
        // btleplug exposes no knob for it. Report the requested size as the
        // assumed ceiling.
        debug!(desired, "MTU negotiation delegated to platform stack");
        Ok(desired)
    }

    async fn discover_services(&mut self) -> Result<()> {
        self.peripheral.discover_services().await.map_err(|e| {
            Error::link_failure(
                LinkStage::DiscoveringServices,
                LinkFailureReason::BleError(e.to_string()),
            )
        })?;
        self.characteristics = self
            .peripheral
            .characteristics()
            .into_iter()
            .filter(|c| c.service_uuid == SENSOR_SERVICE)
            .map(|c| (c.uuid, c))
            .collect();
        for role in [
            CharacteristicRole::Control,
            CharacteristicRole::Status,
            CharacteristicRole::Data,
        ] {
            self.characteristic(role)?;
        }
        debug!(
            count = self.characteristics.len(),
            "sensor service characteristics cached"
        );
        Ok(())
    }

    async fn subscribe(&mut self, role: CharacteristicRole) -> Result<()> {
        let characteristic = self.characteristic(role)?.clone();
        // btleplug writes the CCC descriptor under the hood; awaiting here
        // keeps descriptor writes sequential.
        self.peripheral.subscribe(&characteristic).await.map_err(|e| {
            Error::link_failure(
                LinkStage::SubscribingNotifications,
                LinkFailureReason::BleError(e.to_string()),
            )
        })?;
        debug!(%role, "notifications enabled");
        Ok(())
    }

    async fn write_control(&mut self, payload: &[u8]) -> Result<()> {
        let characteristic = self.characteristic(CharacteristicRole::Control)?.clone();
        self.peripheral
            .write(&characteristic, payload, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn read_rssi(&mut self) -> Result<i16> {
        let properties = self.peripheral.properties().await?;
        properties
            .and_then(|p| p.rssi)
            .ok_or(Error::NotConnected)
    }

    async fn link_events(&mut self) -> Result<LinkEventStream> {
        let notifications = self.peripheral.notifications().await?;
        // The notification stream ends when the peripheral drops the
        // connection; surface that as an explicit event.
        let stream = notifications
            .filter_map(|n| async move {
                CharacteristicRole::from_uuid(n.uuid).map(|role| LinkEvent::Notification {
                    role,
                    payload: Bytes::from(n.value),
                })
            })
            .chain(stream::once(async { LinkEvent::Disconnected }));
        Ok(Box::pin(stream))
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.peripheral.disconnect().await {
            warn!(error = %e, address = %self.address, "disconnect failed");
            return Err(e.into());
        }
        info!(address = %self.address, "disconnected");
        Ok(())
    }
}

impl std::fmt::Debug for BtleLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleLink")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("characteristics", &self.characteristics.len())
            .finish()
    }
}

//! Trait abstractions over the Bluetooth link.
//!
//! The connection manager drives these traits instead of talking to
//! btleplug directly, so the whole lifecycle can be exercised against
//! [`crate::mock::MockTransport`] without a radio. The real backend lives
//! in [`crate::btle`].

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use vibemon_types::CharacteristicRole;

use crate::error::Result;

/// Criteria for selecting a peripheral during a scan.
///
/// Peripherals are always filtered on the sensor service UUID in their
/// advertisement; name and address narrow the match further. An empty
/// filter takes the first sensor that advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeripheralFilter {
    /// Match on the advertised local name, if set.
    pub name: Option<String>,
    /// Match on the peripheral address/identifier, if set.
    pub address: Option<String>,
}

impl PeripheralFilter {
    /// Match any peripheral advertising the sensor service.
    pub fn any() -> Self {
        Self::default()
    }

    /// Match a specific local name.
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            address: None,
        }
    }

    /// Match a specific address or platform identifier.
    pub fn by_address(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: Some(address.into()),
        }
    }

    /// Whether a peripheral with the given name/address satisfies the filter.
    pub fn matches(&self, name: Option<&str>, address: &str) -> bool {
        if let Some(want) = &self.name {
            if name != Some(want.as_str()) {
                return false;
            }
        }
        if let Some(want) = &self.address {
            if address != want {
                return false;
            }
        }
        true
    }
}

/// Asynchronous events produced by an established link.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A notification arrived on one of the subscribed characteristics.
    Notification {
        /// Which characteristic produced the payload.
        role: CharacteristicRole,
        /// The raw payload bytes.
        payload: Bytes,
    },
    /// The peripheral dropped the connection.
    Disconnected,
}

/// Stream of [`LinkEvent`]s for an established link.
pub type LinkEventStream = Pin<Box<dyn Stream<Item = LinkEvent> + Send>>;

/// Factory for sensor links: scanning and peripheral selection.
#[async_trait]
pub trait SensorTransport: Send + Sync {
    /// Scan for a peripheral matching `filter`, for at most `window`.
    ///
    /// Returns an unconnected link to the first match. Stops the radio scan
    /// before returning, whether or not a match was found. Fails with
    /// [`crate::Error::PeripheralUnavailable`] when the window elapses and
    /// [`crate::Error::ScanUnavailable`] when scanning cannot run at all.
    async fn scan(&self, filter: &PeripheralFilter, window: Duration) -> Result<Box<dyn SensorLink>>;
}

/// A link to one sensor peripheral, from selection through teardown.
///
/// The setup methods mirror the connection lifecycle stages and must be
/// called in order: [`connect`](Self::connect), then
/// [`negotiate_mtu`](Self::negotiate_mtu), then
/// [`discover_services`](Self::discover_services), then one
/// [`subscribe`](Self::subscribe) per notify characteristic.
#[async_trait]
pub trait SensorLink: Send + Sync {
    /// The peripheral's address or platform identifier.
    fn address(&self) -> &str;

    /// The peripheral's advertised local name, if known.
    fn name(&self) -> Option<&str>;

    /// Open the connection.
    async fn connect(&mut self) -> Result<()>;

    /// Request an ATT payload of `desired` bytes; returns the granted size.
    ///
    /// A refusal is not fatal. Backends that cannot negotiate report the
    /// platform default instead.
    async fn negotiate_mtu(&mut self, desired: u16) -> Result<u16>;

    /// Enumerate GATT services and locate the sensor characteristics.
    async fn discover_services(&mut self) -> Result<()>;

    /// Enable notifications for one characteristic.
    ///
    /// Implementations must complete each descriptor write before the next
    /// one starts; the caller awaits each subscribe in turn.
    async fn subscribe(&mut self, role: CharacteristicRole) -> Result<()>;

    /// Write a control payload with response.
    async fn write_control(&mut self, payload: &[u8]) -> Result<()>;

    /// Read the current signal strength in dBm.
    async fn read_rssi(&mut self) -> Result<i16>;

    /// Take the stream of notifications and disconnect events.
    ///
    /// Callable once per link, after [`discover_services`](Self::discover_services).
    async fn link_events(&mut self) -> Result<LinkEventStream>;

    /// Tear the connection down. Idempotent.
    async fn disconnect(&mut self) -> Result<()>;
}

impl std::fmt::Debug for dyn SensorLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorLink")
            .field("address", &self.address())
            .field("name", &self.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_any_matches_everything() {
        let filter = PeripheralFilter::any();
        assert!(filter.matches(Some("VibeSensor"), "AA:BB:CC:DD:EE:FF"));
        assert!(filter.matches(None, "11:22:33:44:55:66"));
    }

    #[test]
    fn test_filter_by_name() {
        let filter = PeripheralFilter::by_name("VibeSensor");
        assert!(filter.matches(Some("VibeSensor"), "AA:BB:CC:DD:EE:FF"));
        assert!(!filter.matches(Some("Other"), "AA:BB:CC:DD:EE:FF"));
        assert!(!filter.matches(None, "AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_filter_by_address() {
        let filter = PeripheralFilter::by_address("AA:BB:CC:DD:EE:FF");
        assert!(filter.matches(None, "AA:BB:CC:DD:EE:FF"));
        assert!(!filter.matches(None, "11:22:33:44:55:66"));
    }

    #[test]
    fn test_filter_combined() {
        let filter = PeripheralFilter {
            name: Some("VibeSensor".into()),
            address: Some("AA:BB:CC:DD:EE:FF".into()),
        };
        assert!(filter.matches(Some("VibeSensor"), "AA:BB:CC:DD:EE:FF"));
        assert!(!filter.matches(Some("VibeSensor"), "11:22:33:44:55:66"));
    }
}

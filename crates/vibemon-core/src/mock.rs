//! Mock transport for testing without BLE hardware.
//!
//! [`MockTransport`] is scripted per scan: each queued [`ScanOutcome`]
//! answers one `scan()` call, and a successful outcome yields a
//! [`MockLink`] whose [`MockLinkHandle`] lets the test inject
//! notifications, drop the link, and inspect writes and subscribe order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use tokio::sync::mpsc;

use vibemon_types::CharacteristicRole;

use crate::error::{Error, LinkFailureReason, LinkStage, Result};
use crate::link::{LinkEvent, LinkEventStream, PeripheralFilter, SensorLink, SensorTransport};

/// Scripted answer for one `scan()` call.
#[derive(Debug, Clone, Default)]
pub enum ScanOutcome {
    /// Scan succeeds with a link built from the given behavior.
    #[default]
    Found,
    /// Scan succeeds, but the link fails at the given setup stage.
    FoundFailingAt(LinkStage),
    /// The scan window elapses without a match.
    NoPeripheral,
    /// Scanning cannot run at all.
    Unavailable,
}

/// Test-side handle to a [`MockLink`].
#[derive(Debug, Clone)]
pub struct MockLinkHandle {
    events: mpsc::UnboundedSender<LinkEvent>,
    writes: Arc<Mutex<Vec<Bytes>>>,
    subscribed: Arc<Mutex<Vec<CharacteristicRole>>>,
    connected: Arc<AtomicBool>,
    rssi: Arc<AtomicI16>,
}

impl MockLinkHandle {
    /// Inject a notification as if the sensor pushed it.
    pub fn notify(&self, role: CharacteristicRole, payload: impl Into<Bytes>) {
        let _ = self.events.send(LinkEvent::Notification {
            role,
            payload: payload.into(),
        });
    }

    /// Drop the link as if the peripheral disconnected.
    pub fn drop_link(&self) {
        let _ = self.events.send(LinkEvent::Disconnected);
    }

    /// Control payloads written so far.
    pub fn writes(&self) -> Vec<Bytes> {
        self.writes.lock().unwrap().clone()
    }

    /// Roles subscribed so far, in call order.
    pub fn subscribed(&self) -> Vec<CharacteristicRole> {
        self.subscribed.lock().unwrap().clone()
    }

    /// Whether the manager has torn the link down.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Set the RSSI the link reports.
    pub fn set_rssi(&self, rssi: i16) {
        self.rssi.store(rssi, Ordering::SeqCst);
    }
}

/// A scripted in-memory transport.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<VecDeque<ScanOutcome>>>,
    links: Arc<Mutex<Vec<MockLinkHandle>>>,
}

impl MockTransport {
    /// Create a transport whose every scan succeeds with a healthy link.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome for the next unanswered `scan()` call.
    pub fn push_scan(&self, outcome: ScanOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    /// Handles for every link handed out so far, oldest first.
    pub fn links(&self) -> Vec<MockLinkHandle> {
        self.links.lock().unwrap().clone()
    }

    /// Handle for the most recently handed-out link.
    pub fn last_link(&self) -> Option<MockLinkHandle> {
        self.links.lock().unwrap().last().cloned()
    }

    /// Number of `scan()` calls answered with a link.
    pub fn link_count(&self) -> usize {
        self.links.lock().unwrap().len()
    }
}

#[async_trait]
impl SensorTransport for MockTransport {
    async fn scan(
        &self,
        _filter: &PeripheralFilter,
        window: Duration,
    ) -> Result<Box<dyn SensorLink>> {
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ScanOutcome::Found);
        let fail_stage = match outcome {
            ScanOutcome::Found => None,
            ScanOutcome::FoundFailingAt(stage) => Some(stage),
            ScanOutcome::NoPeripheral => {
                return Err(Error::PeripheralUnavailable {
                    scan_window: window,
                });
            }
            ScanOutcome::Unavailable => {
                return Err(Error::ScanUnavailable("mock adapter unavailable".into()));
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = MockLinkHandle {
            events: tx,
            writes: Arc::new(Mutex::new(Vec::new())),
            subscribed: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(AtomicBool::new(false)),
            rssi: Arc::new(AtomicI16::new(-55)),
        };
        self.links.lock().unwrap().push(handle.clone());
        Ok(Box::new(MockLink {
            handle,
            fail_stage,
            events: Some(rx),
            address: format!("MOCK-{:06X}", rand::random::<u32>() % 0xFF_FFFF),
        }))
    }
}

/// The link half handed to the manager by [`MockTransport`].
#[derive(Debug)]
pub struct MockLink {
    handle: MockLinkHandle,
    fail_stage: Option<LinkStage>,
    events: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    address: String,
}

impl MockLink {
    fn fail_if_scripted(&self, stage: LinkStage) -> Result<()> {
        if self.fail_stage == Some(stage) {
            return Err(Error::link_failure(stage, LinkFailureReason::Rejected));
        }
        Ok(())
    }
}

#[async_trait]
impl SensorLink for MockLink {
    fn address(&self) -> &str {
        &self.address
    }

    fn name(&self) -> Option<&str> {
        Some("MockSensor")
    }

    async fn connect(&mut self) -> Result<()> {
        self.fail_if_scripted(LinkStage::Connecting)?;
        self.handle.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn negotiate_mtu(&mut self, desired: u16) -> Result<u16> {
        self.fail_if_scripted(LinkStage::NegotiatingMtu)?;
        Ok(desired.min(247))
    }

    async fn discover_services(&mut self) -> Result<()> {
        self.fail_if_scripted(LinkStage::DiscoveringServices)
    }

    async fn subscribe(&mut self, role: CharacteristicRole) -> Result<()> {
        self.fail_if_scripted(LinkStage::SubscribingNotifications)?;
        self.handle.subscribed.lock().unwrap().push(role);
        Ok(())
    }

    async fn write_control(&mut self, payload: &[u8]) -> Result<()> {
        if !self.handle.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        self.handle
            .writes
            .lock()
            .unwrap()
            .push(Bytes::copy_from_slice(payload));
        Ok(())
    }

    async fn read_rssi(&mut self) -> Result<i16> {
        if !self.handle.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        Ok(self.handle.rssi.load(Ordering::SeqCst))
    }

    async fn link_events(&mut self) -> Result<LinkEventStream> {
        let rx = self
            .events
            .take()
            .ok_or_else(|| Error::link_failure_str(LinkStage::Active, "events already taken"))?;
        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.handle.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

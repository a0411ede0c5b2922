//! Event stream surfaced to consumers of the connection manager.
//!
//! Events are fanned out over a tokio broadcast channel; slow consumers
//! lose the oldest events rather than stalling the manager.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use vibemon_types::{DataFrame, StatusFrame};

/// Lifecycle state of the managed connection.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new states
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ConnectionState {
    /// Not running.
    Idle,
    /// Scanning for the sensor's advertisement.
    Scanning,
    /// Opening the link to the selected peripheral.
    Connecting,
    /// Requesting a larger ATT payload.
    NegotiatingMtu,
    /// Enumerating GATT services.
    DiscoveringServices,
    /// Enabling notifications, one characteristic at a time.
    SubscribingNotifications {
        /// Notify characteristics still waiting for their subscribe.
        remaining: usize,
    },
    /// Steady state, notifications flowing.
    Active,
    /// Winding the link down after a stop request.
    Disconnecting,
    /// Waiting out the backoff delay before the next attempt.
    AwaitingReconnect {
        /// 0-based count of consecutive failed attempts.
        attempt: u32,
        /// Delay before the next attempt starts.
        retry_in: Duration,
    },
}

impl ConnectionState {
    /// Whether control writes are accepted in this state.
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Active)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Scanning => write!(f, "scanning"),
            Self::Connecting => write!(f, "connecting"),
            Self::NegotiatingMtu => write!(f, "negotiating MTU"),
            Self::DiscoveringServices => write!(f, "discovering services"),
            Self::SubscribingNotifications { remaining } => {
                write!(f, "subscribing notifications ({} left)", remaining)
            }
            Self::Active => write!(f, "active"),
            Self::Disconnecting => write!(f, "disconnecting"),
            Self::AwaitingReconnect { attempt, retry_in } => {
                write!(f, "reconnect #{} in {:?}", attempt + 1, retry_in)
            }
        }
    }
}

/// Events emitted by the connection manager.
///
/// All events are serializable for logging and persistence.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SensorEvent {
    /// The connection lifecycle state changed.
    ConnectionStateChanged { state: ConnectionState },
    /// A status frame was decoded.
    StatusUpdate { status: StatusFrame },
    /// A data frame was decoded.
    DataUpdate { data: DataFrame },
    /// A fresh RSSI sample, in dBm.
    SignalStrength { rssi: i16 },
    /// Human-readable diagnostics (malformed frames, stage failures).
    LogMessage { message: String },
}

/// Sender half of the event channel.
pub type EventSender = broadcast::Sender<SensorEvent>;

/// Receiver half of the event channel.
pub type EventReceiver = broadcast::Receiver<SensorEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    broadcast::channel(capacity)
}

/// Fan-out handle used by the manager to publish events.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a dispatcher with its own channel of the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. No-op when nobody is listening.
    pub fn emit(&self, event: SensorEvent) {
        let _ = self.sender.send(event);
    }

    /// Publish a [`SensorEvent::LogMessage`].
    pub fn log(&self, message: impl Into<String>) {
        self.emit(SensorEvent::LogMessage {
            message: message.into(),
        });
    }

    /// Open a new receiver on the channel.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_receivers_does_not_panic() {
        let dispatcher = EventDispatcher::new(8);
        dispatcher.emit(SensorEvent::SignalStrength { rssi: -60 });
    }

    #[tokio::test]
    async fn test_events_reach_all_subscribers() {
        let dispatcher = EventDispatcher::new(8);
        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.subscribe();
        dispatcher.emit(SensorEvent::ConnectionStateChanged {
            state: ConnectionState::Scanning,
        });
        for rx in [&mut a, &mut b] {
            match rx.recv().await.unwrap() {
                SensorEvent::ConnectionStateChanged { state } => {
                    assert_eq!(state, ConnectionState::Scanning);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn test_state_serialization_is_tagged() {
        let json = serde_json::to_string(&ConnectionState::AwaitingReconnect {
            attempt: 2,
            retry_in: Duration::from_secs(8),
        })
        .unwrap();
        assert!(json.contains("\"state\":\"awaiting_reconnect\""));
        assert!(json.contains("\"attempt\":2"));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Active.to_string(), "active");
        assert_eq!(
            ConnectionState::SubscribingNotifications { remaining: 2 }.to_string(),
            "subscribing notifications (2 left)"
        );
    }
}

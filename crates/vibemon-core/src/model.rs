//! In-memory sensor model.
//!
//! The manager folds decoded frames into a [`SensorSnapshot`] and publishes
//! it over a tokio watch channel, so consumers can read the latest state
//! without replaying the event stream.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::watch;

use vibemon_types::{AxisMask, DataFrame, StatusFrame, RATE_CHANNELS};

use crate::events::ConnectionState;

/// Signal strength quality levels based on RSSI values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SignalQuality {
    /// Signal too weak for reliable operation (< -85 dBm).
    Poor,
    /// Usable but may have issues (-85 to -75 dBm).
    Fair,
    /// Good signal strength (-75 to -60 dBm).
    Good,
    /// Excellent signal strength (> -60 dBm).
    Excellent,
}

impl SignalQuality {
    /// Determine signal quality from an RSSI value in dBm.
    pub fn from_rssi(rssi: i16) -> Self {
        match rssi {
            r if r > -60 => SignalQuality::Excellent,
            r if r > -75 => SignalQuality::Good,
            r if r > -85 => SignalQuality::Fair,
            _ => SignalQuality::Poor,
        }
    }

    /// Human-readable description of the signal quality.
    pub fn description(&self) -> &'static str {
        match self {
            SignalQuality::Excellent => "Excellent signal",
            SignalQuality::Good => "Good signal",
            SignalQuality::Fair => "Fair signal - connection may be unstable",
            SignalQuality::Poor => "Poor signal - consider moving closer",
        }
    }
}

/// Latest known state of the sensor and its connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    /// Connection lifecycle state.
    pub connection: ConnectionState,
    /// Filter coefficient last reported by the sensor.
    pub filter: f32,
    /// Axis enable mask last reported by the sensor.
    pub axes: AxisMask,
    /// Per-channel rates in rpm, from the latest status frame.
    pub channel_rates: [f32; RATE_CHANNELS],
    /// Latest decoded data frame, if any arrived this session.
    pub latest_data: Option<DataFrame>,
    /// Battery charge from the latest data frame.
    pub battery_percent: Option<u8>,
    /// Latest RSSI sample in dBm.
    pub rssi: Option<i16>,
    /// When the last frame (status or data) was decoded.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_update: Option<OffsetDateTime>,
}

impl Default for SensorSnapshot {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Idle,
            filter: 0.0,
            axes: AxisMask::OFF,
            channel_rates: [0.0; RATE_CHANNELS],
            latest_data: None,
            battery_percent: None,
            rssi: None,
            last_update: None,
        }
    }
}

impl SensorSnapshot {
    /// Signal quality bucket for the latest RSSI sample.
    pub fn signal_quality(&self) -> Option<SignalQuality> {
        self.rssi.map(SignalQuality::from_rssi)
    }
}

/// Owner side of the snapshot watch channel.
///
/// Frame-folding lives here so the manager and the tests share one
/// interpretation of status frames, data frames, and control echoes.
#[derive(Debug)]
pub struct SensorModel {
    tx: watch::Sender<SensorSnapshot>,
}

impl SensorModel {
    /// Create a model publishing the default (idle, empty) snapshot.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SensorSnapshot::default());
        Self { tx }
    }

    /// Open a new watch receiver on the snapshot.
    pub fn watch(&self) -> watch::Receiver<SensorSnapshot> {
        self.tx.subscribe()
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> SensorSnapshot {
        self.tx.borrow().clone()
    }

    /// Record a connection state change.
    pub fn set_connection(&self, state: ConnectionState) {
        self.tx.send_modify(|s| s.connection = state);
    }

    /// Fold a decoded status frame into the snapshot.
    pub fn apply_status(&self, status: &StatusFrame) {
        self.tx.send_modify(|s| {
            s.filter = status.filter;
            s.axes = status.axes;
            s.channel_rates = status.channel_rates;
            s.last_update = Some(OffsetDateTime::now_utc());
        });
    }

    /// Fold a decoded data frame into the snapshot.
    ///
    /// A control echo on the frame updates filter and axes the same way a
    /// status frame would.
    pub fn apply_data(&self, data: &DataFrame) {
        self.tx.send_modify(|s| {
            if let Some(echo) = data.control_echo {
                s.filter = echo.filter;
                s.axes = echo.axes;
            }
            s.battery_percent = Some(data.battery_percent);
            s.latest_data = Some(data.clone());
            s.last_update = Some(OffsetDateTime::now_utc());
        });
    }

    /// Record a fresh RSSI sample.
    pub fn apply_rssi(&self, rssi: i16) {
        self.tx.send_modify(|s| s.rssi = Some(rssi));
    }

    /// Clear per-session fields after the link goes down.
    ///
    /// Configuration (filter, axes) is kept; it is re-confirmed by the
    /// first status frame of the next session.
    pub fn clear_session(&self) {
        self.tx.send_modify(|s| {
            s.rssi = None;
            s.battery_percent = None;
        });
    }
}

impl Default for SensorModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vibemon_types::ControlEcho;

    #[test]
    fn test_signal_quality_buckets() {
        assert_eq!(SignalQuality::from_rssi(-40), SignalQuality::Excellent);
        assert_eq!(SignalQuality::from_rssi(-60), SignalQuality::Good);
        assert_eq!(SignalQuality::from_rssi(-75), SignalQuality::Fair);
        assert_eq!(SignalQuality::from_rssi(-85), SignalQuality::Poor);
        assert_eq!(SignalQuality::from_rssi(-100), SignalQuality::Poor);
    }

    #[test]
    fn test_status_updates_configuration() {
        let model = SensorModel::new();
        model.apply_status(&StatusFrame {
            filter: 0.7,
            axes: AxisMask::X | AxisMask::Y,
            channel_rates: [120.0; RATE_CHANNELS],
        });
        let snapshot = model.snapshot();
        assert_eq!(snapshot.filter, 0.7);
        assert_eq!(snapshot.axes, AxisMask::X | AxisMask::Y);
        assert_eq!(snapshot.channel_rates, [120.0; RATE_CHANNELS]);
        assert!(snapshot.last_update.is_some());
    }

    #[test]
    fn test_data_echo_updates_configuration() {
        let model = SensorModel::new();
        model.apply_data(&DataFrame {
            primary_rate: 880.0,
            battery_percent: 42,
            channel_magnitudes: vec![0.5],
            control_echo: Some(ControlEcho {
                filter: 0.3,
                axes: AxisMask::Z,
            }),
            spectrum: None,
        });
        let snapshot = model.snapshot();
        assert_eq!(snapshot.filter, 0.3);
        assert_eq!(snapshot.axes, AxisMask::Z);
        assert_eq!(snapshot.battery_percent, Some(42));
        assert!(snapshot.latest_data.is_some());
    }

    #[test]
    fn test_data_without_echo_keeps_configuration() {
        let model = SensorModel::new();
        model.apply_status(&StatusFrame {
            filter: 0.9,
            axes: AxisMask::X,
            channel_rates: [0.0; RATE_CHANNELS],
        });
        model.apply_data(&DataFrame {
            primary_rate: 30.0,
            battery_percent: 80,
            channel_magnitudes: vec![0.0; 7],
            control_echo: None,
            spectrum: None,
        });
        let snapshot = model.snapshot();
        assert_eq!(snapshot.filter, 0.9);
        assert_eq!(snapshot.axes, AxisMask::X);
    }

    #[test]
    fn test_clear_session_keeps_configuration() {
        let model = SensorModel::new();
        model.apply_status(&StatusFrame {
            filter: 0.5,
            axes: AxisMask::Y,
            channel_rates: [0.0; RATE_CHANNELS],
        });
        model.apply_rssi(-62);
        model.clear_session();
        let snapshot = model.snapshot();
        assert_eq!(snapshot.filter, 0.5);
        assert_eq!(snapshot.axes, AxisMask::Y);
        assert_eq!(snapshot.rssi, None);
        assert_eq!(snapshot.battery_percent, None);
    }

    #[tokio::test]
    async fn test_watch_observes_changes() {
        let model = SensorModel::new();
        let mut rx = model.watch();
        model.set_connection(ConnectionState::Scanning);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().connection, ConnectionState::Scanning);
    }
}

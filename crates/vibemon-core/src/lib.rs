//! Connection management for BLE vibration sensors.
//!
//! This crate keeps a Bluetooth Low Energy link to one vibration sensor
//! alive: it scans, connects, negotiates the ATT payload size, subscribes
//! to the status and data notifications, and reconnects with exponential
//! backoff whenever the link drops.
//!
//! # Features
//!
//! - **Managed lifecycle**: one task owns the link from scan to teardown
//! - **Auto-reconnection**: doubling backoff, capped, reset on success
//! - **Typed events**: decoded frames, state changes, and RSSI over a
//!   broadcast channel
//! - **Snapshot watch**: the latest sensor state without replaying events
//! - **Pluggable sinks**: persistence hooks running next to the decoder
//! - **Mock transport**: the whole lifecycle is testable without a radio
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vibemon_core::{BtleTransport, ConnectionManager, ManagerConfig};
//! use vibemon_types::{AxisMask, ControlFrame};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(BtleTransport::new().await?);
//!     let manager = ConnectionManager::new(transport, ManagerConfig::default())?;
//!
//!     let mut events = manager.events();
//!     manager.start().await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

pub mod btle;
pub mod error;
pub mod events;
pub mod link;
pub mod manager;
pub mod mock;
pub mod model;
pub mod reconnect;
pub mod sink;

// Re-export the protocol types so most consumers need one import.
pub use vibemon_types as types;

pub use btle::{BtleLink, BtleTransport};
pub use error::{Error, LinkFailureReason, LinkStage, Result};
pub use events::{ConnectionState, EventReceiver, EventSender, SensorEvent};
pub use link::{LinkEvent, PeripheralFilter, SensorLink, SensorTransport};
pub use manager::{ConnectionManager, ManagerConfig};
pub use mock::{MockLinkHandle, MockTransport, ScanOutcome};
pub use model::{SensorModel, SensorSnapshot, SignalQuality};
pub use reconnect::ReconnectPolicy;
pub use sink::{DataSink, MemorySink};

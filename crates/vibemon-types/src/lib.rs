//! Platform-agnostic types for the vibration sensor protocol.
//!
//! This crate holds everything the wire protocol defines and nothing that
//! depends on a Bluetooth backend: frame records, the binary codec for the
//! three GATT characteristics, and the UUID constants that identify them.
//!
//! # Example
//!
//! ```
//! use vibemon_types::{codec, AxisMask, ControlFrame, ProtocolRevision};
//!
//! let frame = ControlFrame::new(0.5, AxisMask::X | AxisMask::Z);
//! let bytes = codec::encode_control(ProtocolRevision::V2, &frame);
//! assert_eq!(bytes.len(), 30);
//! ```

pub mod codec;
pub mod error;
pub mod frame;
pub mod uuid;

pub use error::{FrameError, FrameResult};
pub use frame::{
    AxisMask, ControlEcho, ControlFrame, DataFrame, ProtocolRevision, SpectrumWindow, StatusFrame,
    RATE_CHANNELS,
};
pub use uuid as uuids;
pub use uuid::CharacteristicRole;

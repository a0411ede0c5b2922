//! Error types for vibemon-core.
//!
//! # Recovery guide
//!
//! | Error | Strategy |
//! |-------|----------|
//! | [`Error::MalformedFrame`] | Drop the frame, keep the connection |
//! | [`Error::BinCountOutOfRange`] | Drop the frame, keep the connection |
//! | [`Error::LinkFailure`] | The manager reconnects with backoff |
//! | [`Error::PeripheralUnavailable`] | The manager rescans with backoff |
//! | [`Error::ScanUnavailable`] | The manager retries with backoff |
//! | [`Error::NotConnected`] | Wait for the Active state, retry |
//! | [`Error::InvalidConfig`] | Fix the configuration and restart |
//!
//! A malformed frame never tears the link down: the payload is discarded,
//! the error is surfaced as an event, and notifications keep flowing.

use std::time::Duration;

use thiserror::Error;

use vibemon_types::FrameError;

/// Errors that can occur when talking to a vibration sensor.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// A notification payload failed to decode.
    #[error("malformed frame: expected {expected} bytes, got {actual}")]
    MalformedFrame {
        /// Expected frame size.
        expected: usize,
        /// Actual payload size received.
        actual: usize,
    },

    /// A spectrum frame claimed more bins than its layout holds.
    #[error("spectrum bin count {count} exceeds capacity {capacity}")]
    BinCountOutOfRange {
        /// The count field carried by the frame.
        count: usize,
        /// The number of bin slots the frame layout provides.
        capacity: usize,
    },

    /// The established link failed mid-setup or mid-session.
    #[error("link failure during {stage}: {reason}")]
    LinkFailure {
        /// The lifecycle stage the failure occurred in.
        stage: LinkStage,
        /// The structured reason for the failure.
        reason: LinkFailureReason,
    },

    /// The scan window elapsed without the sensor advertising.
    #[error("peripheral not found within {scan_window:?}")]
    PeripheralUnavailable {
        /// How long the scan ran before giving up.
        scan_window: Duration,
    },

    /// A command requires the Active state.
    #[error("not connected to sensor")]
    NotConnected,

    /// Scanning cannot run at all (adapter missing, radio off, permissions).
    #[error("scanning unavailable: {0}")]
    ScanUnavailable(String),

    /// Operation timed out.
    #[error("operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Operation was cancelled by shutdown.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error (sinks, exports).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Invalid configuration provided.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Lifecycle stage a link failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum LinkStage {
    /// Opening the link to the peripheral.
    Connecting,
    /// Requesting a larger ATT payload size.
    NegotiatingMtu,
    /// Enumerating GATT services and characteristics.
    DiscoveringServices,
    /// Enabling notifications on the status and data characteristics.
    SubscribingNotifications,
    /// Steady state with notifications flowing.
    Active,
}

impl std::fmt::Display for LinkStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connect"),
            Self::NegotiatingMtu => write!(f, "MTU negotiation"),
            Self::DiscoveringServices => write!(f, "service discovery"),
            Self::SubscribingNotifications => write!(f, "notification subscribe"),
            Self::Active => write!(f, "active session"),
        }
    }
}

/// Structured reasons for a link failure.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LinkFailureReason {
    /// The peripheral dropped the connection.
    Dropped,
    /// The peripheral rejected the connection.
    Rejected,
    /// The stage did not complete in time.
    Timeout,
    /// A required characteristic is missing from the sensor's GATT table.
    CharacteristicMissing { uuid: String },
    /// Generic BLE error.
    BleError(String),
    /// Other/unknown error.
    Other(String),
}

impl std::fmt::Display for LinkFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dropped => write!(f, "connection dropped"),
            Self::Rejected => write!(f, "connection rejected by peripheral"),
            Self::Timeout => write!(f, "stage timed out"),
            Self::CharacteristicMissing { uuid } => {
                write!(f, "characteristic {} not found", uuid)
            }
            Self::BleError(msg) => write!(f, "BLE error: {}", msg),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl Error {
    /// Create a link failure with structured reason.
    pub fn link_failure(stage: LinkStage, reason: LinkFailureReason) -> Self {
        Self::LinkFailure { stage, reason }
    }

    /// Create a link failure with a string reason.
    pub fn link_failure_str(stage: LinkStage, reason: impl Into<String>) -> Self {
        Self::LinkFailure {
            stage,
            reason: LinkFailureReason::Other(reason.into()),
        }
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether the manager recovers from this error by reconnecting.
    ///
    /// Scan-unavailable counts as recoverable: the adapter may come back
    /// (radio toggled, permissions granted) while the backoff loop runs.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::LinkFailure { .. }
                | Self::PeripheralUnavailable { .. }
                | Self::ScanUnavailable(_)
                | Self::Bluetooth(_)
                | Self::Timeout { .. }
        )
    }
}

impl From<FrameError> for Error {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::MalformedFrame { expected, actual } => {
                Error::MalformedFrame { expected, actual }
            }
            FrameError::BinCountOutOfRange { count, capacity } => {
                Error::BinCountOutOfRange { count, capacity }
            }
            // Handle future FrameError variants (non_exhaustive)
            _ => Error::MalformedFrame {
                expected: 0,
                actual: 0,
            },
        }
    }
}

/// Result type alias using vibemon-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

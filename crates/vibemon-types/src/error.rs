//! Error types for frame encoding and decoding.

use thiserror::Error;

/// Errors produced by the packet codec.
///
/// This error type is platform-agnostic and does not include BLE-specific
/// errors (those belong in vibemon-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FrameError {
    /// The buffer length does not match any admissible frame size for the
    /// selected protocol revision. No partial decode is attempted.
    #[error("malformed frame: expected {expected} bytes, got {actual}")]
    MalformedFrame {
        /// The nearest admissible frame size.
        expected: usize,
        /// The length of the rejected buffer.
        actual: usize,
    },

    /// A spectrum frame claimed more bins than its fixed bin area holds.
    #[error("spectrum bin count {count} exceeds capacity {capacity}")]
    BinCountOutOfRange {
        /// The count field carried by the frame.
        count: usize,
        /// The number of bin slots the frame layout provides.
        capacity: usize,
    },
}

/// Result type alias using [`FrameError`].
pub type FrameResult<T> = std::result::Result<T, FrameError>;

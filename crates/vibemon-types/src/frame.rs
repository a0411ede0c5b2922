//! Typed records exchanged with the vibration sensor.
//!
//! All wire layouts are little-endian with fields packed in declared order.
//! Two protocol revisions are in the field; which one a sensor speaks is a
//! configuration input, never inferred from payload size (the two revisions
//! share the 20- and 30-byte status/control sizes).

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of per-channel rate slots carried by revision-2 frames.
pub const RATE_CHANNELS: usize = 6;

/// Number of per-channel magnitude slots in the revision-2 data record.
pub const MAGNITUDE_CHANNELS: usize = 7;

/// Wire firmware revision of the sensor protocol.
///
/// Revision 1 reports a single RMS magnitude and packs the spectrum into a
/// 225-byte frame as a windowed run of bins behind a start/count header.
/// Revision 2 reports seven per-channel magnitudes plus six per-channel
/// rates and packs the spectrum into a 227-byte frame as a dense 104-bin
/// table with no header, always starting at frequency bin 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ProtocolRevision {
    /// First observed firmware revision.
    V1,
    /// Second observed firmware revision.
    #[default]
    V2,
}

impl ProtocolRevision {
    /// Encoded length of a control frame.
    #[must_use]
    pub const fn control_len(self) -> usize {
        match self {
            ProtocolRevision::V1 => 20,
            ProtocolRevision::V2 => 30,
        }
    }

    /// Encoded length of a status frame.
    #[must_use]
    pub const fn status_len(self) -> usize {
        match self {
            ProtocolRevision::V1 => 20,
            ProtocolRevision::V2 => 30,
        }
    }

    /// Encoded length of the short (no-spectrum) data record.
    #[must_use]
    pub const fn data_record_len(self) -> usize {
        match self {
            ProtocolRevision::V1 => 20,
            ProtocolRevision::V2 => 33,
        }
    }

    /// Encoded length of the spectrum data frame.
    #[must_use]
    pub const fn data_spectrum_len(self) -> usize {
        match self {
            ProtocolRevision::V1 => 225,
            ProtocolRevision::V2 => 227,
        }
    }

    /// Number of 16-bit bin slots in the spectrum frame's fixed bin area.
    ///
    /// Both revisions cover bins 1–104 Hz; they differ only in how the bins
    /// are addressed (windowed on revision 1, dense on revision 2).
    #[must_use]
    pub const fn spectrum_capacity(self) -> usize {
        match self {
            ProtocolRevision::V1 | ProtocolRevision::V2 => 104,
        }
    }

    /// Number of per-channel magnitudes in a decoded data frame.
    #[must_use]
    pub const fn magnitude_channels(self) -> usize {
        match self {
            ProtocolRevision::V1 => 1,
            ProtocolRevision::V2 => MAGNITUDE_CHANNELS,
        }
    }

    /// Whether status and control frames carry per-channel rates.
    #[must_use]
    pub const fn has_channel_rates(self) -> bool {
        matches!(self, ProtocolRevision::V2)
    }
}

impl fmt::Display for ProtocolRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolRevision::V1 => write!(f, "v1"),
            ProtocolRevision::V2 => write!(f, "v2"),
        }
    }
}

/// Axis enable flags, wire-encoded as a 16-bit little-endian mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AxisMask(u16);

impl AxisMask {
    /// All axes disabled.
    pub const OFF: AxisMask = AxisMask(0);
    /// X axis enabled.
    pub const X: AxisMask = AxisMask(0b001);
    /// Y axis enabled.
    pub const Y: AxisMask = AxisMask(0b010);
    /// Z axis enabled.
    pub const Z: AxisMask = AxisMask(0b100);

    /// Construct a mask from raw wire bits. Unknown bits are preserved so
    /// a decode/encode round trip is byte-exact.
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        AxisMask(bits)
    }

    /// The raw wire bits.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Whether every axis in `other` is enabled in `self`.
    #[must_use]
    pub const fn contains(self, other: AxisMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no axis is enabled.
    #[must_use]
    pub const fn is_off(self) -> bool {
        self.0 == 0
    }
}

impl core::ops::BitOr for AxisMask {
    type Output = AxisMask;

    fn bitor(self, rhs: AxisMask) -> AxisMask {
        AxisMask(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for AxisMask {
    fn bitor_assign(&mut self, rhs: AxisMask) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for AxisMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_off() {
            return write!(f, "off");
        }
        let mut first = true;
        for (bit, label) in [(AxisMask::X, "X"), (AxisMask::Y, "Y"), (AxisMask::Z, "Z")] {
            if self.contains(bit) {
                if !first {
                    write!(f, "+")?;
                }
                write!(f, "{label}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Configuration pushed to the sensor over the control characteristic.
///
/// `target_rates` is only carried on the wire by revision 2; revision 1
/// encodes zero padding in its place and decodes the slots as zero.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ControlFrame {
    /// Low-pass filter coefficient, expected in `[0, 1]`.
    pub filter: f32,
    /// Axis enable mask.
    pub axes: AxisMask,
    /// Per-channel target rates, raw floats (no wire scaling).
    pub target_rates: [f32; RATE_CHANNELS],
}

impl ControlFrame {
    /// A control frame with just filter and axes set.
    #[must_use]
    pub fn new(filter: f32, axes: AxisMask) -> Self {
        Self {
            filter,
            axes,
            target_rates: [0.0; RATE_CHANNELS],
        }
    }
}

/// Configuration report pushed by the sensor over the status characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StatusFrame {
    /// Low-pass filter coefficient currently applied by the sensor.
    pub filter: f32,
    /// Axis enable mask currently applied by the sensor.
    pub axes: AxisMask,
    /// Per-channel rates in rpm. The wire carries rev/s; the codec scales
    /// by 60 on decode and back on encode. All zero on revision 1.
    pub channel_rates: [f32; RATE_CHANNELS],
}

/// A contiguous run of spectrum bins.
///
/// Bin `i` of `magnitudes` corresponds to frequency bin `start_bin + i`.
/// Magnitudes travel as unsigned 16-bit fixed point with two implied
/// decimal digits. Revision 1 frames carry an explicit start/count header;
/// revision 2 frames are always the full dense table with `start_bin` 1.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpectrumWindow {
    /// Frequency bin index of the first magnitude.
    pub start_bin: u16,
    /// Decoded magnitudes for the window.
    pub magnitudes: Vec<f32>,
}

impl SpectrumWindow {
    /// Iterate `(bin, magnitude)` pairs for the window.
    pub fn bins(&self) -> impl Iterator<Item = (u16, f32)> + '_ {
        self.magnitudes
            .iter()
            .enumerate()
            .map(|(i, &m)| (self.start_bin + i as u16, m))
    }
}

/// Filter/axis echo carried by revision-1 data frames.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ControlEcho {
    /// Filter coefficient the sensor is applying.
    pub filter: f32,
    /// Axis mask the sensor is applying.
    pub axes: AxisMask,
}

/// A measurement frame from the data characteristic.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DataFrame {
    /// Primary rotational rate (revision 2) or dominant peak frequency
    /// (revision 1), raw float.
    pub primary_rate: f32,
    /// Battery charge, 0–100.
    pub battery_percent: u8,
    /// Per-channel magnitudes: one RMS value on revision 1, seven values
    /// on revision 2 (raw floats in the short record, 16-bit fixed point
    /// in the spectrum frame).
    pub channel_magnitudes: Vec<f32>,
    /// Filter/axis echo (revision 1 frames only).
    pub control_echo: Option<ControlEcho>,
    /// Spectrum window, present only in the long frame layout.
    pub spectrum: Option<SpectrumWindow>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_sizes() {
        assert_eq!(ProtocolRevision::V1.control_len(), 20);
        assert_eq!(ProtocolRevision::V2.control_len(), 30);
        assert_eq!(ProtocolRevision::V1.status_len(), 20);
        assert_eq!(ProtocolRevision::V2.status_len(), 30);
        assert_eq!(ProtocolRevision::V1.data_record_len(), 20);
        assert_eq!(ProtocolRevision::V2.data_record_len(), 33);
        assert_eq!(ProtocolRevision::V1.data_spectrum_len(), 225);
        assert_eq!(ProtocolRevision::V2.data_spectrum_len(), 227);
    }

    #[test]
    fn test_spectrum_frame_layout_is_self_consistent() {
        // header + bin area must equal the advertised spectrum length
        for rev in [ProtocolRevision::V1, ProtocolRevision::V2] {
            let header = match rev {
                ProtocolRevision::V1 => 17, // rms + peak + filter + mask + battery + start + count
                ProtocolRevision::V2 => 19, // rate + battery + 7 fixed-point channels
            };
            assert_eq!(
                header + 2 * rev.spectrum_capacity(),
                rev.data_spectrum_len()
            );
        }
    }

    #[test]
    fn test_axis_mask_ops() {
        let mask = AxisMask::X | AxisMask::Z;
        assert_eq!(mask.bits(), 0b101);
        assert!(mask.contains(AxisMask::X));
        assert!(!mask.contains(AxisMask::Y));
        assert!(mask.contains(AxisMask::X | AxisMask::Z));
        assert!(AxisMask::OFF.is_off());
    }

    #[test]
    fn test_axis_mask_display() {
        assert_eq!(AxisMask::OFF.to_string(), "off");
        assert_eq!((AxisMask::X | AxisMask::Z).to_string(), "X+Z");
        assert_eq!((AxisMask::X | AxisMask::Y | AxisMask::Z).to_string(), "X+Y+Z");
    }

    #[test]
    fn test_axis_mask_preserves_unknown_bits() {
        let mask = AxisMask::from_bits(0xFF05);
        assert_eq!(mask.bits(), 0xFF05);
        assert!(mask.contains(AxisMask::X));
    }

    #[test]
    fn test_spectrum_window_bins() {
        let window = SpectrumWindow {
            start_bin: 10,
            magnitudes: vec![1.0, 2.0, 3.0],
        };
        let bins: Vec<_> = window.bins().collect();
        assert_eq!(bins, vec![(10, 1.0), (11, 2.0), (12, 3.0)]);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_data_frame_serialization_round_trip() {
        let frame = DataFrame {
            primary_rate: 29.5,
            battery_percent: 87,
            channel_magnitudes: vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7],
            control_echo: None,
            spectrum: Some(SpectrumWindow {
                start_bin: 4,
                magnitudes: vec![0.25, 0.5],
            }),
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: DataFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }
}

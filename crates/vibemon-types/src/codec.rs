//! Binary codec for the three sensor characteristics.
//!
//! All integers and floats are little-endian. Frame lengths are fixed per
//! [`ProtocolRevision`]; a buffer of any other length is rejected before a
//! single field is read. Scaling rules:
//!
//! - status channel rates travel as rev/s and are exposed in rpm (x60),
//! - spectrum magnitudes, and the per-channel magnitudes of the
//!   revision-2 spectrum frame, travel as `u16` fixed point with two
//!   implied decimal digits (/100 on decode, x100 rounded on encode),
//! - every other float travels as a raw IEEE-754 `f32`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, FrameResult};
use crate::frame::{
    AxisMask, ControlEcho, ControlFrame, DataFrame, ProtocolRevision, SpectrumWindow,
    StatusFrame, RATE_CHANNELS,
};

const RATE_SCALE: f32 = 60.0;
const MAGNITUDE_SCALE: f32 = 100.0;

fn check_len(actual: usize, expected: usize) -> FrameResult<()> {
    if actual != expected {
        return Err(FrameError::MalformedFrame { expected, actual });
    }
    Ok(())
}

/// Decode a control frame, as read back from the control characteristic.
pub fn decode_control(revision: ProtocolRevision, data: &[u8]) -> FrameResult<ControlFrame> {
    check_len(data.len(), revision.control_len())?;
    let mut buf = data;
    let filter = buf.get_f32_le();
    let axes = AxisMask::from_bits(buf.get_u16_le());
    let mut target_rates = [0.0; RATE_CHANNELS];
    if revision.has_channel_rates() {
        for slot in &mut target_rates {
            *slot = buf.get_f32_le();
        }
    }
    Ok(ControlFrame {
        filter,
        axes,
        target_rates,
    })
}

/// Encode a control frame for a write to the control characteristic.
///
/// Revision 1 pads the trailing 14 bytes with zeros; the target rates are
/// not carried on that revision.
pub fn encode_control(revision: ProtocolRevision, frame: &ControlFrame) -> Bytes {
    let mut buf = BytesMut::with_capacity(revision.control_len());
    buf.put_f32_le(frame.filter);
    buf.put_u16_le(frame.axes.bits());
    if revision.has_channel_rates() {
        for rate in frame.target_rates {
            buf.put_f32_le(rate);
        }
    } else {
        buf.put_bytes(0, revision.control_len() - buf.len());
    }
    debug_assert_eq!(buf.len(), revision.control_len());
    buf.freeze()
}

/// Decode a status notification.
pub fn decode_status(revision: ProtocolRevision, data: &[u8]) -> FrameResult<StatusFrame> {
    check_len(data.len(), revision.status_len())?;
    let mut buf = data;
    let filter = buf.get_f32_le();
    let axes = AxisMask::from_bits(buf.get_u16_le());
    let mut channel_rates = [0.0; RATE_CHANNELS];
    if revision.has_channel_rates() {
        for slot in &mut channel_rates {
            *slot = buf.get_f32_le() * RATE_SCALE;
        }
    }
    Ok(StatusFrame {
        filter,
        axes,
        channel_rates,
    })
}

/// Encode a status frame, inverse of [`decode_status`].
pub fn encode_status(revision: ProtocolRevision, frame: &StatusFrame) -> Bytes {
    let mut buf = BytesMut::with_capacity(revision.status_len());
    buf.put_f32_le(frame.filter);
    buf.put_u16_le(frame.axes.bits());
    if revision.has_channel_rates() {
        for rate in frame.channel_rates {
            buf.put_f32_le(rate / RATE_SCALE);
        }
    } else {
        buf.put_bytes(0, revision.status_len() - buf.len());
    }
    debug_assert_eq!(buf.len(), revision.status_len());
    buf.freeze()
}

/// Decode a data notification.
///
/// Each revision admits exactly two lengths: the short per-channel record
/// and the long spectrum frame. Any other length is rejected with the
/// nearer of the two as the expected size.
pub fn decode_data(revision: ProtocolRevision, data: &[u8]) -> FrameResult<DataFrame> {
    let record_len = revision.data_record_len();
    let spectrum_len = revision.data_spectrum_len();
    let with_spectrum = match data.len() {
        n if n == record_len => false,
        n if n == spectrum_len => true,
        n if n > record_len => {
            return Err(FrameError::MalformedFrame {
                expected: spectrum_len,
                actual: n,
            });
        }
        n => {
            return Err(FrameError::MalformedFrame {
                expected: record_len,
                actual: n,
            });
        }
    };

    let mut buf = data;
    match revision {
        ProtocolRevision::V1 => {
            let rms = buf.get_f32_le();
            let peak = buf.get_f32_le();
            let filter = buf.get_f32_le();
            let axes = AxisMask::from_bits(buf.get_u16_le());
            let battery_percent = buf.get_u8();
            let spectrum = if with_spectrum {
                // Short layout pads to the record length; the spectrum
                // layout does not, so the bin header follows directly.
                let start_bin = u16::from(buf.get_u8());
                let count = usize::from(buf.get_u8());
                let capacity = revision.spectrum_capacity();
                if count > capacity {
                    return Err(FrameError::BinCountOutOfRange { count, capacity });
                }
                let mut magnitudes = Vec::with_capacity(count);
                for _ in 0..count {
                    magnitudes.push(f32::from(buf.get_u16_le()) / MAGNITUDE_SCALE);
                }
                Some(SpectrumWindow {
                    start_bin,
                    magnitudes,
                })
            } else {
                None
            };
            Ok(DataFrame {
                primary_rate: peak,
                battery_percent,
                channel_magnitudes: vec![rms],
                control_echo: Some(ControlEcho { filter, axes }),
                spectrum,
            })
        }
        ProtocolRevision::V2 => {
            let primary_rate = buf.get_f32_le();
            let battery_percent = buf.get_u8();
            // The short record carries the channels as raw floats; the
            // spectrum frame packs them as fixed point to make room.
            let channel_magnitudes = (0..revision.magnitude_channels())
                .map(|_| {
                    if with_spectrum {
                        f32::from(buf.get_u16_le()) / MAGNITUDE_SCALE
                    } else {
                        buf.get_f32_le()
                    }
                })
                .collect();
            let spectrum = if with_spectrum {
                // Dense table, no header: one magnitude per bin from 1 Hz.
                let magnitudes = (0..revision.spectrum_capacity())
                    .map(|_| f32::from(buf.get_u16_le()) / MAGNITUDE_SCALE)
                    .collect();
                Some(SpectrumWindow {
                    start_bin: 1,
                    magnitudes,
                })
            } else {
                None
            };
            Ok(DataFrame {
                primary_rate,
                battery_percent,
                channel_magnitudes,
                control_echo: None,
                spectrum,
            })
        }
    }
}

fn fixed_point(value: f32) -> u16 {
    let scaled = (value * MAGNITUDE_SCALE).round();
    scaled.clamp(0.0, f32::from(u16::MAX)) as u16
}

/// Encode a data frame, inverse of [`decode_data`].
///
/// The long layout is produced when `frame.spectrum` is set; bin slots past
/// the given magnitudes are zero-filled so the frame always has its fixed
/// length.
pub fn encode_data(revision: ProtocolRevision, frame: &DataFrame) -> FrameResult<Bytes> {
    let len = if frame.spectrum.is_some() {
        revision.data_spectrum_len()
    } else {
        revision.data_record_len()
    };
    let capacity = revision.spectrum_capacity();
    if let Some(spectrum) = &frame.spectrum {
        if spectrum.magnitudes.len() > capacity {
            return Err(FrameError::BinCountOutOfRange {
                count: spectrum.magnitudes.len(),
                capacity,
            });
        }
    }
    let mut buf = BytesMut::with_capacity(len);
    let channel = |i: usize| frame.channel_magnitudes.get(i).copied().unwrap_or(0.0);

    match revision {
        ProtocolRevision::V1 => {
            let echo = frame.control_echo.unwrap_or(ControlEcho {
                filter: 0.0,
                axes: AxisMask::OFF,
            });
            buf.put_f32_le(channel(0));
            buf.put_f32_le(frame.primary_rate);
            buf.put_f32_le(echo.filter);
            buf.put_u16_le(echo.axes.bits());
            buf.put_u8(frame.battery_percent);
            if let Some(spectrum) = &frame.spectrum {
                buf.put_u8(spectrum.start_bin as u8);
                buf.put_u8(spectrum.magnitudes.len() as u8);
                for &magnitude in &spectrum.magnitudes {
                    buf.put_u16_le(fixed_point(magnitude));
                }
                buf.put_bytes(0, 2 * (capacity - spectrum.magnitudes.len()));
            } else {
                buf.put_bytes(0, len - buf.len());
            }
        }
        ProtocolRevision::V2 => {
            buf.put_f32_le(frame.primary_rate);
            buf.put_u8(frame.battery_percent);
            if let Some(spectrum) = &frame.spectrum {
                for i in 0..revision.magnitude_channels() {
                    buf.put_u16_le(fixed_point(channel(i)));
                }
                // Dense table starting at bin 1, no start/count header.
                for &magnitude in &spectrum.magnitudes {
                    buf.put_u16_le(fixed_point(magnitude));
                }
                buf.put_bytes(0, 2 * (capacity - spectrum.magnitudes.len()));
            } else {
                for i in 0..revision.magnitude_channels() {
                    buf.put_f32_le(channel(i));
                }
            }
        }
    }

    debug_assert_eq!(buf.len(), len);
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v2_status_bytes() -> Vec<u8> {
        let mut data = vec![0x00, 0x00, 0x80, 0x3F, 0x05, 0x00];
        for _ in 0..RATE_CHANNELS {
            data.extend_from_slice(&1.0f32.to_le_bytes());
        }
        data
    }

    #[test]
    fn test_decode_status_v2() {
        let frame = decode_status(ProtocolRevision::V2, &v2_status_bytes()).unwrap();
        assert_eq!(frame.filter, 1.0);
        assert_eq!(frame.axes, AxisMask::X | AxisMask::Z);
        assert_eq!(frame.channel_rates, [60.0; RATE_CHANNELS]);
    }

    #[test]
    fn test_status_round_trip_v2() {
        let bytes = v2_status_bytes();
        let frame = decode_status(ProtocolRevision::V2, &bytes).unwrap();
        assert_eq!(encode_status(ProtocolRevision::V2, &frame).as_ref(), &bytes[..]);
    }

    #[test]
    fn test_decode_status_v1_ignores_rates() {
        let mut data = vec![0u8; 20];
        data[..4].copy_from_slice(&0.5f32.to_le_bytes());
        data[4] = 0x07;
        let frame = decode_status(ProtocolRevision::V1, &data).unwrap();
        assert_eq!(frame.filter, 0.5);
        assert_eq!(frame.axes, AxisMask::X | AxisMask::Y | AxisMask::Z);
        assert_eq!(frame.channel_rates, [0.0; RATE_CHANNELS]);
    }

    #[test]
    fn test_decode_status_wrong_length() {
        let err = decode_status(ProtocolRevision::V2, &[0u8; 29]).unwrap_err();
        assert_eq!(
            err,
            FrameError::MalformedFrame {
                expected: 30,
                actual: 29
            }
        );
    }

    #[test]
    fn test_encode_control_v1_is_zero_padded() {
        let frame = ControlFrame::new(0.25, AxisMask::Y);
        let bytes = encode_control(ProtocolRevision::V1, &frame);
        assert_eq!(bytes.len(), 20);
        assert_eq!(&bytes[..4], &0.25f32.to_le_bytes());
        assert_eq!(&bytes[4..6], &[0x02, 0x00]);
        assert!(bytes[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_control_round_trip_v2() {
        let frame = ControlFrame {
            filter: 0.8,
            axes: AxisMask::X | AxisMask::Z,
            target_rates: [10.0, 20.0, 30.0, 40.0, 50.0, 60.0],
        };
        let bytes = encode_control(ProtocolRevision::V2, &frame);
        assert_eq!(bytes.len(), 30);
        assert_eq!(decode_control(ProtocolRevision::V2, &bytes).unwrap(), frame);
    }

    #[test]
    fn test_decode_data_v2_record() {
        let mut data = Vec::new();
        data.extend_from_slice(&29.5f32.to_le_bytes());
        data.push(87);
        for i in 0..7 {
            data.extend_from_slice(&(i as f32 * 0.5).to_le_bytes());
        }
        let frame = decode_data(ProtocolRevision::V2, &data).unwrap();
        assert_eq!(frame.primary_rate, 29.5);
        assert_eq!(frame.battery_percent, 87);
        assert_eq!(
            frame.channel_magnitudes,
            vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0]
        );
        assert!(frame.control_echo.is_none());
        assert!(frame.spectrum.is_none());
    }

    #[test]
    fn test_decode_data_v2_spectrum() {
        // 4-byte rate, battery, 7 fixed-point channels, 104 dense bins.
        let mut data = Vec::with_capacity(227);
        data.extend_from_slice(&12.0f32.to_le_bytes());
        data.push(55);
        for _ in 0..7 {
            data.extend_from_slice(&100u16.to_le_bytes());
        }
        data.extend_from_slice(&150u16.to_le_bytes());
        data.extend_from_slice(&25u16.to_le_bytes());
        data.extend_from_slice(&4000u16.to_le_bytes());
        data.resize(227, 0);
        let frame = decode_data(ProtocolRevision::V2, &data).unwrap();
        assert_eq!(frame.primary_rate, 12.0);
        assert_eq!(frame.battery_percent, 55);
        assert_eq!(frame.channel_magnitudes, vec![1.0; 7]);
        let spectrum = frame.spectrum.unwrap();
        assert_eq!(spectrum.start_bin, 1);
        assert_eq!(spectrum.magnitudes.len(), 104);
        assert_eq!(&spectrum.magnitudes[..3], &[1.5, 0.25, 40.0]);
        assert!(spectrum.magnitudes[3..].iter().all(|&m| m == 0.0));
    }

    #[test]
    fn test_data_spectrum_round_trip_v2() {
        let frame = DataFrame {
            primary_rate: 29.5,
            battery_percent: 87,
            channel_magnitudes: vec![1.0, 0.25, 12.5, 0.0, 3.75, 0.5, 655.35],
            control_echo: None,
            spectrum: Some(SpectrumWindow {
                start_bin: 1,
                magnitudes: vec![2.0; 104],
            }),
        };
        let bytes = encode_data(ProtocolRevision::V2, &frame).unwrap();
        assert_eq!(bytes.len(), 227);
        assert_eq!(decode_data(ProtocolRevision::V2, &bytes).unwrap(), frame);
    }

    #[test]
    fn test_decode_data_truncated_spectrum() {
        let err = decode_data(ProtocolRevision::V2, &[0u8; 226]).unwrap_err();
        assert_eq!(
            err,
            FrameError::MalformedFrame {
                expected: 227,
                actual: 226
            }
        );
    }

    #[test]
    fn test_decode_data_short_buffer() {
        let err = decode_data(ProtocolRevision::V2, &[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            FrameError::MalformedFrame {
                expected: 33,
                actual: 10
            }
        );
    }

    #[test]
    fn test_decode_data_bin_count_over_capacity() {
        let mut data = vec![0u8; 225];
        data[16] = 105; // count field past the 104-slot bin area
        let err = decode_data(ProtocolRevision::V1, &data).unwrap_err();
        assert_eq!(
            err,
            FrameError::BinCountOutOfRange {
                count: 105,
                capacity: 104
            }
        );
    }

    #[test]
    fn test_decode_data_v1_record_carries_echo() {
        let mut data = Vec::new();
        data.extend_from_slice(&0.42f32.to_le_bytes()); // rms
        data.extend_from_slice(&1750.0f32.to_le_bytes()); // peak
        data.extend_from_slice(&0.9f32.to_le_bytes()); // filter echo
        data.extend_from_slice(&[0x05, 0x00]); // mask echo
        data.push(64); // battery
        data.resize(20, 0);
        let frame = decode_data(ProtocolRevision::V1, &data).unwrap();
        assert_eq!(frame.primary_rate, 1750.0);
        assert_eq!(frame.channel_magnitudes, vec![0.42]);
        assert_eq!(frame.battery_percent, 64);
        let echo = frame.control_echo.unwrap();
        assert_eq!(echo.filter, 0.9);
        assert_eq!(echo.axes, AxisMask::X | AxisMask::Z);
    }

    #[test]
    fn test_data_spectrum_round_trip_v1() {
        let frame = DataFrame {
            primary_rate: 880.0,
            battery_percent: 100,
            channel_magnitudes: vec![0.33],
            control_echo: Some(ControlEcho {
                filter: 1.0,
                axes: AxisMask::X,
            }),
            spectrum: Some(SpectrumWindow {
                start_bin: 2,
                magnitudes: vec![0.01, 12.5, 655.35],
            }),
        };
        let bytes = encode_data(ProtocolRevision::V1, &frame).unwrap();
        assert_eq!(bytes.len(), 225);
        let back = decode_data(ProtocolRevision::V1, &bytes).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_encode_data_rejects_oversized_spectrum() {
        let frame = DataFrame {
            spectrum: Some(SpectrumWindow {
                start_bin: 1,
                magnitudes: vec![0.0; 105],
            }),
            channel_magnitudes: vec![0.0; 7],
            ..DataFrame::default()
        };
        let err = encode_data(ProtocolRevision::V2, &frame).unwrap_err();
        assert_eq!(
            err,
            FrameError::BinCountOutOfRange {
                count: 105,
                capacity: 104
            }
        );
    }

    #[test]
    fn test_encode_data_magnitude_rounding() {
        let frame = DataFrame {
            channel_magnitudes: vec![0.0; 7],
            spectrum: Some(SpectrumWindow {
                start_bin: 1,
                magnitudes: vec![0.004, 0.006, 700000.0],
            }),
            ..DataFrame::default()
        };
        let bytes = encode_data(ProtocolRevision::V2, &frame).unwrap();
        // dense bins follow the 19-byte rate/battery/channels prefix
        let bins = &bytes[19..25];
        assert_eq!(bins, &[0, 0, 1, 0, 0xFF, 0xFF]);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_revision() -> impl Strategy<Value = ProtocolRevision> {
        prop_oneof![Just(ProtocolRevision::V1), Just(ProtocolRevision::V2)]
    }

    proptest! {
        #[test]
        fn prop_status_round_trip(
            rev in arb_revision(),
            filter in 0.0f32..=1.0,
            bits in any::<u16>(),
            rates in prop::array::uniform6(-500.0f32..=500.0),
        ) {
            let frame = StatusFrame {
                filter,
                axes: AxisMask::from_bits(bits),
                channel_rates: if rev.has_channel_rates() { rates } else { [0.0; RATE_CHANNELS] },
            };
            let bytes = encode_status(rev, &frame);
            prop_assert_eq!(bytes.len(), rev.status_len());
            let back = decode_status(rev, &bytes).unwrap();
            prop_assert_eq!(back.axes, frame.axes);
            prop_assert_eq!(back.filter, frame.filter);
            for (a, b) in back.channel_rates.iter().zip(frame.channel_rates.iter()) {
                prop_assert!((a - b).abs() <= 1e-3 * b.abs().max(1.0));
            }
        }

        #[test]
        fn prop_control_round_trip(
            rev in arb_revision(),
            filter in 0.0f32..=1.0,
            bits in any::<u16>(),
            rates in prop::array::uniform6(-500.0f32..=500.0),
        ) {
            let frame = ControlFrame {
                filter,
                axes: AxisMask::from_bits(bits),
                target_rates: if rev.has_channel_rates() { rates } else { [0.0; RATE_CHANNELS] },
            };
            let bytes = encode_control(rev, &frame);
            prop_assert_eq!(bytes.len(), rev.control_len());
            prop_assert_eq!(decode_control(rev, &bytes).unwrap(), frame);
        }

        #[test]
        fn prop_data_rejects_foreign_lengths(rev in arb_revision(), len in 0usize..600) {
            let data = vec![0u8; len];
            let result = decode_data(rev, &data);
            if len == rev.data_record_len() || len == rev.data_spectrum_len() {
                prop_assert!(result.is_ok());
            } else {
                prop_assert!(result.is_err());
            }
        }
    }
}

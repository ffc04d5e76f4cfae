//! PCM format descriptor and RIFF/WAVE header codec
//!
//! A `PcmFormat` describes the one audio format a project agrees on:
//! channel count, sample rate and bit depth. The codec reads and writes
//! the RIFF/WAVE container header that precedes every provider's payload,
//! and the time/byte conversions here are the single source of truth for
//! mapping millisecond windows onto byte ranges.
//!
//! Rounding policy: millisecond-to-byte conversion rounds half-up to the
//! nearest whole frame. Repeated split/merge round trips may drift by at
//! most one frame.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WavelineError};

/// Bit depths accepted for PCM payloads
const SUPPORTED_BIT_DEPTHS: [u16; 4] = [8, 16, 24, 32];

/// Size in bytes of the canonical header emitted by [`WaveHeader::write`]
pub const CANONICAL_HEADER_LEN: u64 = 44;

// ============================================================================
// PcmFormat
// ============================================================================

/// PCM format descriptor: channel count, sample rate, bit depth
///
/// Immutable once constructed; `Clone` yields an independent value.
/// Compatibility is format *identity* (all three fields equal), not mere
/// playback compatibility. It is the invariant
/// [`AudioDataManager`](crate::manager::AudioDataManager) enforces
/// project-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    /// Number of channels (1 = mono, 2 = stereo, ...)
    pub channel_count: u16,
    /// Sample rate in Hz (e.g., 22050, 44100, 48000)
    pub sample_rate: u32,
    /// Bits per sample: 8, 16, 24 or 32
    pub bit_depth: u16,
}

impl PcmFormat {
    /// Create a new format, validating every field
    ///
    /// # Errors
    /// `InvalidFormat` if the channel count is zero, the sample rate is
    /// zero, or the bit depth is not one of 8/16/24/32.
    pub fn new(channel_count: u16, sample_rate: u32, bit_depth: u16) -> Result<Self> {
        if channel_count == 0 {
            return Err(WavelineError::InvalidFormat {
                reason: "channel count must be at least 1".to_string(),
            });
        }
        if sample_rate == 0 {
            return Err(WavelineError::InvalidFormat {
                reason: "sample rate must be greater than 0".to_string(),
            });
        }
        if !SUPPORTED_BIT_DEPTHS.contains(&bit_depth) {
            return Err(WavelineError::InvalidFormat {
                reason: format!("unsupported bit depth: {} (expected 8, 16, 24 or 32)", bit_depth),
            });
        }
        // Derived rates must stay representable; a crafted header can
        // otherwise claim values whose products overflow
        let frame = channel_count as u32 * (bit_depth as u32 / 8);
        if frame > u16::MAX as u32 {
            return Err(WavelineError::InvalidFormat {
                reason: format!(
                    "frame size {} bytes ({} channels at {}-bit) exceeds the representable maximum",
                    frame, channel_count, bit_depth
                ),
            });
        }
        let rate = sample_rate as u64 * frame as u64;
        if rate > u32::MAX as u64 {
            return Err(WavelineError::InvalidFormat {
                reason: format!(
                    "byte rate {} ({} Hz at {} bytes per frame) exceeds the representable maximum",
                    rate, sample_rate, frame
                ),
            });
        }
        Ok(Self {
            channel_count,
            sample_rate,
            bit_depth,
        })
    }

    /// Bytes per second of PCM payload at this format
    ///
    /// Always representable for a [`new`](Self::new)-validated format.
    #[inline]
    pub fn byte_rate(&self) -> u32 {
        (self.sample_rate as u64 * self.frame_size() as u64) as u32
    }

    /// Bytes per frame (one sample across all channels)
    #[inline]
    pub fn frame_size(&self) -> u16 {
        (self.channel_count as u32 * (self.bit_depth as u32 / 8)) as u16
    }

    /// Check whether two formats are identical in all three fields
    pub fn is_compatible_with(&self, other: &PcmFormat) -> bool {
        self.channel_count == other.channel_count
            && self.sample_rate == other.sample_rate
            && self.bit_depth == other.bit_depth
    }

    /// Convert a duration in milliseconds to a payload byte count
    ///
    /// Rounds half-up to the nearest whole frame, so the result is always
    /// frame-aligned and within half a frame of the exact value.
    pub fn bytes_for_ms(&self, duration_ms: u64) -> u64 {
        let frame = self.frame_size() as u128;
        let numer = duration_ms as u128 * self.byte_rate() as u128;
        let denom = 1000u128 * frame;
        let frames = (numer + denom / 2) / denom;
        (frames * frame) as u64
    }

    /// Convert a payload byte count to a duration in milliseconds
    ///
    /// Rounds half-up. Inverse of [`bytes_for_ms`](Self::bytes_for_ms)
    /// up to one frame of drift.
    pub fn ms_for_bytes(&self, byte_count: u64) -> u64 {
        let rate = self.byte_rate() as u128;
        ((byte_count as u128 * 1000 + rate / 2) / rate) as u64
    }
}

impl std::fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ch, {} Hz, {}-bit",
            self.channel_count, self.sample_rate, self.bit_depth
        )
    }
}

// ============================================================================
// RIFF/WAVE header codec
// ============================================================================

/// Parsed RIFF/WAVE container header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveHeader {
    /// PCM format extracted from the `fmt ` chunk
    pub format: PcmFormat,
    /// Byte length of the `data` chunk payload
    pub payload_len: u32,
    /// Offset from the start of the header to the first payload byte
    pub data_offset: u64,
}

impl WaveHeader {
    /// Parse a RIFF/WAVE header at the reader's current position
    ///
    /// Walks the chunk list until the `data` chunk is found, skipping
    /// unknown chunks (and their odd-length padding). The reader is left
    /// positioned at the first payload byte.
    ///
    /// # Errors
    /// `InvalidFormat` if the magic tags are wrong, the `fmt ` chunk is
    /// malformed or internally inconsistent, the compression code is not
    /// plain PCM, or no `data` chunk exists.
    pub fn parse<R: Read>(reader: &mut R) -> Result<Self> {
        let mut consumed: u64 = 0;

        let riff = read_tag(reader, &mut consumed)?;
        if &riff != b"RIFF" {
            return Err(invalid_tag("RIFF", &riff));
        }
        let riff_size = read_u32(reader, &mut consumed)?;
        let wave = read_tag(reader, &mut consumed)?;
        if &wave != b"WAVE" {
            return Err(invalid_tag("WAVE", &wave));
        }
        if riff_size < 4 {
            return Err(WavelineError::InvalidFormat {
                reason: format!("RIFF chunk size {} too small to hold a WAVE form", riff_size),
            });
        }

        let mut format: Option<PcmFormat> = None;

        loop {
            let chunk_id = match read_tag(reader, &mut consumed) {
                Ok(id) => id,
                Err(_) => {
                    return Err(WavelineError::InvalidFormat {
                        reason: "no data chunk found in WAVE form".to_string(),
                    })
                }
            };
            let chunk_size = read_u32(reader, &mut consumed)?;

            match &chunk_id {
                b"fmt " => {
                    if chunk_size < 16 {
                        return Err(WavelineError::InvalidFormat {
                            reason: format!("fmt chunk too short: {} bytes", chunk_size),
                        });
                    }
                    let compression = read_u16(reader, &mut consumed)?;
                    if compression != 1 {
                        return Err(WavelineError::InvalidFormat {
                            reason: format!(
                                "compression code {} is not uncompressed PCM",
                                compression
                            ),
                        });
                    }
                    let channel_count = read_u16(reader, &mut consumed)?;
                    let sample_rate = read_u32(reader, &mut consumed)?;
                    let byte_rate = read_u32(reader, &mut consumed)?;
                    let block_align = read_u16(reader, &mut consumed)?;
                    let bit_depth = read_u16(reader, &mut consumed)?;

                    let parsed = PcmFormat::new(channel_count, sample_rate, bit_depth)?;
                    if block_align != parsed.frame_size() {
                        return Err(WavelineError::InvalidFormat {
                            reason: format!(
                                "block align {} inconsistent with {} channels at {}-bit",
                                block_align, channel_count, bit_depth
                            ),
                        });
                    }
                    if byte_rate != parsed.byte_rate() {
                        return Err(WavelineError::InvalidFormat {
                            reason: format!(
                                "byte rate {} inconsistent with computed rate {}",
                                byte_rate,
                                parsed.byte_rate()
                            ),
                        });
                    }
                    // Skip any extension bytes past the 16 we consumed
                    skip(reader, chunk_size as u64 - 16, &mut consumed)?;
                    format = Some(parsed);
                }
                b"data" => {
                    let format = format.ok_or_else(|| WavelineError::InvalidFormat {
                        reason: "data chunk precedes fmt chunk".to_string(),
                    })?;
                    return Ok(Self {
                        format,
                        payload_len: chunk_size,
                        data_offset: consumed,
                    });
                }
                _ => {
                    // Unknown chunk: skip content plus odd-length pad byte
                    let padded = chunk_size as u64 + (chunk_size as u64 & 1);
                    skip(reader, padded, &mut consumed)?;
                }
            }
        }
    }

    /// Write a canonical 44-byte RIFF/WAVE header
    ///
    /// `payload_len` must be a whole number of frames.
    ///
    /// # Errors
    /// `InvalidFormat` if `payload_len` is not frame-aligned.
    pub fn write<W: Write>(writer: &mut W, format: &PcmFormat, payload_len: u32) -> Result<()> {
        if payload_len % format.frame_size() as u32 != 0 {
            return Err(WavelineError::InvalidFormat {
                reason: format!(
                    "payload length {} is not a whole number of {}-byte frames",
                    payload_len,
                    format.frame_size()
                ),
            });
        }

        writer.write_all(b"RIFF")?;
        writer.write_all(&(36u32 + payload_len).to_le_bytes())?;
        writer.write_all(b"WAVE")?;

        writer.write_all(b"fmt ")?;
        writer.write_all(&16u32.to_le_bytes())?;
        writer.write_all(&1u16.to_le_bytes())?; // PCM
        writer.write_all(&format.channel_count.to_le_bytes())?;
        writer.write_all(&format.sample_rate.to_le_bytes())?;
        writer.write_all(&format.byte_rate().to_le_bytes())?;
        writer.write_all(&format.frame_size().to_le_bytes())?;
        writer.write_all(&format.bit_depth.to_le_bytes())?;

        writer.write_all(b"data")?;
        writer.write_all(&payload_len.to_le_bytes())?;

        Ok(())
    }

    /// Duration of the payload in milliseconds
    pub fn payload_duration_ms(&self) -> u64 {
        self.format.ms_for_bytes(self.payload_len as u64)
    }
}

/// Largest payload the RIFF u32 size fields can describe
const MAX_PAYLOAD_LEN: u64 = u32::MAX as u64 - 36;

/// Validate a payload byte count against the RIFF size field
///
/// # Errors
/// `InvalidFormat` when the count cannot be stored in a u32 RIFF size.
pub(crate) fn payload_len_u32(len: u64) -> Result<u32> {
    if len > MAX_PAYLOAD_LEN {
        return Err(WavelineError::InvalidFormat {
            reason: format!("payload of {} bytes exceeds the RIFF size limit", len),
        });
    }
    Ok(len as u32)
}

// ============================================================================
// Internal read helpers
// ============================================================================

fn read_tag<R: Read>(reader: &mut R, consumed: &mut u64) -> Result<[u8; 4]> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    *consumed += 4;
    Ok(buf)
}

fn read_u32<R: Read>(reader: &mut R, consumed: &mut u64) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    *consumed += 4;
    Ok(u32::from_le_bytes(buf))
}

fn read_u16<R: Read>(reader: &mut R, consumed: &mut u64) -> Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    *consumed += 2;
    Ok(u16::from_le_bytes(buf))
}

fn skip<R: Read>(reader: &mut R, count: u64, consumed: &mut u64) -> Result<()> {
    let copied = std::io::copy(&mut reader.take(count), &mut std::io::sink())?;
    if copied < count {
        return Err(WavelineError::InvalidFormat {
            reason: format!("truncated chunk: expected {} more bytes, found {}", count, copied),
        });
    }
    *consumed += count;
    Ok(())
}

fn invalid_tag(expected: &str, found: &[u8; 4]) -> WavelineError {
    WavelineError::InvalidFormat {
        reason: format!(
            "expected '{}' tag, found {:?}",
            expected,
            String::from_utf8_lossy(found)
        ),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use test_case::test_case;

    use super::*;

    fn scenario_format() -> PcmFormat {
        PcmFormat::new(1, 22050, 16).unwrap()
    }

    #[test]
    fn test_new_rejects_bad_fields() {
        assert!(PcmFormat::new(0, 44100, 16).is_err());
        assert!(PcmFormat::new(1, 0, 16).is_err());
        assert!(PcmFormat::new(1, 44100, 12).is_err());
    }

    #[test]
    fn test_new_rejects_overflowing_derived_rates() {
        // Frame size past u16
        let err = PcmFormat::new(40000, 44100, 16).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_FORMAT");
        // Frame size fits but the byte rate passes u32
        let err = PcmFormat::new(2, 4_000_000_000, 32).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_FORMAT");
    }

    #[test]
    fn test_parse_rejects_overflowing_channel_count() {
        // Hand-built header claiming 40000 channels at 16-bit
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&36u32.to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&40000u16.to_le_bytes());
        bytes.extend_from_slice(&44100u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&0u32.to_le_bytes());

        let err = WaveHeader::parse(&mut Cursor::new(&bytes)).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_FORMAT");
    }

    #[test_case(1, 22050, 16, 44100; "mono 22k 16bit")]
    #[test_case(2, 44100, 16, 176400; "stereo 44k 16bit")]
    #[test_case(1, 48000, 24, 144000; "mono 48k 24bit")]
    fn test_byte_rate(channels: u16, rate: u32, bits: u16, expected: u32) {
        let format = PcmFormat::new(channels, rate, bits).unwrap();
        assert_eq!(format.byte_rate(), expected);
    }

    #[test]
    fn test_compatibility_is_identity() {
        let a = scenario_format();
        let b = scenario_format();
        let c = PcmFormat::new(1, 44100, 16).unwrap();
        assert!(a.is_compatible_with(&b));
        assert!(!a.is_compatible_with(&c));
    }

    #[test]
    fn test_bytes_for_ms_frame_aligned() {
        let format = scenario_format();
        // 5000 ms at 44100 B/s = 220500 bytes, an exact frame multiple
        assert_eq!(format.bytes_for_ms(5000), 220500);
        assert_eq!(format.bytes_for_ms(5000) % format.frame_size() as u64, 0);
        // Fractional case still frame-aligned
        assert_eq!(format.bytes_for_ms(1) % format.frame_size() as u64, 0);
    }

    #[test]
    fn test_ms_byte_roundtrip_drift() {
        let format = scenario_format();
        for ms in [1u64, 7, 333, 999, 5000, 8000, 9001] {
            let bytes = format.bytes_for_ms(ms);
            let back = format.ms_for_bytes(bytes);
            let drift = back.abs_diff(ms);
            // One frame is ~0.045 ms at 22050 Hz, so round-trip drift in ms
            // can only come from the final rounding
            assert!(drift <= 1, "drift {} for {} ms", drift, ms);
        }
    }

    #[test]
    fn test_payload_len_guard() {
        assert_eq!(payload_len_u32(44100).unwrap(), 44100);
        let err = payload_len_u32(5 * 1024 * 1024 * 1024).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_FORMAT");
    }

    #[test]
    fn test_header_roundtrip() {
        let format = scenario_format();
        let payload_len = format.bytes_for_ms(250) as u32;

        let mut bytes = Vec::new();
        WaveHeader::write(&mut bytes, &format, payload_len).unwrap();
        assert_eq!(bytes.len() as u64, CANONICAL_HEADER_LEN);

        let header = WaveHeader::parse(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(header.format, format);
        assert_eq!(header.payload_len, payload_len);
        assert_eq!(header.data_offset, CANONICAL_HEADER_LEN);
    }

    #[test]
    fn test_write_rejects_partial_frames() {
        let format = PcmFormat::new(2, 44100, 16).unwrap();
        let mut bytes = Vec::new();
        // 5 is not a multiple of the 4-byte frame
        let err = WaveHeader::write(&mut bytes, &format, 5).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_FORMAT");
    }

    #[test]
    fn test_parse_rejects_bad_magic() {
        let mut bytes = Vec::new();
        WaveHeader::write(&mut bytes, &scenario_format(), 0).unwrap();
        bytes[0] = b'X';
        let err = WaveHeader::parse(&mut Cursor::new(&bytes)).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_FORMAT");
    }

    #[test]
    fn test_parse_rejects_inconsistent_byte_rate() {
        let mut bytes = Vec::new();
        WaveHeader::write(&mut bytes, &scenario_format(), 0).unwrap();
        // Corrupt the byte-rate field (offset 28 in the canonical header)
        bytes[28] = bytes[28].wrapping_add(1);
        let err = WaveHeader::parse(&mut Cursor::new(&bytes)).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_FORMAT");
    }

    #[test]
    fn test_parse_skips_unknown_chunks() {
        let format = scenario_format();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36u32 + 11 + 8).to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        // An unknown chunk with odd length (3) plus its pad byte
        bytes.extend_from_slice(b"LIST");
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&[1, 2, 3, 0]);
        // Then the canonical fmt + data chunks
        let mut rest = Vec::new();
        WaveHeader::write(&mut rest, &format, 0).unwrap();
        bytes.extend_from_slice(&rest[12..]);

        let header = WaveHeader::parse(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(header.format, format);
        assert_eq!(header.data_offset, bytes.len() as u64);
    }

    #[test]
    fn test_codec_readable_by_hound() {
        // Cross-check against an independent WAV implementation
        let format = PcmFormat::new(1, 22050, 16).unwrap();
        let payload_len = format.bytes_for_ms(100) as u32;

        let mut bytes = Vec::new();
        WaveHeader::write(&mut bytes, &format, payload_len).unwrap();
        bytes.extend(std::iter::repeat(0u8).take(payload_len as usize));

        let reader = hound::WavReader::new(Cursor::new(&bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 22050);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.len(), payload_len / 2);
    }

    #[test]
    fn test_codec_parses_hound_output() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..441 {
                writer.write_sample(0i16).unwrap();
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.set_position(0);

        let header = WaveHeader::parse(&mut cursor).unwrap();
        assert_eq!(header.format, PcmFormat::new(2, 44100, 16).unwrap());
        assert_eq!(header.payload_len, 441 * 4);
    }
}

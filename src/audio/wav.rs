//! WAV / PCM16 encoding
//!
//! Produces the canonical 44-byte-header RIFF container: a 16-byte `fmt `
//! chunk (PCM, mono, 16 bits) followed by a `data` chunk of little-endian
//! signed samples. The container is written in memory with hound.

use std::io::Cursor;
use std::time::Duration;
use thiserror::Error;

/// Size of the canonical RIFF/WAVE/fmt/data header
pub const HEADER_LEN: usize = 44;

/// Sample rate expected by the downstream analysis service
pub const DEFAULT_TARGET_SAMPLE_RATE: u32 = 16000;

const PCM_FORMAT: u16 = 1;
const CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;
const BLOCK_ALIGN: u16 = CHANNELS * BITS_PER_SAMPLE / 8;
const FMT_CHUNK_LEN: u32 = 16;
/// Header bytes counted by the RIFF size field (everything after it but the payload)
const RIFF_OVERHEAD: u32 = 36;

/// WAV encoding and parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WavError {
    #[error("Invalid sample rate: {0}Hz")]
    InvalidSampleRate(u32),

    #[error("Too many samples for a WAV container: {0}")]
    TooLong(usize),

    #[error("Encoded {actual} bytes but header declares {declared}")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("Malformed WAV header: {0}")]
    Malformed(String),

    #[error("WAV write error: {0}")]
    Write(String),
}

/// Convert a float sample to 16-bit PCM
///
/// The sample is clamped to [-1.0, 1.0], then negative values are scaled by
/// 32768 and non-negative ones by 32767, truncating toward zero. NaN maps
/// to 0.
///
/// The product is taken in f64: in f32 it can round up across an integer
/// boundary before truncation.
pub fn quantize(sample: f32) -> i16 {
    let s = f64::from(sample.clamp(-1.0, 1.0));
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Encode mono samples as a 16-bit PCM WAV byte stream at `sample_rate`
///
/// An empty input is valid and yields a bare 44-byte header.
pub fn encode(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, WavError> {
    if sample_rate == 0 {
        return Err(WavError::InvalidSampleRate(sample_rate));
    }
    // Byte rate field must fit in 32 bits
    if sample_rate.checked_mul(u32::from(BLOCK_ALIGN)).is_none() {
        return Err(WavError::InvalidSampleRate(sample_rate));
    }

    let data_size = samples
        .len()
        .checked_mul(usize::from(BLOCK_ALIGN))
        .and_then(|n| u32::try_from(n).ok())
        .filter(|&n| n <= u32::MAX - RIFF_OVERHEAD)
        .ok_or(WavError::TooLong(samples.len()))?;

    let spec = hound::WavSpec {
        channels: CHANNELS,
        sample_rate,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(HEADER_LEN + data_size as usize));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| WavError::Write(format!("header: {}", e)))?;

        for &sample in samples {
            writer
                .write_sample(quantize(sample))
                .map_err(|e| WavError::Write(format!("sample: {}", e)))?;
        }

        writer
            .finalize()
            .map_err(|e| WavError::Write(format!("finalize: {}", e)))?;
    }

    let buf = cursor.into_inner();
    let declared = HEADER_LEN + data_size as usize;
    if buf.len() != declared {
        return Err(WavError::SizeMismatch {
            declared,
            actual: buf.len(),
        });
    }

    Ok(buf)
}

/// Decoded fields of a canonical 44-byte WAV header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub riff_size: u32,
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub data_size: u32,
}

impl WavHeader {
    /// Parse and validate the header of an encoded WAV byte stream
    ///
    /// Rejects anything other than the canonical PCM layout this module
    /// writes, including a declared data size that disagrees with the
    /// payload actually present.
    pub fn parse(bytes: &[u8]) -> Result<Self, WavError> {
        if bytes.len() < HEADER_LEN {
            return Err(WavError::Malformed(format!(
                "{} bytes is shorter than the {}-byte header",
                bytes.len(),
                HEADER_LEN
            )));
        }

        expect_tag(bytes, 0, b"RIFF")?;
        expect_tag(bytes, 8, b"WAVE")?;
        expect_tag(bytes, 12, b"fmt ")?;
        expect_tag(bytes, 36, b"data")?;

        let fmt_len = read_u32(bytes, 16);
        if fmt_len != FMT_CHUNK_LEN {
            return Err(WavError::Malformed(format!("fmt chunk size {}", fmt_len)));
        }

        let header = Self {
            riff_size: read_u32(bytes, 4),
            audio_format: read_u16(bytes, 20),
            channels: read_u16(bytes, 22),
            sample_rate: read_u32(bytes, 24),
            byte_rate: read_u32(bytes, 28),
            block_align: read_u16(bytes, 32),
            bits_per_sample: read_u16(bytes, 34),
            data_size: read_u32(bytes, 40),
        };

        if header.audio_format != PCM_FORMAT {
            return Err(WavError::Malformed(format!(
                "audio format {} is not PCM",
                header.audio_format
            )));
        }
        if header.channels == 0 || header.bits_per_sample == 0 {
            return Err(WavError::Malformed("zero channels or sample width".into()));
        }
        let expected_align = u32::from(header.channels) * u32::from(header.bits_per_sample) / 8;
        if u32::from(header.block_align) != expected_align {
            return Err(WavError::Malformed(format!(
                "block align {} should be {}",
                header.block_align, expected_align
            )));
        }
        if u64::from(header.byte_rate) != u64::from(header.sample_rate) * expected_align as u64 {
            return Err(WavError::Malformed(format!(
                "byte rate {} does not match {}Hz",
                header.byte_rate, header.sample_rate
            )));
        }
        if u64::from(header.riff_size) != u64::from(RIFF_OVERHEAD) + u64::from(header.data_size) {
            return Err(WavError::Malformed(format!(
                "RIFF size {} does not match data size {}",
                header.riff_size, header.data_size
            )));
        }
        let payload = bytes.len() - HEADER_LEN;
        if header.data_size as usize != payload {
            return Err(WavError::Malformed(format!(
                "data size {} but {} payload bytes",
                header.data_size, payload
            )));
        }

        Ok(header)
    }

    /// Number of sample frames in the data chunk
    pub fn sample_count(&self) -> usize {
        (self.data_size / u32::from(self.block_align.max(1))) as usize
    }

    /// Playback duration of the data chunk
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.sample_count() as f64 / f64::from(self.sample_rate))
    }
}

fn expect_tag(bytes: &[u8], offset: usize, tag: &[u8; 4]) -> Result<(), WavError> {
    if &bytes[offset..offset + 4] != tag {
        return Err(WavError::Malformed(format!(
            "expected {:?} at offset {}",
            String::from_utf8_lossy(tag),
            offset
        )));
    }
    Ok(())
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(bytes: &[u8]) -> &[u8] {
        &bytes[HEADER_LEN..]
    }

    #[test]
    fn test_quantize_asymmetric_scaling() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(0.5), 16383);
        assert_eq!(quantize(-0.5), -16384);
        assert_eq!(quantize(1.0), 32767);
        assert_eq!(quantize(-1.0), -32768);
    }

    #[test]
    fn test_quantize_does_not_round_up_before_truncating() {
        // Both products sit just below an integer and round up to it in f32
        assert_eq!(quantize(3.051851e-5), 0);
        assert_eq!(quantize(-1.0 / 32768.0), -1);
        assert_eq!(quantize(0.99999994), 32766);
    }

    #[test]
    fn test_quantize_clamps_out_of_range() {
        for s in [1.0001, 1.5, 7.0, f32::INFINITY] {
            assert_eq!(quantize(s), quantize(1.0), "sample {}", s);
        }
        for s in [-1.0001, -2.0, f32::NEG_INFINITY] {
            assert_eq!(quantize(s), quantize(-1.0), "sample {}", s);
        }
        assert_eq!(quantize(f32::NAN), 0);
    }

    #[test]
    fn test_encode_known_samples() {
        let bytes = encode(&[0.0, 0.5, -0.5, 1.0], 48000).unwrap();

        assert_eq!(bytes.len(), HEADER_LEN + 8);
        assert_eq!(
            payload(&bytes),
            &[0x00, 0x00, 0xFF, 0x3F, 0x00, 0xC0, 0xFF, 0x7F]
        );
    }

    #[test]
    fn test_encode_canonical_header() {
        let bytes = encode(&[0.25; 3], 16000).unwrap();

        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[4..8], &42u32.to_le_bytes());
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[12..16], b"fmt ");
        assert_eq!(&bytes[16..20], &16u32.to_le_bytes());
        assert_eq!(&bytes[20..22], &1u16.to_le_bytes());
        assert_eq!(&bytes[22..24], &1u16.to_le_bytes());
        assert_eq!(&bytes[24..28], &16000u32.to_le_bytes());
        assert_eq!(&bytes[28..32], &32000u32.to_le_bytes());
        assert_eq!(&bytes[32..34], &2u16.to_le_bytes());
        assert_eq!(&bytes[34..36], &16u16.to_le_bytes());
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(&bytes[40..44], &6u32.to_le_bytes());
    }

    #[test]
    fn test_encode_has_no_extra_chunks() {
        let bytes = encode(&[0.0, 0.5, -0.5, 1.0, -1.0, 0.123], 16000).unwrap();

        assert_eq!(bytes.len(), HEADER_LEN + 12);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(WavHeader::parse(&bytes).unwrap().sample_count(), 6);
    }

    #[test]
    fn test_empty_capture_is_bare_header() {
        let bytes = encode(&[], 16000).unwrap();

        assert_eq!(bytes.len(), HEADER_LEN);
        let header = WavHeader::parse(&bytes).unwrap();
        assert_eq!(header.data_size, 0);
        assert_eq!(header.riff_size, 36);
        assert_eq!(header.sample_count(), 0);
    }

    #[test]
    fn test_header_sizes_follow_sample_count() {
        for n in [0usize, 1, 2, 17, 4096, 16000] {
            let samples = vec![0.1; n];
            let bytes = encode(&samples, 16000).unwrap();
            let header = WavHeader::parse(&bytes).unwrap();

            assert_eq!(bytes.len(), HEADER_LEN + 2 * n);
            assert_eq!(header.data_size as usize, 2 * n);
            assert_eq!(header.riff_size as usize, 36 + 2 * n);
        }
    }

    #[test]
    fn test_sample_rate_is_a_parameter() {
        for rate in [8000, 22050, 44100] {
            let header = WavHeader::parse(&encode(&[0.0], rate).unwrap()).unwrap();
            assert_eq!(header.sample_rate, rate);
            assert_eq!(header.byte_rate, rate * 2);
        }
    }

    #[test]
    fn test_invalid_sample_rates() {
        assert_eq!(encode(&[0.0], 0), Err(WavError::InvalidSampleRate(0)));
        assert_eq!(
            encode(&[0.0], u32::MAX),
            Err(WavError::InvalidSampleRate(u32::MAX))
        );
    }

    #[test]
    fn test_parse_rejects_truncated_payload() {
        let mut bytes = encode(&[0.1, 0.2, 0.3], 16000).unwrap();
        bytes.pop();

        assert!(matches!(WavHeader::parse(&bytes), Err(WavError::Malformed(_))));
        assert!(matches!(
            WavHeader::parse(&bytes[..20]),
            Err(WavError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_rejects_wrong_tags() {
        let mut bytes = encode(&[0.1], 16000).unwrap();
        bytes[8..12].copy_from_slice(b"AVI ");

        assert!(matches!(WavHeader::parse(&bytes), Err(WavError::Malformed(_))));
    }

    #[test]
    fn test_duration() {
        let header = WavHeader::parse(&encode(&vec![0.0; 8000], 16000).unwrap()).unwrap();
        assert_eq!(header.duration(), Duration::from_millis(500));
    }
}

//! Lesson audio decoding.
//!
//! Lesson payloads are raw 16-bit little-endian PCM, mono, 24 kHz. Decoding
//! never fails loudly: a malformed payload becomes an empty buffer, which the
//! playback controller treats as "nothing to play".

use std::time::Duration;

use tracing::{debug, warn};

/// Sample rate of lesson payloads in Hz.
pub const LESSON_SAMPLE_RATE: u32 = 24_000;

/// Decoded audio ready for an output device.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn empty(sample_rate: u32, channels: u16) -> Self {
        Self::new(Vec::new(), sample_rate, channels)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playing time of the buffer.
    pub fn duration(&self) -> Duration {
        let frames = self.samples.len() / self.channels.max(1) as usize;
        Duration::from_secs_f64(frames as f64 / self.sample_rate.max(1) as f64)
    }
}

/// Turns an encoded payload into playable samples.
pub trait AudioDecoder: Send + Sync {
    /// Decode `payload`. Malformed input yields an empty buffer.
    fn decode(&self, payload: &[u8]) -> PcmBuffer;
}

/// Decoder for lesson payloads: signed 16-bit little-endian PCM, mono, at
/// [`LESSON_SAMPLE_RATE`]. The format is fixed by the lesson data.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pcm16Decoder;

impl AudioDecoder for Pcm16Decoder {
    fn decode(&self, payload: &[u8]) -> PcmBuffer {
        if payload.is_empty() {
            debug!("Empty audio payload");
            return PcmBuffer::empty(LESSON_SAMPLE_RATE, 1);
        }
        if payload.len() % 2 != 0 {
            warn!(
                bytes = payload.len(),
                "Malformed PCM payload (odd byte count), decoding to silence"
            );
            return PcmBuffer::empty(LESSON_SAMPLE_RATE, 1);
        }

        let samples = payload
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
            .collect();
        PcmBuffer::new(samples, LESSON_SAMPLE_RATE, 1)
    }
}

/// Encode float samples as 16-bit little-endian PCM for test payloads.
#[cfg(test)]
pub(crate) fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|s| {
            let clamped = (s.clamp(-1.0, 1.0) * 32768.0).round();
            (clamped.clamp(i16::MIN as f32, i16::MAX as f32) as i16).to_le_bytes()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_known_samples() {
        let decoder = Pcm16Decoder;
        let mut payload = Vec::new();
        for value in [0i16, 16384, -16384, i16::MIN, i16::MAX] {
            payload.extend_from_slice(&value.to_le_bytes());
        }

        let buffer = decoder.decode(&payload);
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.samples()[0], 0.0);
        assert_eq!(buffer.samples()[1], 0.5);
        assert_eq!(buffer.samples()[2], -0.5);
        assert_eq!(buffer.samples()[3], -1.0);
        assert!(buffer.samples()[4] < 1.0);
        assert_eq!(buffer.sample_rate(), LESSON_SAMPLE_RATE);
        assert_eq!(buffer.channels(), 1);
    }

    #[test]
    fn test_decode_odd_length_is_empty() {
        let decoder = Pcm16Decoder;
        assert!(decoder.decode(&[0x01, 0x02, 0x03]).is_empty());
    }

    #[test]
    fn test_decode_empty_payload() {
        let decoder = Pcm16Decoder;
        assert!(decoder.decode(&[]).is_empty());
    }

    #[test]
    fn test_samples_stay_in_range() {
        let decoder = Pcm16Decoder;
        let payload: Vec<u8> = (0..=255u8).flat_map(|b| [b, b]).collect();
        let buffer = decoder.decode(&payload);
        assert!(buffer
            .samples()
            .iter()
            .all(|s| (-1.0..1.0).contains(s)));
    }

    #[test]
    fn test_duration_at_24khz() {
        let buffer = PcmBuffer::new(vec![0.0; 24_000], LESSON_SAMPLE_RATE, 1);
        assert_eq!(buffer.duration(), Duration::from_secs(1));

        let half = PcmBuffer::new(vec![0.0; 12_000], LESSON_SAMPLE_RATE, 1);
        assert_eq!(half.duration(), Duration::from_millis(500));
    }

    #[test]
    fn test_encode_then_decode_preserves_values() {
        let decoder = Pcm16Decoder;
        let buffer = decoder.decode(&encode_pcm16(&[0.0, 0.25, -0.75]));
        assert_eq!(buffer.samples(), &[0.0, 0.25, -0.75]);
    }

    #[test]
    fn test_encode_clamps_out_of_range() {
        let bytes = encode_pcm16(&[2.0, -2.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MIN);
    }
}

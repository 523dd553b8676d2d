//! PCM16 codec helpers for the live audio wire formats.
//!
//! Outbound audio is 16 kHz mono, inbound audio is 24 kHz mono; both travel
//! as base64 wrapped little-endian signed 16-bit samples.

use crate::error::PlaybackError;
use base64::Engine;

pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;
/// Samples per outbound capture frame.
pub const CAPTURE_FRAME_SIZE: usize = 4096;
pub const CAPTURE_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Converts float samples in [-1, 1] to PCM16 by scaling by 32768 and
/// truncating toward zero. Out-of-range input saturates.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| (s * 32768.0) as i16).collect()
}

/// Encodes float samples as base64 PCM16 little-endian.
pub fn encode_pcm16_base64(samples: &[f32]) -> String {
    let bytes: Vec<u8> = f32_to_pcm16(samples)
        .into_iter()
        .flat_map(|sample| sample.to_le_bytes())
        .collect();
    base64::engine::general_purpose::STANDARD.encode(&bytes)
}

/// Decodes a base64 PCM16 payload into float samples normalized to [-1, 1].
/// A trailing odd byte is ignored.
pub fn decode_pcm16_base64(payload: &str) -> Result<Vec<f32>, PlaybackError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| PlaybackError::Decode(e.to_string()))?;
    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| {
            let v = i16::from_le_bytes([chunk[0], chunk[1]]);
            (v as f32 / 32768.0).clamp(-1.0, 1.0)
        })
        .collect())
}

/// Mixes interleaved multi-channel audio down to mono.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|c| c.iter().sum::<f32>() / c.len() as f32)
        .collect()
}

/// Regroups an arbitrary stream of samples into frames of a fixed size.
#[derive(Debug)]
pub struct Reframer {
    frame_size: usize,
    pending: Vec<f32>,
}

impl Reframer {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Buffers `samples` and returns every frame that is now complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.frame_size;
        if complete == 0 {
            return Vec::new();
        }
        let rest = self.pending.split_off(complete * self.frame_size);
        let full = std::mem::replace(&mut self.pending, rest);
        full.chunks(self.frame_size).map(<[f32]>::to_vec).collect()
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_f32_to_pcm16_scales_and_truncates() {
        let pcm = f32_to_pcm16(&[0.5, -0.5, 0.0, 0.00004, -1.0, 1.0, 2.0]);
        assert_eq!(pcm[0], 16384);
        assert_eq!(pcm[1], -16384);
        assert_eq!(pcm[2], 0);
        // 0.00004 * 32768 = 1.31..., truncated.
        assert_eq!(pcm[3], 1);
        assert_eq!(pcm[4], i16::MIN);
        assert_eq!(pcm[5], i16::MAX);
        assert_eq!(pcm[6], i16::MAX);
    }

    #[test]
    fn test_encode_produces_little_endian_bytes() {
        let encoded = encode_pcm16_base64(&[0.5]);
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(bytes, vec![0x00, 0x40]);
    }

    #[test]
    fn test_decode_known_values() {
        let payload = base64::engine::general_purpose::STANDARD.encode([0x00u8, 0x40, 0x00, 0x80]);
        let samples = decode_pcm16_base64(&payload).unwrap();
        assert_eq!(samples.len(), 2);
        assert_abs_diff_eq!(samples[0], 0.5, epsilon = 0.0001);
        assert_abs_diff_eq!(samples[1], -1.0, epsilon = 0.0001);
    }

    #[test]
    fn test_decode_ignores_odd_trailing_byte() {
        let payload = base64::engine::general_purpose::STANDARD.encode([0x00u8, 0x40, 0x01]);
        assert_eq!(decode_pcm16_base64(&payload).unwrap().len(), 1);
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        assert!(matches!(
            decode_pcm16_base64("invalid_base64!"),
            Err(PlaybackError::Decode(_))
        ));
        assert!(decode_pcm16_base64("").unwrap().is_empty());
    }

    #[test]
    fn test_downmix_stereo() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(downmix(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }

    #[test]
    fn test_reframer_emits_fixed_frames() {
        let mut reframer = Reframer::new(4);
        assert!(reframer.push(&[0.0; 3]).is_empty());
        let frames = reframer.push(&[1.0; 6]);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == 4));
        assert_eq!(frames[0], vec![0.0, 0.0, 0.0, 1.0]);
        assert_eq!(reframer.buffered(), 1);
    }
}

//! PCM conversions between capture/playback buffers and the live wire format.
//!
//! Outbound: 16-bit little-endian mono PCM, base64 encoded, tagged `audio/pcm;rate=<hz>`.
//! Inbound: the same encoding at the output rate, decoded to normalized `f32`.

use base64::Engine;

use super::backend::AudioFrame;
use crate::error::{LiveError, LiveResult};
use crate::live::Blob;

/// Scale applied to RMS to get the 0..100 volume meter value
const VOLUME_SCALE: f32 = 1000.0;

/// Maximum value of the volume meter
pub const MAX_VOLUME: f32 = 100.0;

/// MIME type for raw PCM at a given rate
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Root-mean-square of the samples, normalized to 0.0..=1.0
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / 32768.0;
            v * v
        })
        .sum();

    (sum / samples.len() as f64).sqrt() as f32
}

/// Instantaneous volume for UI feedback
pub fn volume_level(samples: &[i16]) -> f32 {
    (rms(samples) * VOLUME_SCALE).min(MAX_VOLUME)
}

/// Encode a captured frame into the blob the live service expects
pub fn encode_frame(frame: &AudioFrame) -> Blob {
    let pcm_bytes: Vec<u8> = frame.samples.iter().flat_map(|s| s.to_le_bytes()).collect();

    Blob {
        mime_type: pcm_mime_type(frame.sample_rate),
        data: base64::engine::general_purpose::STANDARD.encode(pcm_bytes),
    }
}

/// A decoded synthesized-audio fragment
#[derive(Debug, Clone)]
pub struct AudioFragment {
    /// Mono samples in -1.0..1.0
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioFragment {
    /// Playback duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode a base64 PCM16 payload at `sample_rate`
///
/// Empty payloads, invalid base64 and odd byte counts are rejected.
pub fn decode_fragment(data: &str, sample_rate: u32) -> LiveResult<AudioFragment> {
    if sample_rate == 0 {
        return Err(LiveError::Decode("sample rate must be positive".to_string()));
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| LiveError::Decode(format!("invalid base64 audio: {}", e)))?;

    if bytes.is_empty() {
        return Err(LiveError::Decode("empty audio fragment".to_string()));
    }
    if bytes.len() % 2 != 0 {
        return Err(LiveError::Decode(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / 32768.0)
        .collect();

    Ok(AudioFragment {
        samples,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_of_silence_is_zero() {
        assert_eq!(rms(&[0; 64]), 0.0);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn test_volume_is_capped() {
        let loud = vec![i16::MAX; 256];
        assert_eq!(volume_level(&loud), MAX_VOLUME);
    }

    #[test]
    fn test_volume_of_quiet_signal() {
        // constant 0.01 full-scale -> rms 0.01 -> volume 10
        let quiet = vec![328i16; 100];
        let v = volume_level(&quiet);
        assert!((v - 10.0).abs() < 0.1, "volume was {}", v);
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        let data = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]);
        assert!(matches!(decode_fragment(&data, 24000), Err(LiveError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_fragment("not base64!!", 24000).is_err());
        assert!(decode_fragment("", 24000).is_err());
    }
}

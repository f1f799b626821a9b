use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

/// Sample rate the capture graph runs at (what the speech model expects).
pub const DEFAULT_INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of the audio the speech model streams back.
pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Audio format settings for a realtime session.
///
/// Capture and playback run on separate clocks and must never share a rate
/// assumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioFormat {
    /// Capture sample rate in Hz.
    pub input_sample_rate: u32,
    /// Playback sample rate in Hz.
    pub output_sample_rate: u32,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            input_sample_rate: DEFAULT_INPUT_SAMPLE_RATE,
            output_sample_rate: DEFAULT_OUTPUT_SAMPLE_RATE,
        }
    }
}

impl AudioFormat {
    /// MIME type declared on outbound microphone chunks.
    pub fn input_mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.input_sample_rate)
    }
}

/// Convert floating-point samples to 16-bit signed PCM.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect()
}

/// Convert 16-bit signed PCM to floating-point samples in [-1, 1).
pub fn pcm16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Encode a captured frame as base64 little-endian PCM16.
pub fn encode_pcm16_base64(samples: &[f32]) -> String {
    let bytes: Vec<u8> = f32_to_pcm16(samples)
        .into_iter()
        .flat_map(i16::to_le_bytes)
        .collect();
    BASE64.encode(bytes)
}

/// Decode a base64 little-endian PCM16 mono chunk into floating-point samples.
///
/// A trailing odd byte is dropped.
pub fn decode_pcm16_base64(data: &str) -> Result<Vec<f32>, DomainError> {
    let bytes = BASE64.decode(data.trim())?;
    let pcm: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(pcm16_to_f32(&pcm))
}

/// Duration in seconds of `samples` mono samples at `sample_rate`.
pub fn duration_secs(samples: usize, sample_rate: u32) -> f64 {
    samples as f64 / sample_rate as f64
}

/// Split an optional `data:<mime>;base64,` prefix off an inline payload.
///
/// Returns the declared MIME type (if any) and the bare base64 data.
pub fn split_data_url(payload: &str) -> (Option<&str>, &str) {
    match payload.split_once(',') {
        Some((header, data)) if header.starts_with("data:") => {
            let mime = header
                .trim_start_matches("data:")
                .split(';')
                .next()
                .filter(|m| !m.is_empty());
            (mime, data)
        }
        Some((_, data)) => (None, data),
        None => (None, payload),
    }
}

/// Average interleaved frames down to one channel.
pub fn downmix_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear-interpolation resampler for mono audio.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;
    (0..output_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = pos.fract() as f32;
            match (samples.get(idx), samples.get(idx + 1)) {
                (Some(&a), Some(&b)) => a + (b - a) * frac,
                (Some(&a), None) => a,
                _ => 0.0,
            }
        })
        .collect()
}

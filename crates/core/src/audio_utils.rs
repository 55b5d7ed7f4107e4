use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

// Sample rates of the voice backend's PCM16 streams.
pub const GEMINI_LIVE_INPUT_SAMPLE_RATE: u32 = 16_000;
pub const GEMINI_LIVE_OUTPUT_SAMPLE_RATE: u32 = 24_000;

const RESAMPLER_CHUNK_FRAMES: usize = 480;

/// Creates a mono resampler converting between two sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Resamples an unbounded mono stream arriving in arbitrarily sized blocks.
///
/// Samples that do not fill a whole resampler chunk are kept for the next
/// call. Equal rates pass through untouched.
pub struct StreamResampler {
    inner: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> anyhow::Result<Self> {
        let inner = if from_rate == to_rate {
            None
        } else {
            Some(create_resampler(
                from_rate as f64,
                to_rate as f64,
                RESAMPLER_CHUNK_FRAMES,
            )?)
        };
        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(resampler) = self.inner.as_mut() else {
            return samples.to_vec();
        };
        self.pending.extend_from_slice(samples);
        let mut out = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            match resampler.process(&[chunk], None) {
                Ok(frames) => out.extend_from_slice(&frames[0]),
                Err(e) => {
                    tracing::error!("Resampling failed: {}", e);
                    break;
                }
            }
        }
        out
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(resampler) = self.inner.as_mut() {
            resampler.reset();
        }
    }
}

/// Decodes a base64 string of PCM16 little-endian audio into `f32` samples in
/// `[-1.0, 1.0]`.
pub fn decode_f32_from_base64_i16(base64_fragment: &str) -> Vec<f32> {
    if let Ok(pcm16_bytes) = base64::engine::general_purpose::STANDARD.decode(base64_fragment) {
        f32_from_pcm16_bytes(&pcm16_bytes)
    } else {
        tracing::error!("Failed to decode base64 audio fragment");
        Vec::new()
    }
}

/// Encodes `f32` samples as base64 PCM16 little-endian.
pub fn encode_f32_to_base64_i16(pcm32: &[f32]) -> String {
    base64::engine::general_purpose::STANDARD.encode(pcm16_bytes_from_f32(pcm32))
}

/// Interprets little-endian byte pairs as PCM16 samples. A trailing odd byte
/// is ignored.
pub fn f32_from_pcm16_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| {
            let v = i16::from_le_bytes([chunk[0], chunk[1]]);
            (v as f32 / 32768.0).clamp(-1.0, 1.0)
        })
        .collect()
}

pub fn pcm16_bytes_from_f32(pcm32: &[f32]) -> Vec<u8> {
    pcm32
        .iter()
        .flat_map(|&sample| {
            let v = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            v.to_le_bytes()
        })
        .collect()
}

/// Averages interleaved frames down to one channel.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

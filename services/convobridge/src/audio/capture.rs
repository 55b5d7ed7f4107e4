//! Microphone capture using cpal.
//!
//! cpal streams are not `Send`, so each acquired microphone gets its own
//! thread that owns the input stream until the microphone is released.

use super::devices::{Direction, find_device};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use convobridge_core::{
    AcquisitionError,
    audio::{AudioCapture, Microphone},
    audio_utils::{downmix_to_mono, pcm16_bytes_from_f32},
};
use cpal::SampleFormat;
use cpal::traits::{DeviceTrait, StreamTrait};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, trace};

/// Frames buffered between the audio callback and the transport.
const FRAME_QUEUE: usize = 64;

/// [`AudioCapture`] over a cpal input device.
#[derive(Debug, Default, Clone)]
pub struct CpalCapture {
    device_name: Option<String>,
}

impl CpalCapture {
    /// `device_name` selects an input device; `None` uses the host default.
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

#[async_trait]
impl AudioCapture for CpalCapture {
    async fn acquire(&self) -> Result<Microphone, AcquisitionError> {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<u32>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let device_name = self.device_name.clone();

        std::thread::Builder::new()
            .name("convobridge-mic".into())
            .spawn(move || {
                let stream = match open_input_stream(device_name.as_deref(), frame_tx) {
                    Ok((stream, sample_rate)) => {
                        if ready_tx.send(Ok(sample_rate)).is_err() {
                            return;
                        }
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Returns once the release closure drops the sender.
                let _ = stop_rx.recv();
                drop(stream);
                info!("Microphone capture stopped.");
            })
            .map_err(|e| AcquisitionError::new(format!("Could not start audio capture: {e}")))?;

        let sample_rate = match ready_rx.await {
            Ok(Ok(sample_rate)) => sample_rate,
            Ok(Err(e)) => {
                error!("Microphone acquisition failed: {e:#}");
                return Err(AcquisitionError::new(format!(
                    "Could not access the microphone: {e:#}"
                )));
            }
            Err(_) => {
                return Err(AcquisitionError::new(
                    "Audio capture stopped before the microphone opened",
                ));
            }
        };

        Ok(Microphone::new(sample_rate, frame_rx, move || drop(stop_tx)))
    }
}

fn open_input_stream(
    device_name: Option<&str>,
    frame_tx: mpsc::Sender<Bytes>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = find_device(&host, Direction::Input, device_name)?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let supported = device
        .default_input_config()
        .with_context(|| format!("No usable input configuration for '{name}'"))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let config: cpal::StreamConfig = supported.config();
    let err_fn = |err| error!("Audio input stream error: {}", err);

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                forward_frame(&frame_tx, data, channels);
            },
            err_fn,
            None,
        )?,
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                forward_frame(&frame_tx, &samples, channels);
            },
            err_fn,
            None,
        )?,
        other => bail!("Unsupported input sample format {other:?} on '{name}'"),
    };
    stream.play().context("Failed to start the input stream")?;

    info!(device = %name, sample_rate, channels, "Microphone capture started.");
    Ok((stream, sample_rate))
}

/// Mono PCM16 little-endian bytes of one interleaved callback buffer.
fn encode_frame(data: &[f32], channels: usize) -> Bytes {
    Bytes::from(pcm16_bytes_from_f32(&downmix_to_mono(data, channels)))
}

fn forward_frame(tx: &mpsc::Sender<Bytes>, data: &[f32], channels: usize) {
    match tx.try_send(encode_frame(data, channels)) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            trace!("Microphone queue full, dropping a frame.");
        }
        // The session is gone; capture stops when the microphone is released.
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}

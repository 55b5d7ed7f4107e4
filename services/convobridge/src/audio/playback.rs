//! Speaker output using cpal with a lock-free ring buffer.
//!
//! Decoded remote audio is resampled to the device rate and queued in a
//! `ringbuf` ring; the output callback drains it, applies the gain and
//! updates the level meter. Like capture, the cpal stream lives on its own
//! thread.

use super::devices::{Direction, find_device};
use anyhow::{Context, Result, anyhow, bail};
use convobridge_core::audio::{AudioSink, LevelMeter, Volume};
use convobridge_core::audio_utils::StreamResampler;
use cpal::SampleFormat;
use cpal::traits::{DeviceTrait, StreamTrait};
use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Producer, Split},
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

/// Seconds of audio the playback queue can hold.
const QUEUE_SECONDS: usize = 60;

/// State shared between the sink handle and the output callback.
struct Shared {
    gain: AtomicU32,
    level: AtomicU32,
    flush: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            gain: AtomicU32::new(Volume::FULL.get().to_bits()),
            level: AtomicU32::new(0f32.to_bits()),
            flush: AtomicBool::new(false),
        }
    }
}

/// Producer side: converts incoming audio to the device rate and queues it.
struct Feeder {
    producer: HeapProd<f32>,
    device_rate: u32,
    resampler: Option<(u32, StreamResampler)>,
}

impl Feeder {
    fn resample(&mut self, samples: &[f32], sample_rate: u32) -> Vec<f32> {
        if self.resampler.as_ref().map(|(rate, _)| *rate) != Some(sample_rate) {
            match StreamResampler::new(sample_rate, self.device_rate) {
                Ok(resampler) => self.resampler = Some((sample_rate, resampler)),
                Err(e) => {
                    error!("Cannot resample {sample_rate} Hz audio for playback: {e}");
                    return Vec::new();
                }
            }
        }
        match self.resampler.as_mut() {
            Some((_, resampler)) => resampler.process(samples),
            None => Vec::new(),
        }
    }

    fn push(&mut self, samples: &[f32], sample_rate: u32) {
        let resampled = self.resample(samples, sample_rate);
        let pushed = self.producer.push_slice(&resampled);
        if pushed < resampled.len() {
            warn!(
                "Playback buffer full: dropped {} samples",
                resampled.len() - pushed
            );
        }
    }
}

/// Consumer side, owned by the output callback.
struct Renderer {
    consumer: HeapCons<f32>,
    shared: Arc<Shared>,
    channels: usize,
    mono: Vec<f32>,
    meter: LevelMeter,
}

impl Renderer {
    fn render(&mut self, out: &mut [f32]) {
        if self.shared.flush.swap(false, Ordering::AcqRel) {
            self.consumer.clear();
        }
        let frames = out.len().div_ceil(self.channels);
        self.mono.resize(frames, 0.0);
        let read = self.consumer.pop_slice(&mut self.mono);
        self.mono[read..].fill(0.0);

        let gain = f32::from_bits(self.shared.gain.load(Ordering::Relaxed));
        for sample in &mut self.mono {
            *sample *= gain;
        }
        let level = self.meter.process(&self.mono);
        self.shared.level.store(level.to_bits(), Ordering::Relaxed);

        for (frame, &sample) in out.chunks_mut(self.channels).zip(&self.mono) {
            frame.fill(sample);
        }
    }
}

/// [`AudioSink`] over a cpal output device.
pub struct CpalPlayback {
    shared: Arc<Shared>,
    feeder: Mutex<Feeder>,
    // Dropping the sender stops the output thread.
    _stop: std::sync::mpsc::Sender<()>,
}

impl CpalPlayback {
    /// Opens the named output device, or the host default.
    pub fn start(device_name: Option<&str>) -> Result<Self> {
        let shared = Arc::new(Shared::new());
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<(u32, HeapProd<f32>)>>(1);
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let device_name = device_name.map(str::to_string);
        let callback_shared = shared.clone();

        std::thread::Builder::new()
            .name("convobridge-speaker".into())
            .spawn(move || {
                let stream = match open_output_stream(device_name.as_deref(), callback_shared) {
                    Ok((stream, device_rate, producer)) => {
                        if ready_tx.send(Ok((device_rate, producer))).is_err() {
                            return;
                        }
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = stop_rx.recv();
                drop(stream);
                info!("Audio playback stopped.");
            })
            .context("Failed to spawn the playback thread")?;

        let (device_rate, producer) = ready_rx
            .recv()
            .map_err(|_| anyhow!("Playback thread exited before the device opened"))??;

        Ok(Self {
            shared,
            feeder: Mutex::new(Feeder {
                producer,
                device_rate,
                resampler: None,
            }),
            _stop: stop_tx,
        })
    }

    fn feeder(&self) -> MutexGuard<'_, Feeder> {
        self.feeder.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AudioSink for CpalPlayback {
    fn play(&self, samples: &[f32], sample_rate: u32) {
        self.feeder().push(samples, sample_rate);
    }

    fn set_gain(&self, gain: Volume) {
        self.shared.gain.store(gain.get().to_bits(), Ordering::Relaxed);
    }

    fn level(&self) -> f32 {
        f32::from_bits(self.shared.level.load(Ordering::Relaxed))
    }

    fn clear(&self) {
        self.shared.flush.store(true, Ordering::Release);
        if let Some((_, resampler)) = self.feeder().resampler.as_mut() {
            resampler.reset();
        }
    }
}

fn open_output_stream(
    device_name: Option<&str>,
    shared: Arc<Shared>,
) -> Result<(cpal::Stream, u32, HeapProd<f32>)> {
    let host = cpal::default_host();
    let device = find_device(&host, Direction::Output, device_name)?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let supported = device
        .default_output_config()
        .with_context(|| format!("No usable output configuration for '{name}'"))?;
    let device_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let config: cpal::StreamConfig = supported.config();

    let (producer, consumer) = HeapRb::<f32>::new(device_rate as usize * QUEUE_SECONDS).split();
    let mut renderer = Renderer {
        consumer,
        shared,
        channels,
        mono: Vec::new(),
        meter: LevelMeter::default(),
    };
    let err_fn = |err| error!("Audio output stream error: {}", err);

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |out: &mut [f32], _: &cpal::OutputCallbackInfo| renderer.render(out),
            err_fn,
            None,
        )?,
        SampleFormat::I16 => {
            let mut scratch = Vec::new();
            device.build_output_stream(
                &config,
                move |out: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(out.len(), 0.0);
                    renderer.render(&mut scratch);
                    for (o, &s) in out.iter_mut().zip(&scratch) {
                        *o = (s * 32767.0) as i16;
                    }
                },
                err_fn,
                None,
            )?
        }
        other => bail!("Unsupported output sample format {other:?} on '{name}'"),
    };
    stream.play().context("Failed to start the output stream")?;

    info!(device = %name, device_rate, channels, "Audio playback started.");
    Ok((stream, device_rate, producer))
}

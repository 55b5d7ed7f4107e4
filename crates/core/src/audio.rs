//! Audio boundaries of a live call: the microphone the manager acquires and
//! the output sink remote speech is played through.

use crate::error::AcquisitionError;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Output gain in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Volume(f32);

impl Volume {
    pub const MUTED: Volume = Volume(0.0);
    pub const FULL: Volume = Volume(1.0);

    /// Clamps `value` into range. Returns `None` for NaN.
    pub fn new(value: f32) -> Option<Self> {
        if value.is_nan() {
            None
        } else {
            Some(Volume(value.clamp(0.0, 1.0)))
        }
    }

    pub fn get(self) -> f32 {
        self.0
    }
}

impl Default for Volume {
    fn default() -> Self {
        Volume::FULL
    }
}

/// Platform playback of the remote party's voice.
pub trait AudioSink: Send + Sync {
    /// Queues mono `f32` samples recorded at `sample_rate`.
    fn play(&self, samples: &[f32], sample_rate: u32);
    fn set_gain(&self, gain: Volume);
    /// Recent playback level in `[0.0, 1.0]`.
    fn level(&self) -> f32;
    /// Drops anything still queued for playback.
    fn clear(&self);
}

/// Local microphone access.
#[async_trait]
pub trait AudioCapture: Send + Sync {
    /// Opens the capture device. May wait on a permission prompt.
    async fn acquire(&self) -> Result<Microphone, AcquisitionError>;
}

/// Captured PCM16 little-endian mono frames.
#[derive(Debug)]
pub struct MicFrames {
    pub sample_rate: u32,
    pub rx: mpsc::Receiver<Bytes>,
}

/// An acquired capture device.
///
/// The frame stream is handed to the transport while the `Microphone` itself
/// stays with the call manager; releasing (or dropping) it stops capture.
pub struct Microphone {
    frames: Option<MicFrames>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Microphone {
    pub fn new(
        sample_rate: u32,
        rx: mpsc::Receiver<Bytes>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            frames: Some(MicFrames { sample_rate, rx }),
            release: Some(Box::new(release)),
        }
    }

    /// Takes the frame stream. Only the first call returns `Some`.
    pub fn take_frames(&mut self) -> Option<MicFrames> {
        self.frames.take()
    }

    /// Stops capture. Idempotent.
    pub fn release(&mut self) {
        self.frames = None;
        if let Some(release) = self.release.take() {
            release();
        }
    }

    pub fn is_released(&self) -> bool {
        self.release.is_none()
    }
}

impl Drop for Microphone {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Microphone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Microphone")
            .field("released", &self.is_released())
            .finish()
    }
}

/// RMS level meter with peak decay, used for the activity indicator.
#[derive(Debug, Clone)]
pub struct LevelMeter {
    level: f32,
    decay: f32,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(0.9)
    }
}

impl LevelMeter {
    /// `decay` is the fraction of the previous level kept per block.
    pub fn new(decay: f32) -> Self {
        Self {
            level: 0.0,
            decay: decay.clamp(0.0, 0.999),
        }
    }

    /// Feeds one block of samples and returns the updated level.
    pub fn process(&mut self, samples: &[f32]) -> f32 {
        let rms = if samples.is_empty() {
            0.0
        } else {
            let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
            (sum_sq / samples.len() as f32).sqrt()
        };
        self.level = rms.max(self.level * self.decay).clamp(0.0, 1.0);
        self.level
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn reset(&mut self) {
        self.level = 0.0;
    }
}

//! cpal-backed microphone and speaker for the terminal client.

pub mod capture;
pub mod devices;
pub mod playback;

pub use capture::CpalCapture;
pub use devices::{DeviceInfo, Direction, list_devices};
pub use playback::CpalPlayback;

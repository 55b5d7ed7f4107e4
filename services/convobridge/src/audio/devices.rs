//! Audio device enumeration using cpal

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Input => f.pad("input"),
            Direction::Output => f.pad("output"),
        }
    }
}

/// One device as shown by `convobridge devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub direction: Direction,
    pub is_default: bool,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let marker = if self.is_default { '*' } else { ' ' };
        write!(f, "{marker} [{:<6}] {}", self.direction, self.name)?;
        if let (Some(rate), Some(channels)) = (self.sample_rate, self.channels) {
            write!(f, " ({rate} Hz, {channels} ch)")?;
        }
        Ok(())
    }
}

fn device_name(device: &cpal::Device) -> String {
    device.name().unwrap_or_else(|_| "Unknown".to_string())
}

fn describe(device: &cpal::Device, direction: Direction, default_name: Option<&str>) -> DeviceInfo {
    let name = device_name(device);
    let config = match direction {
        Direction::Input => device.default_input_config().ok(),
        Direction::Output => device.default_output_config().ok(),
    };
    DeviceInfo {
        is_default: default_name == Some(name.as_str()),
        sample_rate: config.as_ref().map(|c| c.sample_rate().0),
        channels: config.as_ref().map(|c| c.channels()),
        direction,
        name,
    }
}

/// Lists every input and output device of the default host.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    tracing::info!("CPAL host: {}", host.id().name());

    let default_input = host.default_input_device().map(|d| device_name(&d));
    let default_output = host.default_output_device().map(|d| device_name(&d));

    let mut devices: Vec<DeviceInfo> = host
        .input_devices()
        .context("Failed to enumerate input devices")?
        .map(|device| describe(&device, Direction::Input, default_input.as_deref()))
        .collect();
    devices.extend(
        host.output_devices()
            .context("Failed to enumerate output devices")?
            .map(|device| describe(&device, Direction::Output, default_output.as_deref())),
    );

    tracing::debug!("Found {} audio devices", devices.len());
    Ok(devices)
}

/// Picks the named device, or the host default when `name` is `None`.
///
/// An exact name match wins; otherwise the first device whose name contains
/// `name` (case-insensitive) is used.
pub fn find_device(
    host: &cpal::Host,
    direction: Direction,
    name: Option<&str>,
) -> Result<cpal::Device> {
    let Some(wanted) = name else {
        let device = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        };
        return device.ok_or_else(|| anyhow!("No default {direction} device available"));
    };

    let devices: Vec<cpal::Device> = match direction {
        Direction::Input => host.input_devices()?.collect(),
        Direction::Output => host.output_devices()?.collect(),
    };
    let names: Vec<String> = devices.iter().map(device_name).collect();
    let index = pick_device(&names, wanted)
        .ok_or_else(|| anyhow!("No {direction} device matches '{wanted}'"))?;
    devices
        .into_iter()
        .nth(index)
        .ok_or_else(|| anyhow!("No {direction} device matches '{wanted}'"))
}

fn pick_device(names: &[String], wanted: &str) -> Option<usize> {
    names.iter().position(|name| name == wanted).or_else(|| {
        let wanted = wanted.to_lowercase();
        names
            .iter()
            .position(|name| name.to_lowercase().contains(&wanted))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_device_prefers_exact_match() {
        let names = vec![
            "USB Headset Mic".to_string(),
            "Headset".to_string(),
            "Built-in Microphone".to_string(),
        ];
        assert_eq!(pick_device(&names, "Headset"), Some(1));
        assert_eq!(pick_device(&names, "built-in"), Some(2));
        assert_eq!(pick_device(&names, "usb"), Some(0));
        assert_eq!(pick_device(&names, "webcam"), None);
    }

    #[test]
    fn test_device_info_display() {
        let info = DeviceInfo {
            name: "Built-in Microphone".into(),
            direction: Direction::Input,
            is_default: true,
            sample_rate: Some(48_000),
            channels: Some(1),
        };
        assert_eq!(
            info.to_string(),
            "* [input ] Built-in Microphone (48000 Hz, 1 ch)"
        );

        let info = DeviceInfo {
            name: "HDMI".into(),
            direction: Direction::Output,
            is_default: false,
            sample_rate: None,
            channels: None,
        };
        assert_eq!(info.to_string(), "  [output] HDMI");
    }
}

//! Audio output device enumeration.

use serde::{Deserialize, Serialize};

/// Metadata about an audio output device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default output device.
    pub is_default: bool,
    /// Channel count of the device's default output config, if it could be queried.
    pub channels: Option<u16>,
    /// Default output sample rate (Hz), if it could be queried.
    pub default_sample_rate: Option<u32>,
}

impl DeviceInfo {
    /// Whether the ring's stereo stream can play on this device as-is.
    /// Unknown layouts are treated as usable; `CpalOutput` negotiates later.
    pub fn supports_stereo(&self) -> bool {
        self.channels.map_or(true, |c| c >= 2)
    }
}

/// Order devices for display: default first, then stereo-capable, then by name.
pub fn rank_devices(devices: &mut [DeviceInfo]) {
    devices.sort_by_key(|d| {
        (
            !d.is_default,
            !d.supports_stereo(),
            d.name.to_ascii_lowercase(),
        )
    });
}

/// List all available audio output devices on the system.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    match host.output_devices() {
        Ok(devices) => {
            let mut list = devices
                .enumerate()
                .map(|(idx, device)| {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| format!("Output Device {}", idx + 1));
                    let config = device.default_output_config().ok();
                    DeviceInfo {
                        is_default: default_name.as_deref() == Some(name.as_str()),
                        name,
                        channels: config.as_ref().map(|c| c.channels()),
                        default_sample_rate: config.as_ref().map(|c| c.sample_rate().0),
                    }
                })
                .collect::<Vec<_>>();
            rank_devices(&mut list);
            list
        }
        Err(e) => {
            tracing::warn!("failed to enumerate output devices: {e}");
            if let Some(default) = host.default_output_device() {
                let name = default
                    .name()
                    .unwrap_or_else(|_| "Default Output Device".to_string());
                let config = default.default_output_config().ok();
                vec![DeviceInfo {
                    name,
                    is_default: true,
                    channels: config.as_ref().map(|c| c.channels()),
                    default_sample_rate: config.as_ref().map(|c| c.sample_rate().0),
                }]
            } else {
                vec![]
            }
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(test)]
mod tests {
    use super::{rank_devices, DeviceInfo};

    fn device(name: &str, is_default: bool, channels: Option<u16>) -> DeviceInfo {
        DeviceInfo {
            name: name.into(),
            is_default,
            channels,
            default_sample_rate: Some(48_000),
        }
    }

    #[test]
    fn default_device_ranks_first_and_mono_last() {
        let mut list = vec![
            device("Zebra Mono", false, Some(1)),
            device("alpha speakers", false, Some(2)),
            device("HDMI Output", true, Some(8)),
            device("Bluetooth", false, None),
        ];
        rank_devices(&mut list);

        let names: Vec<&str> = list.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["HDMI Output", "alpha speakers", "Bluetooth", "Zebra Mono"]
        );
    }

    #[test]
    fn unknown_layout_counts_as_stereo() {
        assert!(device("x", false, None).supports_stereo());
        assert!(!device("x", false, Some(1)).supports_stereo());
    }
}

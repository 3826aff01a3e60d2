//! Audio device lookup on the default cpal host

use cpal::traits::{DeviceTrait, HostTrait};

use super::DeviceKind;
use crate::error::SessionError;

/// Input device by name, or the host default
pub(crate) fn input_device(name: Option<&str>) -> Result<cpal::Device, SessionError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| unavailable(DeviceKind::Microphone, "no default input device")),
        Some(name) => {
            let devices = host
                .input_devices()
                .map_err(|e| unavailable(DeviceKind::Microphone, e))?;
            find_named(devices, name).ok_or_else(|| {
                unavailable(DeviceKind::Microphone, format!("no input named {name:?}"))
            })
        }
    }
}

/// Output device by name
pub(crate) fn output_device(name: &str) -> Result<cpal::Device, SessionError> {
    let devices = cpal::default_host()
        .output_devices()
        .map_err(|e| unavailable(DeviceKind::Speaker, e))?;
    find_named(devices, name)
        .ok_or_else(|| unavailable(DeviceKind::Speaker, format!("no output named {name:?}")))
}

fn find_named(
    mut devices: impl Iterator<Item = cpal::Device>,
    name: &str,
) -> Option<cpal::Device> {
    devices.find(|device| device.name().map(|n| n == name).unwrap_or(false))
}

fn unavailable(device: DeviceKind, reason: impl std::fmt::Display) -> SessionError {
    SessionError::DeviceUnavailable {
        device,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_names_are_unavailable() {
        assert!(matches!(
            input_device(Some("no-such-input-device")),
            Err(SessionError::DeviceUnavailable {
                device: DeviceKind::Microphone,
                ..
            })
        ));
        assert!(matches!(
            output_device("no-such-output-device"),
            Err(SessionError::DeviceUnavailable {
                device: DeviceKind::Speaker,
                ..
            })
        ));
    }
}

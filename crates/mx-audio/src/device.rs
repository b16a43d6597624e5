//! Output device enumeration and selection

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host};

use crate::{AudioError, AudioResult};

/// Get the audio host for this platform
pub fn get_host() -> Host {
    cpal::default_host()
}

/// Names of all available output devices
pub fn output_device_names() -> AudioResult<Vec<String>> {
    let host = get_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::BackendError(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Find an output device by name, or the default device for `None`
pub fn find_output_device(name: Option<&str>) -> AudioResult<Device> {
    let host = get_host();
    match name {
        None => host.default_output_device().ok_or(AudioError::NoDevice),
        Some(wanted) => {
            let devices = host
                .output_devices()
                .map_err(|e| AudioError::BackendError(e.to_string()))?;
            for device in devices {
                if device.name().map(|n| n == wanted).unwrap_or(false) {
                    return Ok(device);
                }
            }
            Err(AudioError::DeviceNotFound(wanted.to_string()))
        }
    }
}

use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

fn get_host() -> cpal::Host {
    cpal::default_host()
}

pub fn get_or_default_input(device_name: Option<String>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    let Some(target) = device_name else {
        return host
            .default_input_device()
            .ok_or_else(|| anyhow::anyhow!("No default input device"));
    };
    host.input_devices()?
        .find(|device| device.name().is_ok_and(|name| name == target))
        .ok_or_else(|| anyhow::anyhow!("No input device named {}", target))
}

pub fn get_or_default_output(device_name: Option<String>) -> anyhow::Result<Device> {
    let host = get_host();
    let Some(target) = device_name else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("No default output device"));
    };
    host.output_devices()?
        .find(|device| device.name().is_ok_and(|name| name == target))
        .ok_or_else(|| anyhow::anyhow!("No output device named {}", target))
}

fn describe(device: &Device, config: cpal::SupportedStreamConfig, default_name: Option<&str>) -> String {
    let name = device.name().unwrap_or_else(|_| "<unnamed>".to_string());
    let mut d = format!(" * {}({}ch, {}hz)", name, config.channels(), config.sample_rate().0);
    if default_name == Some(name.as_str()) {
        d.push_str(" [default]");
    }
    d
}

pub fn get_available_inputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let mut device_names: Vec<String> = Vec::new();
    for in_device in host.input_devices()? {
        match in_device.default_input_config() {
            Ok(config) => device_names.push(describe(&in_device, config, default_name.as_deref())),
            Err(e) => tracing::debug!("Skipping input device without default config: {}", e),
        }
    }
    Ok(device_names.join("\n"))
}

pub fn get_available_outputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let mut device_names: Vec<String> = Vec::new();
    for out_device in host.output_devices()? {
        match out_device.default_output_config() {
            Ok(config) => device_names.push(describe(&out_device, config, default_name.as_deref())),
            Err(e) => tracing::debug!("Skipping output device without default config: {}", e),
        }
    }
    Ok(device_names.join("\n"))
}

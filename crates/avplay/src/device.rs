//! Output device discovery and selection.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the first output device whose name contains `needle` (case-insensitive),
/// or the host default.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.output_devices().context("No output devices")?;
        return devices
            .find(|d| {
                d.description()
                    .ok()
                    .is_some_and(|n| matches_device_name(&n.name(), needle))
            })
            .ok_or_else(|| anyhow!("No output device matched: {needle}"));
    }
    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose an output config for `wanted_rate` Hz and `wanted_channels`.
///
/// Ranges covering the rate win, then matching channel counts, then sample formats
/// cheaper to convert from `f32`.
pub fn pick_output_config(
    device: &cpal::Device,
    wanted_rate: u32,
    wanted_channels: u16,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<((bool, bool, u8), cpal::SupportedStreamConfig)> = None;
    for range in device.supported_output_configs()? {
        let rate = wanted_rate.clamp(range.min_sample_rate(), range.max_sample_rate());
        let rank = (
            rate == wanted_rate,
            range.channels() == wanted_channels,
            sample_format_rank(range.sample_format()),
        );
        let replace = match &best {
            None => true,
            Some((best_rank, _)) => is_better(rank, *best_rank),
        };
        if replace {
            best = Some((rank, range.with_sample_rate(rate)));
        }
    }
    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Prefer a fixed buffer of at most 4096 frames to keep the clock latency small.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            const MAX_FRAMES: u32 = 4096;
            Some(cpal::BufferSize::Fixed(MAX_FRAMES.clamp(*min, *max)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Print available output devices to stdout.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let default_name = host
        .default_output_device()
        .and_then(|d| d.description().ok())
        .map(|d| d.name().to_string());
    for device in host.output_devices().context("No output devices")? {
        let Ok(desc) = device.description() else {
            continue;
        };
        let name = desc.name().to_string();
        let marker = if default_name.as_deref() == Some(name.as_str()) {
            " (default)"
        } else {
            ""
        };
        println!("{name}{marker}");
        if let Ok(configs) = device.supported_output_configs() {
            for c in configs {
                println!(
                    "    {} ch, {}..{} Hz, {:?}",
                    c.channels(),
                    c.min_sample_rate(),
                    c.max_sample_rate(),
                    c.sample_format()
                );
            }
        }
    }
    Ok(())
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn is_better(rank: (bool, bool, u8), best: (bool, bool, u8)) -> bool {
    let (rate_ok, channels_ok, format) = rank;
    let (best_rate_ok, best_channels_ok, best_format) = best;
    if rate_ok != best_rate_ok {
        rate_ok
    } else if channels_ok != best_channels_ok {
        channels_ok
    } else {
        format < best_format
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

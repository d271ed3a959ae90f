//! Output device discovery and selection.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Largest fixed device buffer we ask for, in frames.
const MAX_DEVICE_FRAMES: u32 = 8_192;

/// First output device whose name contains `needle` (case-insensitive), or
/// the host default when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.output_devices().context("no output devices")?;
        return devices
            .find(|d| {
                d.description()
                    .ok()
                    .is_some_and(|desc| matches_device_name(&desc.name(), needle))
            })
            .ok_or_else(|| anyhow!("no output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("no default output device"))
}

/// Supported config closest to `target_rate`.
///
/// Ranks candidates by: contains the target rate, has exactly two channels,
/// distance from the target rate, then sample format.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(Rank, cpal::SupportedStreamConfig)> = None;

    for range in device
        .supported_output_configs()
        .context("query output configs")?
    {
        let rate =
            pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let rank = Rank {
            exact: rate == target_rate,
            stereo: range.channels() == 2,
            distance: rate.abs_diff(target_rate),
            format: sample_format_rank(range.sample_format()),
        };
        if best.as_ref().is_none_or(|(b, _)| rank.is_better_than(b)) {
            best = Some((rank, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("no supported output configs"))
}

/// Fixed device buffer near `frames`, or `None` to let the driver decide.
pub fn pick_buffer_size(
    config: &cpal::SupportedStreamConfig,
    frames: u32,
) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            let wanted = frames.min(MAX_DEVICE_FRAMES);
            Some(cpal::BufferSize::Fixed(wanted.clamp(*min, (*max).max(*min))))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Names of the host's output devices, in host order.
pub fn list_devices(host: &cpal::Host) -> Result<Vec<String>> {
    let devices = host.output_devices().context("no output devices")?;
    let mut names = Vec::new();
    for d in devices {
        names.push(d.description()?.name().to_string());
    }
    Ok(names)
}

/// Name of the host default output device, if any.
pub fn default_device_name(host: &cpal::Host) -> Option<String> {
    let device = host.default_output_device()?;
    device.description().ok().map(|d| d.name().to_string())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Rank {
    exact: bool,
    stereo: bool,
    distance: u32,
    format: u8,
}

impl Rank {
    fn is_better_than(&self, other: &Rank) -> bool {
        if self.exact != other.exact {
            self.exact
        } else if self.stereo != other.stereo {
            self.stereo
        } else if self.distance != other.distance {
            self.distance < other.distance
        } else {
            self.format < other.format
        }
    }
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

// Decoder output is i16, so native i16 needs no conversion.
fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::I16 => 0,
        cpal::SampleFormat::F32 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rank(exact: bool, stereo: bool, distance: u32, format: u8) -> Rank {
        Rank {
            exact,
            stereo,
            distance,
            format,
        }
    }

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", " USB "));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", "  "));
    }

    #[test]
    fn rate_clamps_into_range() {
        assert_eq!(pick_rate_for_range(8_000, 96_000, 44_100), 44_100);
        assert_eq!(pick_rate_for_range(48_000, 96_000, 44_100), 48_000);
        assert_eq!(pick_rate_for_range(8_000, 32_000, 44_100), 32_000);
    }

    #[test]
    fn exact_rate_beats_everything() {
        assert!(rank(true, false, 0, 3).is_better_than(&rank(false, true, 100, 0)));
    }

    #[test]
    fn stereo_beats_closer_rate() {
        assert!(rank(false, true, 4_000, 1).is_better_than(&rank(false, false, 100, 0)));
    }

    #[test]
    fn closer_rate_then_format() {
        assert!(rank(false, true, 100, 3).is_better_than(&rank(false, true, 3_900, 0)));
        assert!(rank(true, true, 0, 0).is_better_than(&rank(true, true, 0, 1)));
        assert!(!rank(true, true, 0, 1).is_better_than(&rank(true, true, 0, 1)));
    }

    #[test]
    fn i16_ranks_first() {
        assert!(
            sample_format_rank(cpal::SampleFormat::I16)
                < sample_format_rank(cpal::SampleFormat::F32)
        );
        assert_eq!(sample_format_rank(cpal::SampleFormat::U8), 10);
    }
}

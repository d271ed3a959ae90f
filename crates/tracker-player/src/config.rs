use std::fmt;
use std::str::FromStr;

/// Resampling filter used by the decoder when stepping through samples.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Interpolation {
    /// Let the decoder pick.
    #[default]
    Default,
    /// Nearest neighbour.
    None,
    Linear,
    Cubic,
    /// Eight-tap windowed sinc; decoders without it use their best filter.
    WindowedSinc,
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Interpolation::Default => "default",
            Interpolation::None => "none",
            Interpolation::Linear => "linear",
            Interpolation::Cubic => "cubic",
            Interpolation::WindowedSinc => "sinc",
        };
        f.write_str(name)
    }
}

impl FromStr for Interpolation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" | "0" => Ok(Interpolation::Default),
            "none" | "nearest" | "1" => Ok(Interpolation::None),
            "linear" | "2" => Ok(Interpolation::Linear),
            "cubic" | "4" => Ok(Interpolation::Cubic),
            "sinc" | "windowed-sinc" | "8" => Ok(Interpolation::WindowedSinc),
            other => Err(format!(
                "unknown interpolation '{other}' (expected default, none, linear, cubic or sinc)"
            )),
        }
    }
}

/// Decoder-side settings applied right after a module loads.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Stereo separation percent, 0 (mono) to 200.
    pub stereo_separation: i32,
    pub interpolation: Interpolation,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            stereo_separation: 50,
            interpolation: Interpolation::WindowedSinc,
        }
    }
}

/// Output stream parameters.
#[derive(Clone, Debug)]
pub struct OutputConfig {
    /// Requested device sample rate; the device may settle on another.
    pub sample_rate: u32,
    /// Output buffer target in milliseconds. This bounds how far rendering
    /// runs ahead of what is audible.
    pub buffer_ms: u32,
    /// Frames rendered per pull.
    pub chunk_frames: usize,
    /// Output device substring match; `None` uses the host default.
    pub device: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            buffer_ms: 60,
            chunk_frames: 1024,
            device: None,
        }
    }
}

//! Error taxonomy for loading and playback.
//!
//! End of stream and cancellation are not errors; see [`crate::engine::Pull`].

use thiserror::Error;

/// A module file could not be turned into a decoder.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("file too short to be a module ({0} bytes)")]
    TooShort(usize),
    #[error("unsupported module format: {0}")]
    Unsupported(&'static str),
    #[error("unrecognized module data")]
    Unrecognized,
    #[error("pattern data truncated: need {expected} bytes, have {found}")]
    Truncated { expected: usize, found: usize },
    #[error("module has no orders to play")]
    NoOrders,
}

/// A playback parameter the loaded module rejected.
///
/// Callers log these and keep the previous setting.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParamError {
    #[error("stereo separation {0}% outside 0-200")]
    StereoSeparation(i32),
    #[error("no module loaded")]
    NotLoaded,
}

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("audio device: {0}")]
    Device(String),
    #[error(transparent)]
    Param(#[from] ParamError),
}

impl PlayerError {
    /// Wrap device plumbing errors, keeping the full context chain.
    pub fn device(err: anyhow::Error) -> Self {
        PlayerError::Device(format!("{err:#}"))
    }
}

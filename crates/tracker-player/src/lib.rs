//! Tracker module playback with display synchronisation.
//!
//! The decoder renders ahead of the audio device; everything the UI shows is
//! resolved through [`sync`] so it matches what is audible rather than what
//! was last rendered.

pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod instruments;
pub mod module;
pub mod output;
pub mod player;
pub mod snapshot;
pub mod sync;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

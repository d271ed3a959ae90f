//! Playback without a terminal UI.
//!
//! Logs pattern changes as they become audible and exits at song end or on
//! Ctrl-C.

use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracker_player::config::{OutputConfig, PlaybackConfig};
use tracker_player::engine::CancelToken;
use tracker_player::player::Playback;

const POLL: Duration = Duration::from_millis(50);

pub fn run(path: &Path, playback: &PlaybackConfig, output: &OutputConfig) -> Result<()> {
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel()).context("install Ctrl-C handler")?;
    }

    let Playback {
        module,
        output: device,
        player,
    } = Playback::start(path, playback, output, cancel.clone())
        .with_context(|| format!("play {:?}", path))?;
    let meta = module.metadata();
    tracing::info!(
        title = %meta.title,
        format = %meta.kind,
        channels = meta.channels,
        duration = meta.duration_seconds,
        "module loaded"
    );

    let mut last_pattern = None;
    while !cancel.is_cancelled() && !device.is_drained() {
        thread::sleep(POLL);
        if let Some(state) = player.synced_state() {
            if last_pattern != Some(state.pattern) {
                last_pattern = Some(state.pattern);
                tracing::info!(
                    pattern = state.pattern,
                    seconds = player.synced_time(),
                    "now playing"
                );
            }
        }
    }

    if cancel.is_cancelled() {
        tracing::info!("interrupted");
    } else {
        // The buffer is empty but the device still holds its own queue.
        thread::sleep(device.latency());
        tracing::info!("song finished");
    }
    player.close();
    module.close();
    Ok(())
}

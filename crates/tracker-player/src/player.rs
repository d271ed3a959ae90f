//! Transport control and instant channel edits.
//!
//! A mute toggled the naive way is only heard once the output has drained
//! everything rendered before it. Instead, [`Player`] works out what is
//! audible right now, applies the change, seeks the decoder back to that
//! point and throws the stale buffer away.
//!
//! Lock order everywhere: player state, output feed gate, decoder, sync clock.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::{OutputConfig, PlaybackConfig};
use crate::engine::{CancelToken, PlaybackEngine};
use crate::error::{ParamError, PlayerError};
use crate::module::Module;
use crate::output::{AudioOutput, CpalOutput, StreamFormat};
use crate::sync::{PlaybackClock, SyncClock, SyncState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackStatus {
    Stopped,
    Playing,
    Paused,
    Closed,
}

struct State {
    status: PlaybackStatus,
    output: Option<Arc<dyn AudioOutput>>,
}

pub struct Player {
    module: Arc<Module>,
    clock: Arc<Mutex<SyncClock>>,
    cancel: CancelToken,
    format: StreamFormat,
    state: RwLock<State>,
}

impl Player {
    pub fn new(module: Arc<Module>, output: Arc<dyn AudioOutput>, cancel: CancelToken) -> Self {
        let format = output.format();
        Self {
            module,
            clock: Arc::new(Mutex::new(SyncClock::new())),
            cancel,
            format,
            state: RwLock::new(State {
                status: PlaybackStatus::Stopped,
                output: Some(output),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn clock(&self) -> MutexGuard<'_, SyncClock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Start from stopped, or resume from paused.
    pub fn play(&self) {
        let mut state = self.write();
        let Some(output) = state.output.clone() else {
            return;
        };
        match state.status {
            PlaybackStatus::Stopped => {
                let start = self.module.position_seconds();
                self.clock()
                    .rebaseline(seconds_to_frames(start, self.format.sample_rate));
                output.attach(Box::new(PlaybackEngine::new(
                    self.module.clone(),
                    self.clock.clone(),
                    self.format.sample_rate,
                    self.cancel.clone(),
                )));
                output.play();
                tracing::info!(start, "playback started");
            }
            PlaybackStatus::Paused => {
                output.play();
                tracing::debug!("playback resumed");
            }
            PlaybackStatus::Playing | PlaybackStatus::Closed => return,
        }
        state.status = PlaybackStatus::Playing;
    }

    pub fn pause(&self) {
        let mut state = self.write();
        if state.status != PlaybackStatus::Playing {
            return;
        }
        if let Some(output) = &state.output {
            output.pause();
        }
        state.status = PlaybackStatus::Paused;
        tracing::debug!("playback paused");
    }

    /// Returns whether playback is running afterwards.
    pub fn toggle_pause(&self) -> bool {
        if self.is_playing() {
            self.pause();
        } else {
            self.play();
        }
        self.is_playing()
    }

    pub fn is_playing(&self) -> bool {
        self.status() == PlaybackStatus::Playing
    }

    pub fn status(&self) -> PlaybackStatus {
        self.read().status
    }

    /// Frames handed to the output since the last baseline.
    pub fn samples_written(&self) -> u64 {
        self.clock().samples_written()
    }

    /// Decoder state for what is audible now.
    ///
    /// `None` unless playing with at least one chunk rendered; callers keep
    /// showing what they had.
    pub fn synced_state(&self) -> Option<SyncState> {
        let state = self.read();
        if state.status != PlaybackStatus::Playing {
            return None;
        }
        let unplayed = state.output.as_ref()?.unplayed_bytes();
        self.clock().lookup(unplayed, self.format)
    }

    /// Audible position in seconds.
    pub fn synced_time(&self) -> f64 {
        let state = self.read();
        match (state.status, state.output.as_ref()) {
            (PlaybackStatus::Playing | PlaybackStatus::Paused, Some(output)) => {
                let clock = PlaybackClock {
                    samples_written: self.clock().samples_written(),
                    unplayed_bytes: output.unplayed_bytes(),
                };
                let rate = f64::from(self.format.sample_rate.max(1));
                clock.audible_sample(self.format) as f64 / rate
            }
            (PlaybackStatus::Stopped, Some(_)) => self.module.position_seconds(),
            _ => 0.0,
        }
    }

    /// Toggle a channel's mute so it is heard within one chunk.
    ///
    /// Returns the new muted state; `None` when nothing is loaded or the
    /// channel does not exist.
    pub fn instant_mute(&self, channel: usize) -> Option<bool> {
        if channel >= self.module.num_channels() {
            tracing::debug!(channel, "mute ignored: no such channel");
            return None;
        }
        let muted = self
            .flush_and_reseek(|module| module.toggle_channel_mute(channel))
            .flatten()?;
        tracing::info!(channel, muted, "channel mute toggled");
        Some(muted)
    }

    /// Solo a channel, or un-solo it if it already is the only one audible.
    ///
    /// Returns whether the channel is soloed afterwards.
    pub fn instant_solo(&self, channel: usize) -> Option<bool> {
        if channel >= self.module.num_channels() {
            tracing::debug!(channel, "solo ignored: no such channel");
            return None;
        }
        let soloed = self.flush_and_reseek(|module| module.solo_channel(channel))?;
        tracing::info!(channel, soloed, "channel solo toggled");
        Some(soloed)
    }

    /// Change stereo separation with the same immediacy as a mute.
    pub fn instant_stereo_separation(&self, percent: i32) -> Result<(), ParamError> {
        let result = self
            .flush_and_reseek(|module| module.set_stereo_separation(percent))
            .unwrap_or(Err(ParamError::NotLoaded));
        match &result {
            Ok(()) => tracing::info!(percent, "stereo separation changed"),
            Err(err) => tracing::warn!(%err, "stereo separation unchanged"),
        }
        result
    }

    /// Apply `mutate` at the audible position.
    ///
    /// Holds the player write lock and the output feed gate for the whole
    /// sequence so no pull observes a half-applied edit. Does nothing when
    /// no module or output is ready.
    fn flush_and_reseek<R>(&self, mutate: impl FnOnce(&Module) -> R) -> Option<R> {
        let state = self.write();
        if state.status == PlaybackStatus::Closed || !self.module.is_loaded() {
            return None;
        }
        let output = state.output.as_ref()?;
        let _feed = output.hold_feed();
        let was_playing = state.status == PlaybackStatus::Playing;

        let render_pos = self.module.position_seconds();
        let unplayed = self.format.bytes_to_seconds(output.unplayed_bytes());
        let audible = (render_pos - unplayed).max(0.0);

        let result = mutate(&self.module);

        self.module.set_position_seconds(audible);
        output.reset();
        self.clock()
            .rebaseline(seconds_to_frames(audible, self.format.sample_rate));
        if was_playing {
            output.play();
        }

        tracing::debug!(render_pos, audible, "flushed output and reseeked");
        Some(result)
    }

    /// Stop pulling and release the output. The module stays open.
    pub fn close(&self) {
        let mut state = self.write();
        if state.status == PlaybackStatus::Closed {
            return;
        }
        if let Some(output) = state.output.take() {
            output.close();
        }
        state.status = PlaybackStatus::Closed;
        tracing::info!("player closed");
    }
}

/// A loaded module playing on a CPAL device.
pub struct Playback {
    pub module: Arc<Module>,
    pub output: Arc<CpalOutput>,
    pub player: Player,
}

impl Playback {
    /// Load `path`, apply `settings`, open the device and start playing.
    ///
    /// The file is loaded and configured before the device is touched.
    pub fn start(
        path: &Path,
        settings: &PlaybackConfig,
        output: &OutputConfig,
        cancel: CancelToken,
    ) -> Result<Self, PlayerError> {
        let module = Arc::new(Module::open(path)?);
        module.configure(settings)?;
        let device = Arc::new(CpalOutput::open(output)?);
        tracing::info!(device = device.device_name(), "audio output ready");
        let player = Player::new(module.clone(), device.clone(), cancel);
        player.play();
        Ok(Self {
            module,
            output: device,
            player,
        })
    }

    /// Stop the output, then release the decoder.
    pub fn close(&self) {
        self.player.close();
        self.module.close();
    }
}

fn seconds_to_frames(seconds: f64, sample_rate: u32) -> u64 {
    (seconds.max(0.0) * f64::from(sample_rate)).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Pull;
    use crate::error::LoadError;
    use crate::test_support::{FakeOutput, demo_module};
    use std::sync::Barrier;
    use std::thread;

    const RATE: u32 = 44_100;
    const CHUNK: usize = 1024;

    fn setup() -> (Player, Arc<FakeOutput>) {
        let module = Arc::new(Module::from_bytes(&demo_module()).unwrap());
        let output = FakeOutput::new(RATE, CHUNK);
        let player = Player::new(module, output.clone(), CancelToken::new());
        (player, output)
    }

    fn pump(output: &FakeOutput, chunks: usize) {
        for _ in 0..chunks {
            assert!(matches!(output.pump(), Some(Pull::Data { .. })));
        }
    }

    #[test]
    fn play_attaches_and_pause_stops_pulls() {
        let (player, output) = setup();
        assert_eq!(output.pump(), None);

        player.play();
        assert!(player.is_playing());
        pump(&output, 2);
        assert_eq!(player.samples_written(), 2 * CHUNK as u64);

        assert!(!player.toggle_pause());
        assert_eq!(player.status(), PlaybackStatus::Paused);
        assert_eq!(output.pump(), None);
        assert_eq!(output.buffered_frames(), 2 * CHUNK);

        assert!(player.toggle_pause());
        pump(&output, 1);
    }

    #[test]
    fn synced_state_trails_render_position() {
        let (player, output) = setup();
        assert!(player.synced_state().is_none());

        player.play();
        pump(&output, 8);
        // 8192 frames rendered; row 1 starts at frame 5292.
        assert_eq!(player.module().current_row(), 1);
        let heard = player.synced_state().unwrap();
        assert_eq!(heard.row, 0);
        assert_eq!(heard.sample_count, 0);

        output.consume(6 * CHUNK);
        let heard = player.synced_state().unwrap();
        assert_eq!(heard.sample_count, 6 * CHUNK as u64);
        assert_eq!(heard.row, 1);
        assert!((player.synced_time() - 6144.0 / 44_100.0).abs() < 1e-9);
    }

    #[test]
    fn instant_mute_reseeks_to_audible_position() {
        let (player, output) = setup();
        player.play();
        pump(&output, 8);
        output.consume(2 * CHUNK);

        assert_eq!(player.instant_mute(0), Some(true));

        assert_eq!(output.resets(), 1);
        assert_eq!(output.buffered_frames(), 0);
        assert!(output.is_playing());
        assert_eq!(player.samples_written(), 2 * CHUNK as u64);
        let audible = 2.0 * CHUNK as f64 / f64::from(RATE);
        assert!((player.module().position_seconds() - audible).abs() < 1.0 / f64::from(RATE));
        assert!(player.clock().queue().is_empty());
        assert!(player.synced_state().is_none());

        pump(&output, 1);
        let clock = player.clock();
        assert_eq!(clock.queue().len(), 1);
        assert_eq!(
            clock.queue().oldest().map(|s| s.sample_count),
            Some(2 * CHUNK as u64)
        );
    }

    #[test]
    fn muted_channel_is_silent_right_after_flush() {
        let (player, output) = setup();
        player.play();
        pump(&output, 4);
        for ch in 1..4 {
            player.instant_mute(ch);
        }
        pump(&output, 1);
        let loud = output.consume(CHUNK);
        assert!(loud.iter().any(|&s| s != 0));

        player.instant_mute(0);
        pump(&output, 1);
        let silent = output.consume(CHUNK);
        assert_eq!(silent.len(), 2 * CHUNK);
        assert!(silent.iter().all(|&s| s == 0));
    }

    #[test]
    fn double_toggle_restores_mute_vector() {
        let (player, output) = setup();
        player.play();
        pump(&output, 3);
        output.consume(3 * CHUNK);
        let before = player.module().muted_channels();
        let written = player.samples_written();

        player.instant_mute(2);
        player.instant_mute(2);

        assert_eq!(player.module().muted_channels(), before);
        assert_eq!(player.samples_written(), written);
    }

    #[test]
    fn solo_moves_then_releases() {
        let (player, _output) = setup();
        player.play();
        assert_eq!(player.instant_solo(1), Some(true));
        assert_eq!(player.instant_solo(2), Some(true));
        assert_eq!(
            player.module().muted_channels(),
            vec![true, true, false, true]
        );
        assert_eq!(player.instant_solo(2), Some(false));
        assert_eq!(player.module().muted_channels(), vec![false; 4]);
    }

    #[test]
    fn out_of_range_channel_is_ignored() {
        let (player, output) = setup();
        player.play();
        assert_eq!(player.instant_mute(4), None);
        assert_eq!(player.instant_solo(12), None);
        assert_eq!(output.resets(), 0);
    }

    #[test]
    fn edits_before_load_are_no_ops() {
        let (player, output) = setup();
        player.module().close();
        assert_eq!(player.instant_mute(0), None);
        assert_eq!(
            player.instant_stereo_separation(80),
            Err(ParamError::NotLoaded)
        );
        assert_eq!(output.resets(), 0);
    }

    #[test]
    fn paused_edit_stays_paused() {
        let (player, output) = setup();
        player.play();
        pump(&output, 2);
        player.pause();
        assert_eq!(player.instant_mute(3), Some(true));
        assert!(!output.is_playing());
        assert_eq!(player.status(), PlaybackStatus::Paused);
    }

    #[test]
    fn stereo_separation_uses_flush() {
        let (player, output) = setup();
        player.play();
        assert_eq!(player.instant_stereo_separation(120), Ok(()));
        assert_eq!(output.resets(), 1);
        assert_eq!(
            player.instant_stereo_separation(250),
            Err(ParamError::StereoSeparation(250))
        );
    }

    #[test]
    fn start_reports_missing_file_as_load_error() {
        let path = std::env::temp_dir().join("tracker-player-missing.mod");
        let result = Playback::start(
            &path,
            &PlaybackConfig::default(),
            &OutputConfig::default(),
            CancelToken::new(),
        );
        assert!(matches!(result, Err(PlayerError::Load(LoadError::Io { .. }))));
    }

    #[test]
    fn start_rejects_settings_before_opening_device() {
        let path =
            std::env::temp_dir().join(format!("tracker-player-start-{}.mod", std::process::id()));
        std::fs::write(&path, demo_module()).unwrap();
        let settings = PlaybackConfig {
            stereo_separation: 500,
            ..PlaybackConfig::default()
        };
        let result = Playback::start(
            &path,
            &settings,
            &OutputConfig::default(),
            CancelToken::new(),
        );
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            result,
            Err(PlayerError::Param(ParamError::StereoSeparation(500)))
        ));
    }

    #[test]
    fn close_releases_output() {
        let (player, output) = setup();
        player.play();
        pump(&output, 1);
        player.close();
        assert_eq!(player.status(), PlaybackStatus::Closed);
        assert_eq!(output.pump(), None);
        assert_eq!(player.instant_mute(0), None);
        assert_eq!(player.synced_time(), 0.0);
        player.play();
        assert_eq!(player.status(), PlaybackStatus::Closed);
    }

    #[test]
    fn concurrent_pulls_and_mutes_keep_clock_aligned() {
        let (player, output) = setup();
        let player = Arc::new(player);
        player.play();

        let barrier = Arc::new(Barrier::new(2));
        let feeder = {
            let output = output.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..150 {
                    output.pump();
                    output.consume(CHUNK / 2);
                }
            })
        };

        barrier.wait();
        for _ in 0..20 {
            player.instant_mute(1);
            thread::yield_now();
        }
        feeder.join().unwrap();

        assert_eq!(player.module().muted_channels(), vec![false; 4]);
        let position = player.module().position_seconds();
        let expected = seconds_to_frames(position, RATE);
        assert_eq!(player.samples_written(), expected);
    }
}

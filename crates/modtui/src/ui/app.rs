use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, Sender, unbounded};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tracker_player::config::{OutputConfig, PlaybackConfig};
use tracker_player::decode::Metadata;
use tracker_player::engine::CancelToken;
use tracker_player::instruments::Instrument;
use tracker_player::module::Module;
use tracker_player::player::{Playback, Player};
use tracker_player::snapshot::PatternSnapshot;
use tracker_player::sync::SyncState;

use super::render;
use super::view_model::{ActiveInstruments, VuMeter, visible_rows};

const TICK: Duration = Duration::from_millis(16);
const INPUT_POLL: Duration = Duration::from_millis(50);
const LOG_CAP: usize = 500;
const SEPARATION_STEP: i32 = 10;
const MAX_SEPARATION: i32 = 200;

/// Everything the UI thread reacts to.
pub(crate) enum AppEvent {
    Key(KeyEvent),
    Resize { width: u16, height: u16 },
    Tick,
    LoadResult(Result<Box<Session>, String>),
    /// Unrecoverable failure on a helper thread.
    Error(String),
}

/// A loaded module with its player.
pub(crate) struct Session {
    pub(crate) module: Arc<Module>,
    pub(crate) player: Player,
}

impl Session {
    fn shutdown(self) {
        self.player.close();
        self.module.close();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Action {
    Quit,
    ToggleLogs,
    CloseLogs,
    TogglePause,
    Separation(i32),
    Mute(usize),
    Solo(usize),
}

const MUTE_KEYS: [char; 12] = ['1', '2', '3', '4', '5', '6', '7', '8', '9', '0', '-', '='];
const SOLO_KEYS: [char; 12] = ['!', '@', '#', '$', '%', '^', '&', '*', '(', ')', '_', '+'];

fn key_action(key: &KeyEvent) -> Option<Action> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return (key.code == KeyCode::Char('c')).then_some(Action::Quit);
    }
    match key.code {
        KeyCode::Char('q') => Some(Action::Quit),
        KeyCode::Char('l') => Some(Action::ToggleLogs),
        KeyCode::Esc => Some(Action::CloseLogs),
        KeyCode::Char(' ') => Some(Action::TogglePause),
        KeyCode::Char('[') => Some(Action::Separation(-SEPARATION_STEP)),
        KeyCode::Char(']') => Some(Action::Separation(SEPARATION_STEP)),
        KeyCode::Char(c) => {
            if let Some(ch) = MUTE_KEYS.iter().position(|&k| k == c) {
                Some(Action::Mute(ch))
            } else {
                SOLO_KEYS.iter().position(|&k| k == c).map(Action::Solo)
            }
        }
        _ => None,
    }
}

pub(crate) struct App {
    pub(crate) filename: String,
    pub(crate) session: Option<Box<Session>>,
    /// Load failure; the screen shows it until the user quits.
    pub(crate) error: Option<String>,
    pub(crate) metadata: Metadata,
    pub(crate) instruments: Vec<Instrument>,
    pub(crate) active: ActiveInstruments,
    pub(crate) snapshot: PatternSnapshot,
    pub(crate) muted: Vec<bool>,
    pub(crate) vu: VuMeter,
    pub(crate) current_time: f64,
    pub(crate) stereo_separation: i32,
    pub(crate) visible_rows: usize,
    pub(crate) logs_open: bool,
    pub(crate) logs: VecDeque<String>,
    pub(crate) should_quit: bool,
    fatal: Option<String>,
    last_heard: Option<SyncState>,
    log_rx: Receiver<String>,
}

impl App {
    pub(crate) fn new(
        path: &Path,
        stereo_separation: i32,
        height: u16,
        log_rx: Receiver<String>,
    ) -> Self {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            filename,
            session: None,
            error: None,
            metadata: Metadata::default(),
            instruments: Vec::new(),
            active: ActiveInstruments::default(),
            snapshot: PatternSnapshot::default(),
            muted: Vec::new(),
            vu: VuMeter::default(),
            current_time: 0.0,
            stereo_separation,
            visible_rows: visible_rows(height),
            logs_open: false,
            logs: VecDeque::new(),
            should_quit: false,
            fatal: None,
            last_heard: None,
            log_rx,
        }
    }

    fn player(&self) -> Option<&Player> {
        self.session.as_deref().map(|session| &session.player)
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.player().is_some_and(|player| !player.is_playing())
    }

    pub(crate) fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Key(key) => self.on_key(&key),
            AppEvent::Resize { width: _, height } => {
                self.visible_rows = visible_rows(height);
            }
            AppEvent::Tick => self.on_tick(),
            AppEvent::LoadResult(Ok(session)) => self.on_loaded(session),
            AppEvent::LoadResult(Err(err)) => {
                tracing::error!("load failed: {err}");
                self.error = Some(err);
            }
            AppEvent::Error(err) => {
                tracing::error!("{err}");
                self.fatal = Some(err);
                self.should_quit = true;
            }
        }
    }

    fn on_key(&mut self, key: &KeyEvent) {
        let Some(action) = key_action(key) else {
            return;
        };
        match action {
            Action::Quit => self.should_quit = true,
            Action::ToggleLogs => self.logs_open = !self.logs_open,
            Action::CloseLogs => self.logs_open = false,
            Action::Separation(delta) => self.change_separation(delta),
            Action::TogglePause => {
                if let Some(player) = self.player() {
                    player.toggle_pause();
                }
            }
            Action::Mute(ch) => {
                let muted = self.player().and_then(|player| player.instant_mute(ch));
                if let Some(muted) = muted {
                    tracing::debug!(channel = ch + 1, muted, "channel mute");
                }
            }
            Action::Solo(ch) => {
                let solo = self.player().and_then(|player| player.instant_solo(ch));
                if let Some(solo) = solo {
                    tracing::debug!(channel = ch + 1, solo, "channel solo");
                }
            }
        }
    }

    fn change_separation(&mut self, delta: i32) {
        let target = (self.stereo_separation + delta).clamp(0, MAX_SEPARATION);
        if target == self.stereo_separation {
            return;
        }
        let Some(session) = self.session.as_deref() else {
            return;
        };
        match session.player.instant_stereo_separation(target) {
            Ok(()) => self.stereo_separation = target,
            Err(err) => tracing::warn!("stereo separation: {err}"),
        }
    }

    fn on_loaded(&mut self, session: Box<Session>) {
        self.metadata = session.module.metadata();
        self.instruments = session.module.instruments();
        self.muted = session.module.muted_channels();
        self.snapshot = session.module.snapshot(self.visible_rows);
        self.active.clear();
        self.last_heard = None;
        tracing::info!(
            title = %self.metadata.title,
            format = %self.metadata.kind,
            channels = self.metadata.channels,
            "module loaded"
        );
        self.session = Some(session);
    }

    /// Pull the audible position and refresh everything drawn from it.
    fn on_tick(&mut self) {
        self.drain_logs();
        let Some(session) = self.session.as_deref() else {
            return;
        };
        let module = &session.module;
        let player = &session.player;

        let playing = player.is_playing();
        if playing {
            if let Some(state) = player.synced_state() {
                self.last_heard = Some(state);
            }
        }
        self.current_time = player.synced_time();

        // Paused meters get no input and fall back to zero.
        let (pattern, row, volumes) = match &self.last_heard {
            Some(state) if playing => (state.pattern, state.row, state.channel_volumes.clone()),
            Some(state) => (state.pattern, state.row, Vec::new()),
            None => (module.current_pattern(), module.current_row(), Vec::new()),
        };

        self.active.update(&module.row_instruments(pattern, row));
        self.snapshot = module.pattern_view(pattern, row, self.visible_rows, volumes);
        self.vu
            .update(&self.snapshot.channel_volumes, self.snapshot.num_channels);
        self.muted = module.muted_channels();
    }

    fn drain_logs(&mut self) {
        while let Ok(line) = self.log_rx.try_recv() {
            push_log_line(&mut self.logs, line);
        }
    }

    fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            session.shutdown();
        }
    }
}

fn push_log_line(logs: &mut VecDeque<String>, line: String) {
    if logs.len() >= LOG_CAP {
        logs.pop_front();
    }
    logs.push_back(line);
}

fn load_session(
    path: &Path,
    playback: &PlaybackConfig,
    output: &OutputConfig,
    cancel: CancelToken,
) -> Result<Session> {
    let started = Playback::start(path, playback, output, cancel)
        .with_context(|| format!("play {:?}", path))?;
    Ok(Session {
        module: started.module,
        player: started.player,
    })
}

fn spawn_loader(
    tx: Sender<AppEvent>,
    path: PathBuf,
    playback: PlaybackConfig,
    output: OutputConfig,
    cancel: CancelToken,
) {
    thread::spawn(move || {
        let result = load_session(&path, &playback, &output, cancel)
            .map(Box::new)
            .map_err(|err| format!("{err:#}"));
        if let Err(unsent) = tx.send(AppEvent::LoadResult(result)) {
            // The UI is gone; tear the session down here.
            if let AppEvent::LoadResult(Ok(session)) = unsent.into_inner() {
                session.shutdown();
            }
        }
    });
}

fn spawn_input(tx: Sender<AppEvent>, cancel: CancelToken) {
    thread::spawn(move || {
        while !cancel.is_cancelled() {
            let polled = match event::poll(INPUT_POLL) {
                Ok(false) => continue,
                Ok(true) => event::read(),
                Err(err) => Err(err),
            };
            let app_event = match polled {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => AppEvent::Key(key),
                Ok(Event::Resize(width, height)) => AppEvent::Resize { width, height },
                Ok(_) => continue,
                Err(err) => AppEvent::Error(format!("terminal input: {err}")),
            };
            let failed = matches!(app_event, AppEvent::Error(_));
            if tx.send(app_event).is_err() || failed {
                break;
            }
        }
    });
}

fn spawn_ticker(tx: Sender<AppEvent>, cancel: CancelToken) {
    thread::spawn(move || {
        while !cancel.is_cancelled() {
            thread::sleep(TICK);
            if tx.send(AppEvent::Tick).is_err() {
                break;
            }
        }
    });
}

/// Run the player screen until the user quits. Returns the final stereo
/// separation so it can be persisted.
pub(crate) fn run_tui(
    path: PathBuf,
    playback: PlaybackConfig,
    output: OutputConfig,
    log_rx: Receiver<String>,
) -> Result<i32> {
    let (tx, rx) = unbounded::<AppEvent>();
    let cancel = CancelToken::new();
    let separation = playback.stereo_separation;

    let mut terminal = init_terminal()?;
    let height = terminal.size().map(|size| size.height).unwrap_or(24);
    let mut app = App::new(&path, separation, height, log_rx);

    spawn_loader(tx.clone(), path, playback, output, cancel.clone());
    spawn_input(tx.clone(), cancel.clone());
    spawn_ticker(tx, cancel.clone());

    let result = ui_loop(&mut terminal, &mut app, &rx);

    cancel.cancel();
    app.shutdown();
    restore_terminal(&mut terminal)?;
    result?;
    if let Some(err) = app.fatal.take() {
        bail!(err);
    }
    Ok(app.stereo_separation)
}

fn ui_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    events: &Receiver<AppEvent>,
) -> Result<()> {
    loop {
        terminal.draw(|f| render::draw(f, app)).context("draw frame")?;

        let event = events.recv().context("event channel closed")?;
        app.handle_event(event);
        // Coalesce anything that queued up while drawing.
        while let Ok(event) = events.try_recv() {
            app.handle_event(event);
        }
        if app.should_quit {
            return Ok(());
        }
    }
}

fn init_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode().context("enable_raw_mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("EnterAlternateScreen")?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend).context("Terminal::new")?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState;
    use tracker_player::engine::Pull;
    use tracker_player::test_support::{FakeOutput, demo_module};

    const CHUNK: usize = 1024;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        }
    }

    fn test_app() -> App {
        let (_tx, rx) = crossbeam_channel::bounded(1);
        App::new(Path::new("/music/space_debris.mod"), 50, 40, rx)
    }

    /// App playing the demo module into an in-memory output.
    fn playing_app() -> (App, Arc<FakeOutput>) {
        let module = Arc::new(Module::from_bytes(&demo_module()).unwrap());
        let output = FakeOutput::new(44_100, CHUNK);
        let player = Player::new(module.clone(), output.clone(), CancelToken::new());
        let mut app = test_app();
        app.handle_event(AppEvent::LoadResult(Ok(Box::new(Session { module, player }))));
        app.player().unwrap().play();
        (app, output)
    }

    fn pump(output: &FakeOutput, chunks: usize) {
        for _ in 0..chunks {
            assert!(matches!(output.pump(), Some(Pull::Data { .. })));
        }
    }

    fn module_row(app: &App) -> usize {
        app.session.as_deref().unwrap().module.current_row()
    }

    #[test]
    fn channel_keys_cover_twelve_channels() {
        assert_eq!(key_action(&key(KeyCode::Char('1'))), Some(Action::Mute(0)));
        assert_eq!(key_action(&key(KeyCode::Char('0'))), Some(Action::Mute(9)));
        assert_eq!(key_action(&key(KeyCode::Char('='))), Some(Action::Mute(11)));
        assert_eq!(key_action(&key(KeyCode::Char('!'))), Some(Action::Solo(0)));
        assert_eq!(key_action(&key(KeyCode::Char(')'))), Some(Action::Solo(9)));
        assert_eq!(key_action(&key(KeyCode::Char('+'))), Some(Action::Solo(11)));
        assert_eq!(key_action(&key(KeyCode::Char('z'))), None);
    }

    #[test]
    fn control_keys() {
        assert_eq!(key_action(&key(KeyCode::Char('q'))), Some(Action::Quit));
        assert_eq!(key_action(&key(KeyCode::Char(' '))), Some(Action::TogglePause));
        assert_eq!(
            key_action(&key(KeyCode::Char('['))),
            Some(Action::Separation(-10))
        );
        let mut ctrl_c = key(KeyCode::Char('c'));
        ctrl_c.modifiers = KeyModifiers::CONTROL;
        assert_eq!(key_action(&ctrl_c), Some(Action::Quit));
        let mut ctrl_1 = key(KeyCode::Char('1'));
        ctrl_1.modifiers = KeyModifiers::CONTROL;
        assert_eq!(key_action(&ctrl_1), None);
    }

    #[test]
    fn quit_and_log_toggle() {
        let mut app = test_app();
        assert_eq!(app.filename, "space_debris.mod");
        app.handle_event(AppEvent::Key(key(KeyCode::Char('l'))));
        assert!(app.logs_open);
        app.handle_event(AppEvent::Key(key(KeyCode::Esc)));
        assert!(!app.logs_open);
        app.handle_event(AppEvent::Key(key(KeyCode::Char('q'))));
        assert!(app.should_quit);
    }

    #[test]
    fn keys_without_a_session_are_ignored() {
        let mut app = test_app();
        app.handle_event(AppEvent::Key(key(KeyCode::Char(']'))));
        app.handle_event(AppEvent::Key(key(KeyCode::Char('1'))));
        app.handle_event(AppEvent::Key(key(KeyCode::Char(' '))));
        app.handle_event(AppEvent::Tick);
        assert_eq!(app.stereo_separation, 50);
        assert!(!app.should_quit);
        assert!(!app.is_paused());
    }

    #[test]
    fn resize_recomputes_rows() {
        let mut app = test_app();
        assert_eq!(app.visible_rows, 25);
        app.handle_event(AppEvent::Resize {
            width: 120,
            height: 30,
        });
        assert_eq!(app.visible_rows, 15);
    }

    #[test]
    fn load_failure_is_kept_for_display() {
        let mut app = test_app();
        app.handle_event(AppEvent::LoadResult(Err("bad header".to_string())));
        assert_eq!(app.error.as_deref(), Some("bad header"));
        assert!(!app.should_quit);
    }

    #[test]
    fn helper_errors_end_the_loop() {
        let mut app = test_app();
        app.handle_event(AppEvent::Error("terminal input: gone".to_string()));
        assert!(app.should_quit);
        assert_eq!(app.fatal.as_deref(), Some("terminal input: gone"));
    }

    #[test]
    fn logs_are_capped() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut app = App::new(Path::new("a.mod"), 50, 40, rx);
        for i in 0..(LOG_CAP + 20) {
            tx.send(format!("line {i}")).unwrap();
        }
        app.handle_event(AppEvent::Tick);
        assert_eq!(app.logs.len(), LOG_CAP);
        assert_eq!(app.logs.front().map(String::as_str), Some("line 20"));
    }

    #[test]
    fn tick_shows_the_audible_row_not_the_rendered_one() {
        let (mut app, output) = playing_app();
        app.handle_event(AppEvent::Tick);
        assert_eq!(app.snapshot.current_row, 0);

        // 8192 frames rendered; row 1 starts at frame 5292.
        pump(&output, 8);
        app.handle_event(AppEvent::Tick);
        assert_eq!(module_row(&app), 1);
        assert_eq!(app.snapshot.current_row, 0);
        assert_eq!(app.snapshot.current_pattern, 0);

        output.consume(6 * CHUNK);
        app.handle_event(AppEvent::Tick);
        assert_eq!(app.snapshot.current_row, 1);
        assert_eq!(app.snapshot.channel_volumes.len(), 4);
        assert!(app.snapshot.channel_volumes[0] > 0.0);
        assert!(app.vu.levels()[0] > 0.0);
        assert!((app.current_time - 6144.0 / 44_100.0).abs() < 1e-9);
    }

    #[test]
    fn mute_keeps_the_last_heard_row_until_audio_arrives() {
        let (mut app, output) = playing_app();
        pump(&output, 8);
        output.consume(6 * CHUNK);
        app.handle_event(AppEvent::Tick);
        let heard = app.snapshot.channel_volumes.clone();

        app.handle_event(AppEvent::Key(key(KeyCode::Char('2'))));
        assert!(app.player().unwrap().synced_state().is_none());
        assert_eq!(output.buffered_frames(), 0);

        app.handle_event(AppEvent::Tick);
        assert_eq!(app.snapshot.current_row, 1);
        assert_eq!(app.snapshot.channel_volumes, heard);
        assert_eq!(app.muted, vec![false, true, false, false]);

        assert!(heard[1] > 0.0);
        pump(&output, 2);
        output.consume(CHUNK);
        app.handle_event(AppEvent::Tick);
        assert_eq!(app.snapshot.current_row, 1);
        assert!(app.snapshot.channel_volumes[0] > 0.0);
        assert_eq!(app.snapshot.channel_volumes[1], 0.0);
    }

    #[test]
    fn paused_meters_decay_without_input() {
        let (mut app, output) = playing_app();
        pump(&output, 8);
        output.consume(6 * CHUNK);
        app.handle_event(AppEvent::Tick);
        let level = app.vu.levels()[0];
        assert!(level > 0.0);

        app.handle_event(AppEvent::Key(key(KeyCode::Char(' '))));
        assert!(app.is_paused());
        app.handle_event(AppEvent::Tick);
        assert!(app.snapshot.channel_volumes.is_empty());
        assert_eq!(app.snapshot.current_row, 1);
        assert!((app.vu.levels()[0] - level * 0.92).abs() < 1e-6);

        app.handle_event(AppEvent::Tick);
        assert!(app.vu.levels()[0] < level * 0.9);
    }
}

// Playback engine: transport state machine and track-switching protocol
//
// Starting a track is asynchronous: the pipeline's ready/error callbacks
// arrive later, on pipeline threads, and may belong to a request that has
// since been superseded. The engine closes that hole with a single in-flight
// locator token: each callback re-acquires the state lock, compares its
// locator against the token, and on mismatch does nothing at all — no state,
// no events, no counters.
//
// The state lock is the sole mutual-exclusion point. It is never held across
// a pipeline, store, or observer call.

use std::collections::HashMap;
use std::sync::{mpsc, Arc, Weak};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};

use crate::events::{PlayerEvent, PlayerObserver, StateBroadcaster};
use crate::pipeline::{MediaPipeline, PipelineListener};
use crate::shuffle::ShuffleSequencer;
use crate::state::{PlayMode, PlaybackStatus, Transport};
use crate::store::PlayerStore;
use crate::track::{Locator, Track};

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cadence of progress events while playing.
    pub progress_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_millis(1000),
        }
    }
}

struct EngineState {
    playlist: Vec<Track>,
    index: usize,
    current: Option<Track>,
    mode: PlayMode,
    transport: Transport,
    duration_ms: u64,
    volume: f32,
    /// The fencing token: locator of the authoritative prepare request.
    in_flight: Option<Locator>,
    shuffle: Option<ShuffleSequencer>,
    counts: HashMap<Locator, u32>,
    owner: Option<String>,
}

struct HistoryJob {
    owner: String,
    locator: Locator,
    display_name: String,
    timestamp_ms: i64,
}

struct TickerHandle {
    signal: Arc<(Mutex<bool>, Condvar)>,
    thread: Option<thread::JoinHandle<()>>,
}

struct EngineShared {
    pipeline: Arc<dyn MediaPipeline>,
    store: Arc<dyn PlayerStore>,
    broadcaster: StateBroadcaster,
    state: Mutex<EngineState>,
    ticker: Mutex<Option<TickerHandle>>,
    history_tx: Mutex<Option<mpsc::Sender<HistoryJob>>>,
    config: EngineConfig,
}

impl EngineShared {
    fn cancel_ticker(&self) {
        let handle = self.ticker.lock().take();
        if let Some(mut handle) = handle {
            {
                let (stop, condvar) = &*handle.signal;
                *stop.lock() = true;
                condvar.notify_all();
            }
            if let Some(thread) = handle.thread.take() {
                // The ticker itself can end up running this (it may hold the
                // last live reference); joining there would deadlock.
                if thread.thread().id() != std::thread::current().id() {
                    let _ = thread.join();
                }
            }
        }
    }
}

impl Drop for EngineShared {
    fn drop(&mut self) {
        // The ticker only holds a weak reference back here, so it must be
        // told to stop explicitly.
        self.cancel_ticker();
    }
}

/// The playback engine. Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct PlaybackEngine {
    shared: Arc<EngineShared>,
}

impl PlaybackEngine {
    pub fn new(
        pipeline: Arc<dyn MediaPipeline>,
        store: Arc<dyn PlayerStore>,
        config: EngineConfig,
    ) -> Self {
        let mode = store.load_play_mode();
        let shared = Arc::new(EngineShared {
            pipeline: Arc::clone(&pipeline),
            store: Arc::clone(&store),
            broadcaster: StateBroadcaster::new(config.progress_interval),
            state: Mutex::new(EngineState {
                playlist: Vec::new(),
                index: 0,
                current: None,
                mode,
                transport: Transport::Idle,
                duration_ms: 0,
                volume: 1.0,
                in_flight: None,
                shuffle: None,
                counts: HashMap::new(),
                owner: None,
            }),
            ticker: Mutex::new(None),
            history_tx: Mutex::new(None),
            config,
        });

        // History writes are fire-and-forget: transport calls only enqueue.
        let (tx, rx) = mpsc::channel::<HistoryJob>();
        *shared.history_tx.lock() = Some(tx);
        let history_store = Arc::clone(&store);
        thread::spawn(move || {
            for job in rx.iter() {
                history_store.record_history(
                    &job.owner,
                    &job.locator,
                    &job.display_name,
                    job.timestamp_ms,
                );
            }
        });

        pipeline.set_listener(Arc::new(EngineListener {
            shared: Arc::downgrade(&shared),
        }));

        Self { shared }
    }

    // -----------------------------------------------------------------
    // Transport operations
    // -----------------------------------------------------------------

    /// Start playing `track`. Returns immediately; success is signaled
    /// through observers once the prepare completes. Any prior in-flight
    /// prepare is fenced out.
    pub fn play(&self, track: &Track) {
        let locator = {
            let mut state = self.shared.state.lock();
            if let Some(position) = state
                .playlist
                .iter()
                .position(|t| t.locator == track.locator)
            {
                state.index = position;
                if state.mode == PlayMode::Shuffle {
                    if let Some(sequencer) = state.shuffle.as_mut() {
                        sequencer.resolve_cursor(position);
                    }
                }
            }
            state.current = Some(track.clone());
            state.in_flight = Some(track.locator.clone());
            state.transport = Transport::Preparing;
            track.locator.clone()
        };

        self.shared.cancel_ticker();
        log::debug!("preparing {}", locator);
        self.shared.pipeline.prepare(&locator);
    }

    /// Play the track at `index`. An out-of-range index falls back to 0;
    /// an empty playlist makes this a no-op.
    pub fn play_at(&self, index: usize) {
        let track = {
            let state = self.shared.state.lock();
            if state.playlist.is_empty() {
                return;
            }
            let effective = if index < state.playlist.len() { index } else { 0 };
            state.playlist[effective].clone()
        };
        self.play(&track);
    }

    /// Toggle between playing and paused. No-op from Idle or Preparing.
    pub fn toggle_pause(&self) {
        enum Action {
            Pause,
            Resume,
        }
        let action = {
            let mut state = self.shared.state.lock();
            match state.transport {
                Transport::Playing => {
                    state.transport = Transport::Paused;
                    Action::Pause
                }
                Transport::Paused => {
                    state.transport = Transport::Playing;
                    Action::Resume
                }
                _ => return,
            }
        };
        match action {
            Action::Pause => {
                self.shared.pipeline.pause();
                self.shared.cancel_ticker();
                self.shared
                    .broadcaster
                    .emit(PlayerEvent::PlayStateChanged { playing: false });
            }
            Action::Resume => {
                self.shared.pipeline.resume();
                start_ticker(&self.shared);
                self.shared
                    .broadcaster
                    .emit(PlayerEvent::PlayStateChanged { playing: true });
            }
        }
    }

    /// Advance according to the current play mode.
    pub fn next(&self) {
        self.step(Direction::Forward);
    }

    /// Retreat according to the current play mode.
    pub fn previous(&self) {
        self.step(Direction::Backward);
    }

    fn step(&self, direction: Direction) {
        let track = {
            let mut state = self.shared.state.lock();
            if state.playlist.is_empty() {
                return;
            }
            let len = state.playlist.len();
            let target = match state.mode {
                PlayMode::RepeatOne => state.index,
                PlayMode::Sequential => match direction {
                    Direction::Forward => (state.index + 1) % len,
                    Direction::Backward => (state.index + len - 1) % len,
                },
                PlayMode::Shuffle => {
                    let index = state.index;
                    let sequencer = state
                        .shuffle
                        .get_or_insert_with(|| ShuffleSequencer::new(len, index));
                    let stepped = match direction {
                        Direction::Forward => sequencer.advance(),
                        Direction::Backward => sequencer.retreat(),
                    };
                    stepped.unwrap_or(state.index)
                }
            };
            state.index = target;
            state.playlist[target].clone()
        };
        self.play(&track);
    }

    /// Jump to `position_ms`, silently clamped to the track bounds.
    /// Play/pause state is unchanged.
    pub fn seek(&self, position_ms: u64) {
        let clamped = {
            let state = self.shared.state.lock();
            position_ms.min(state.duration_ms)
        };
        self.shared.pipeline.seek(clamped);
    }

    /// Set output volume, silently clamped to `[0.0, 1.0]`.
    pub fn set_volume(&self, volume: f32) {
        let clamped = volume.clamp(0.0, 1.0);
        self.shared.state.lock().volume = clamped;
        self.shared.pipeline.set_volume(clamped);
    }

    /// Switch play mode. Entering shuffle (re)generates the order with the
    /// cursor on the current track; leaving it discards the order. The mode
    /// is persisted immediately.
    pub fn set_play_mode(&self, mode: PlayMode) {
        {
            let mut state = self.shared.state.lock();
            let previous = state.mode;
            state.mode = mode;
            if mode == PlayMode::Shuffle {
                let len = state.playlist.len();
                let index = state.index;
                state.shuffle = Some(ShuffleSequencer::new(len, index));
            } else if previous == PlayMode::Shuffle {
                state.shuffle = None;
            }
        }
        self.shared.store.save_play_mode(mode);
        self.shared
            .broadcaster
            .emit(PlayerEvent::ModeChanged { mode });
    }

    /// Replace the playlist wholesale. A now-out-of-bounds current index
    /// resets to 0; under shuffle the order is regenerated.
    pub fn set_playlist(&self, tracks: Vec<Track>) {
        let mut state = self.shared.state.lock();
        state.playlist = tracks;
        if state.index >= state.playlist.len() {
            state.index = 0;
        }
        if state.mode == PlayMode::Shuffle {
            let len = state.playlist.len();
            let index = state.index;
            state.shuffle = Some(ShuffleSequencer::new(len, index));
        }
    }

    /// Tear everything down and return to Idle.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            state.in_flight = None;
            state.transport = Transport::Idle;
            state.duration_ms = 0;
        }
        self.shared.pipeline.stop();
        self.shared.cancel_ticker();
        self.shared
            .broadcaster
            .emit(PlayerEvent::PlayStateChanged { playing: false });
    }

    // -----------------------------------------------------------------
    // Observers
    // -----------------------------------------------------------------

    /// Register an observer. It is immediately replayed the full current
    /// state so late subscribers never start blank.
    pub fn register_observer(&self, observer: Arc<dyn PlayerObserver>) {
        let snapshot = {
            let state = self.shared.state.lock();
            let mut events = vec![
                PlayerEvent::PlayStateChanged {
                    playing: state.transport.is_playing(),
                },
                PlayerEvent::SongChanged {
                    track: state.current.clone(),
                },
                PlayerEvent::ModeChanged { mode: state.mode },
            ];
            if let Some(track) = &state.current {
                events.push(PlayerEvent::PlayCountChanged {
                    locator: track.locator.clone(),
                    count: state.counts.get(&track.locator).copied().unwrap_or(0),
                });
            }
            events
        };
        self.shared.broadcaster.register(observer, snapshot);
    }

    pub fn unregister_observer(&self, observer: &Arc<dyn PlayerObserver>) {
        self.shared.broadcaster.unregister(observer);
    }

    // -----------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------

    pub fn playlist(&self) -> Vec<Track> {
        self.shared.state.lock().playlist.clone()
    }

    pub fn current_track(&self) -> Option<Track> {
        self.shared.state.lock().current.clone()
    }

    pub fn current_index(&self) -> usize {
        self.shared.state.lock().index
    }

    pub fn is_playing(&self) -> bool {
        self.shared.state.lock().transport.is_playing()
    }

    pub fn play_mode(&self) -> PlayMode {
        self.shared.state.lock().mode
    }

    pub fn play_count(&self, locator: &Locator) -> u32 {
        self.shared
            .state
            .lock()
            .counts
            .get(locator)
            .copied()
            .unwrap_or(0)
    }

    pub fn position_ms(&self) -> u64 {
        self.shared.pipeline.position_ms()
    }

    pub fn duration_ms(&self) -> u64 {
        self.shared.state.lock().duration_ms
    }

    pub fn volume(&self) -> f32 {
        self.shared.state.lock().volume
    }

    /// Identity used for history records. While unset, history writes are
    /// silently skipped.
    pub fn set_owner(&self, owner: Option<String>) {
        self.shared.state.lock().owner = owner;
    }

    pub fn status(&self) -> PlaybackStatus {
        let position_ms = self.shared.pipeline.position_ms();
        let state = self.shared.state.lock();
        let play_count = state
            .current
            .as_ref()
            .and_then(|t| state.counts.get(&t.locator))
            .copied()
            .unwrap_or(0);
        PlaybackStatus {
            track: state.current.clone(),
            index: state.index,
            transport: state.transport,
            mode: state.mode,
            position_ms,
            duration_ms: state.duration_ms,
            volume: state.volume,
            play_count,
        }
    }
}

enum Direction {
    Forward,
    Backward,
}

fn start_ticker(shared: &Arc<EngineShared>) {
    shared.cancel_ticker();

    let signal = Arc::new((Mutex::new(false), Condvar::new()));
    let thread_signal = Arc::clone(&signal);
    let weak = Arc::downgrade(shared);
    let interval = shared.config.progress_interval;

    let thread = thread::spawn(move || loop {
        {
            let (stop, condvar) = &*thread_signal;
            let mut stopped = stop.lock();
            if *stopped {
                return;
            }
            let result = condvar.wait_for(&mut stopped, interval);
            if *stopped || !result.timed_out() {
                return;
            }
        }
        let Some(shared) = weak.upgrade() else {
            return;
        };
        if !shared.state.lock().transport.is_playing() {
            continue;
        }
        let position_ms = shared.pipeline.position_ms();
        let duration_ms = shared.pipeline.duration_ms();
        shared.broadcaster.emit(PlayerEvent::ProgressChanged {
            position_ms,
            duration_ms,
        });
    });

    *shared.ticker.lock() = Some(TickerHandle {
        signal,
        thread: Some(thread),
    });
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Pipeline-facing side of the engine. Holds a weak reference so a dropped
/// engine cannot be resurrected by a late callback.
struct EngineListener {
    shared: Weak<EngineShared>,
}

impl PipelineListener for EngineListener {
    fn on_ready(&self, locator: &Locator, duration_ms: u64) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };

        let outcome = {
            let mut state = shared.state.lock();
            if state.in_flight.as_ref() != Some(locator) {
                log::debug!("ignoring ready callback for superseded {}", locator);
                return;
            }
            state.transport = Transport::Playing;
            state.duration_ms = duration_ms;
            let count = state.counts.entry(locator.clone()).or_insert(0);
            *count += 1;
            let count = *count;
            (state.current.clone(), count, state.owner.clone())
        };
        let (track, count, owner) = outcome;

        shared.pipeline.start();

        // Causal order: song, then play state, then count.
        shared.broadcaster.emit(PlayerEvent::SongChanged {
            track: track.clone(),
        });
        shared
            .broadcaster
            .emit(PlayerEvent::PlayStateChanged { playing: true });
        shared.broadcaster.emit(PlayerEvent::PlayCountChanged {
            locator: locator.clone(),
            count,
        });

        start_ticker(&shared);

        // Fire-and-forget; skipped without an identified owner.
        if let Some(owner) = owner.filter(|o| !o.is_empty()) {
            let display_name = track
                .as_ref()
                .map(|t| t.name.clone())
                .unwrap_or_default();
            let sender = shared.history_tx.lock().clone();
            if let Some(sender) = sender {
                let _ = sender.send(HistoryJob {
                    owner,
                    locator: locator.clone(),
                    display_name,
                    timestamp_ms: now_ms(),
                });
            }
        }
    }

    fn on_error(&self, locator: &Locator, message: &str) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };

        {
            let mut state = shared.state.lock();
            if state.in_flight.as_ref() != Some(locator) {
                log::debug!("ignoring error callback for superseded {}: {}", locator, message);
                return;
            }
            state.transport = Transport::Idle;
        }

        shared.cancel_ticker();
        log::warn!("playback failed for {}: {}", locator, message);
        shared
            .broadcaster
            .emit(PlayerEvent::PlayStateChanged { playing: false });
        shared.broadcaster.emit(PlayerEvent::PlaybackError {
            message: message.to_string(),
        });
    }

    fn on_complete(&self, locator: &Locator) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };

        {
            let state = shared.state.lock();
            if state.in_flight.as_ref() != Some(locator) {
                log::debug!("ignoring completion callback for superseded {}", locator);
                return;
            }
        }

        // Natural end-of-track is an implicit next(). Dispatch off the
        // pipeline thread: next() re-enters prepare, which tears down the
        // very session delivering this callback.
        let engine = PlaybackEngine {
            shared: Arc::clone(&shared),
        };
        thread::spawn(move || engine.next());
    }
}

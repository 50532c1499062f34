// Observer broadcast for playback state
//
// One typed event per state facet, so observers never have to filter a
// monolithic listener interface. Progress events are additionally throttled
// per observer to keep a fast ticker from flooding slow consumers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::state::PlayMode;
use crate::track::{Locator, Track};

/// Playback state change, one variant per facet.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// The current track changed (None when the playlist emptied)
    SongChanged { track: Option<Track> },

    /// Play/pause flag changed
    PlayStateChanged { playing: bool },

    /// Position tick, delivered at a fixed cadence while playing
    ProgressChanged { position_ms: u64, duration_ms: u64 },

    /// Play mode changed
    ModeChanged { mode: PlayMode },

    /// Play count for the current track changed
    PlayCountChanged { locator: Locator, count: u32 },

    /// Recoverable playback error, advisory only
    PlaybackError { message: String },
}

/// Observer of playback state.
///
/// Implementations should return quickly; events are delivered on engine
/// worker threads.
pub trait PlayerObserver: Send + Sync {
    fn on_event(&self, event: PlayerEvent);
}

struct Registration {
    observer: Arc<dyn PlayerObserver>,
    last_progress: Mutex<Option<Instant>>,
}

impl Registration {
    fn dispatch(&self, event: PlayerEvent, progress_interval: Duration) {
        if let PlayerEvent::ProgressChanged { .. } = event {
            let mut last = self.last_progress.lock();
            if let Some(at) = *last {
                if at.elapsed() < progress_interval {
                    return;
                }
            }
            *last = Some(Instant::now());
        }
        self.observer.on_event(event);
    }
}

/// One-to-many observer registry.
///
/// Every registered observer receives identical events without coordinating
/// with the others; a newly registered observer is immediately replayed the
/// full current state so late subscribers never start from a blank slate.
pub struct StateBroadcaster {
    registrations: Mutex<Vec<Registration>>,
    progress_interval: Duration,
}

impl StateBroadcaster {
    pub fn new(progress_interval: Duration) -> Self {
        Self {
            registrations: Mutex::new(Vec::new()),
            progress_interval,
        }
    }

    /// Register an observer, replaying `snapshot` to it before it starts
    /// receiving live events.
    pub fn register(&self, observer: Arc<dyn PlayerObserver>, snapshot: Vec<PlayerEvent>) {
        for event in snapshot {
            observer.on_event(event);
        }
        self.registrations.lock().push(Registration {
            observer,
            last_progress: Mutex::new(None),
        });
    }

    /// Remove an observer by identity. Unknown observers are ignored.
    pub fn unregister(&self, observer: &Arc<dyn PlayerObserver>) {
        self.registrations
            .lock()
            .retain(|r| !Arc::ptr_eq(&r.observer, observer));
    }

    pub fn observer_count(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Deliver an event to every registered observer, in registration order.
    pub fn emit(&self, event: PlayerEvent) {
        let registrations = self.registrations.lock();
        for registration in registrations.iter() {
            registration.dispatch(event.clone(), self.progress_interval);
        }
    }
}

impl Default for StateBroadcaster {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Observer that records everything it sees.
    pub struct RecordingObserver {
        events: Mutex<Vec<PlayerEvent>>,
    }

    impl RecordingObserver {
        pub fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }

        pub fn events(&self) -> Vec<PlayerEvent> {
            self.events.lock().clone()
        }

        pub fn clear(&self) {
            self.events.lock().clear();
        }
    }

    impl PlayerObserver for RecordingObserver {
        fn on_event(&self, event: PlayerEvent) {
            self.events.lock().push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingObserver;
    use super::*;
    use std::thread;

    #[test]
    fn progress_events_are_throttled_per_observer() {
        let broadcaster = StateBroadcaster::new(Duration::from_millis(100));
        let observer = Arc::new(RecordingObserver::new());
        broadcaster.register(observer.clone(), Vec::new());

        for i in 0..10 {
            broadcaster.emit(PlayerEvent::ProgressChanged {
                position_ms: i * 100,
                duration_ms: 1000,
            });
            thread::sleep(Duration::from_millis(10));
        }

        assert!(observer.events().len() < 10);
    }

    #[test]
    fn state_changes_are_not_throttled() {
        let broadcaster = StateBroadcaster::new(Duration::from_millis(100));
        let observer = Arc::new(RecordingObserver::new());
        broadcaster.register(observer.clone(), Vec::new());

        broadcaster.emit(PlayerEvent::PlayStateChanged { playing: true });
        broadcaster.emit(PlayerEvent::PlayStateChanged { playing: false });

        assert_eq!(observer.events().len(), 2);
    }

    #[test]
    fn registration_replays_snapshot_to_new_observer_only() {
        let broadcaster = StateBroadcaster::default();
        let first = Arc::new(RecordingObserver::new());
        broadcaster.register(first.clone(), Vec::new());

        let late = Arc::new(RecordingObserver::new());
        broadcaster.register(
            late.clone(),
            vec![
                PlayerEvent::PlayStateChanged { playing: true },
                PlayerEvent::ModeChanged {
                    mode: PlayMode::Shuffle,
                },
            ],
        );

        assert_eq!(late.events().len(), 2);
        assert!(first.events().is_empty());
    }

    #[test]
    fn observers_receive_identical_events_independently() {
        let broadcaster = StateBroadcaster::default();
        let a = Arc::new(RecordingObserver::new());
        let b = Arc::new(RecordingObserver::new());
        broadcaster.register(a.clone(), Vec::new());
        broadcaster.register(b.clone(), Vec::new());

        broadcaster.emit(PlayerEvent::PlayStateChanged { playing: true });

        assert_eq!(a.events().len(), 1);
        assert_eq!(b.events().len(), 1);
    }

    #[test]
    fn unregister_stops_delivery() {
        let broadcaster = StateBroadcaster::default();
        let observer = Arc::new(RecordingObserver::new());
        let as_dyn: Arc<dyn PlayerObserver> = observer.clone();
        broadcaster.register(as_dyn.clone(), Vec::new());
        broadcaster.unregister(&as_dyn);

        broadcaster.emit(PlayerEvent::PlayStateChanged { playing: true });
        assert!(observer.events().is_empty());
        assert_eq!(broadcaster.observer_count(), 0);
    }
}

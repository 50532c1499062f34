// Local-file playback core
//
// Transport engine with a fenced asynchronous prepare protocol, a
// one-to-many observer broadcast, time-synced lyrics, and a keyed
// persistence bridge for play mode, history, and favorites.
//
// The decode/output pipeline sits behind the `MediaPipeline` trait; the
// Symphonia/cpal implementation is gated on the `native` feature so the
// engine can run headless against a custom pipeline.

pub mod catalog;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod events;
pub mod lyrics;
pub mod pipeline;
pub mod shuffle;
pub mod state;
pub mod store;
pub mod track;

#[cfg(feature = "native")]
pub mod output;

// Re-exports
pub use catalog::{FsCatalog, MediaCatalog};
pub use engine::{EngineConfig, PlaybackEngine};
pub use error::{PlayerError, Result};
pub use events::{PlayerEvent, PlayerObserver, StateBroadcaster};
pub use lyrics::{find_companion_lyric, LyricLine, LyricTrack};
pub use pipeline::{MediaPipeline, PipelineListener};
pub use shuffle::ShuffleSequencer;
pub use state::{PlayMode, PlaybackStatus, Transport};
pub use store::{FavoriteRecord, HistoryRecord, JsonFileStore, MemoryStore, PlayerStore};
pub use track::{Locator, LocatorKind, Track};

#[cfg(feature = "native")]
pub use output::CpalPipeline;

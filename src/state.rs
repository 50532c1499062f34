// Session state types for the playback engine

use serde::{Deserialize, Serialize};

use crate::track::Track;

/// Traversal mode over the playlist. Persisted across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayMode {
    #[default]
    Sequential,
    Shuffle,
    RepeatOne,
}

/// Transport state of the engine.
///
/// There is no error state: a failed prepare returns the engine to a
/// quiescent not-playing condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// No track loaded
    Idle,
    /// A prepare request is in flight
    Preparing,
    /// Audio is playing
    Playing,
    /// Audio is paused
    Paused,
}

impl Transport {
    pub fn is_playing(self) -> bool {
        self == Transport::Playing
    }
}

/// Snapshot of the current playback session, as seen by callers.
#[derive(Debug, Clone)]
pub struct PlaybackStatus {
    pub track: Option<Track>,
    pub index: usize,
    pub transport: Transport,
    pub mode: PlayMode,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub volume: f32,
    pub play_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_mode_serializes_stably() {
        let json = serde_json::to_string(&PlayMode::RepeatOne).unwrap();
        assert_eq!(json, "\"repeat_one\"");
        let back: PlayMode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PlayMode::RepeatOne);
    }

    #[test]
    fn default_mode_is_sequential() {
        assert_eq!(PlayMode::default(), PlayMode::Sequential);
    }
}

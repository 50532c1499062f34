// Persistence bridge
//
// The engine treats persistence as an opaque keyed record store: a play-mode
// preference, play-history records unique per (owner, locator), and
// favorites. Writes are best-effort; a failed write is logged and swallowed,
// never surfaced to the transport path that triggered it.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::state::PlayMode;
use crate::track::Locator;

/// One play-history entry. Unique per `(owner, locator)`; a repeat play
/// refreshes the timestamp instead of duplicating the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub owner: String,
    pub locator: Locator,
    pub display_name: String,
    pub timestamp_ms: i64,
}

/// One favorites entry, unique per `(owner, locator)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteRecord {
    pub owner: String,
    pub locator: Locator,
    pub display_name: String,
}

/// Keyed record store consumed by the engine.
pub trait PlayerStore: Send + Sync {
    /// Persisted play mode; `Sequential` when absent or corrupt.
    fn load_play_mode(&self) -> PlayMode;
    fn save_play_mode(&self, mode: PlayMode);

    /// Record a play. Idempotent by `(owner, locator)`: a repeat play
    /// updates the existing record's timestamp.
    fn record_history(&self, owner: &str, locator: &Locator, display_name: &str, timestamp_ms: i64);

    /// Recent history for `owner`, most recent first.
    fn history(&self, owner: &str, limit: usize) -> Vec<HistoryRecord>;
    fn clear_history(&self, owner: &str);

    fn add_favorite(&self, owner: &str, locator: &Locator, display_name: &str);
    fn remove_favorite(&self, owner: &str, locator: &Locator);
    fn favorites(&self, owner: &str) -> Vec<FavoriteRecord>;
    fn is_favorite(&self, owner: &str, locator: &Locator) -> bool;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDoc {
    #[serde(default)]
    play_mode: PlayMode,
    #[serde(default)]
    history: Vec<HistoryRecord>,
    #[serde(default)]
    favorites: Vec<FavoriteRecord>,
}

impl StoreDoc {
    fn record_history(
        &mut self,
        owner: &str,
        locator: &Locator,
        display_name: &str,
        timestamp_ms: i64,
    ) {
        if let Some(existing) = self
            .history
            .iter_mut()
            .find(|r| r.owner == owner && r.locator == *locator)
        {
            existing.timestamp_ms = timestamp_ms;
            existing.display_name = display_name.to_string();
        } else {
            self.history.push(HistoryRecord {
                owner: owner.to_string(),
                locator: locator.clone(),
                display_name: display_name.to_string(),
                timestamp_ms,
            });
        }
    }

    fn history(&self, owner: &str, limit: usize) -> Vec<HistoryRecord> {
        let mut records: Vec<HistoryRecord> = self
            .history
            .iter()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
        records.truncate(limit);
        records
    }

    fn add_favorite(&mut self, owner: &str, locator: &Locator, display_name: &str) {
        if self
            .favorites
            .iter()
            .any(|r| r.owner == owner && r.locator == *locator)
        {
            return;
        }
        self.favorites.push(FavoriteRecord {
            owner: owner.to_string(),
            locator: locator.clone(),
            display_name: display_name.to_string(),
        });
    }
}

/// In-memory store. Suits headless use and tests; nothing survives drop.
#[derive(Default)]
pub struct MemoryStore {
    doc: Mutex<StoreDoc>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlayerStore for MemoryStore {
    fn load_play_mode(&self) -> PlayMode {
        self.doc.lock().play_mode
    }

    fn save_play_mode(&self, mode: PlayMode) {
        self.doc.lock().play_mode = mode;
    }

    fn record_history(&self, owner: &str, locator: &Locator, display_name: &str, timestamp_ms: i64) {
        self.doc
            .lock()
            .record_history(owner, locator, display_name, timestamp_ms);
    }

    fn history(&self, owner: &str, limit: usize) -> Vec<HistoryRecord> {
        self.doc.lock().history(owner, limit)
    }

    fn clear_history(&self, owner: &str) {
        self.doc.lock().history.retain(|r| r.owner != owner);
    }

    fn add_favorite(&self, owner: &str, locator: &Locator, display_name: &str) {
        self.doc.lock().add_favorite(owner, locator, display_name);
    }

    fn remove_favorite(&self, owner: &str, locator: &Locator) {
        self.doc
            .lock()
            .favorites
            .retain(|r| !(r.owner == owner && r.locator == *locator));
    }

    fn favorites(&self, owner: &str) -> Vec<FavoriteRecord> {
        self.doc
            .lock()
            .favorites
            .iter()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect()
    }

    fn is_favorite(&self, owner: &str, locator: &Locator) -> bool {
        self.doc
            .lock()
            .favorites
            .iter()
            .any(|r| r.owner == owner && r.locator == *locator)
    }
}

/// JSON-document store at a caller-chosen path. The whole document is read
/// at open and rewritten after every mutation; a corrupt or missing file
/// falls back to defaults.
pub struct JsonFileStore {
    path: PathBuf,
    doc: Mutex<StoreDoc>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let doc = Self::read_doc(&path);
        Self {
            path,
            doc: Mutex::new(doc),
        }
    }

    fn read_doc(path: &Path) -> StoreDoc {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(doc) => doc,
                Err(err) => {
                    log::warn!("store file {} corrupt, using defaults: {}", path.display(), err);
                    StoreDoc::default()
                }
            },
            Err(_) => StoreDoc::default(),
        }
    }

    fn flush(&self, doc: &StoreDoc) {
        let contents = match serde_json::to_string_pretty(doc) {
            Ok(contents) => contents,
            Err(err) => {
                log::warn!("store serialize failed: {}", err);
                return;
            }
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = fs::create_dir_all(parent);
            }
        }
        if let Err(err) = fs::write(&self.path, contents) {
            log::warn!("store write to {} failed: {}", self.path.display(), err);
        }
    }

    fn mutate(&self, f: impl FnOnce(&mut StoreDoc)) {
        let mut doc = self.doc.lock();
        f(&mut doc);
        self.flush(&doc);
    }
}

impl PlayerStore for JsonFileStore {
    fn load_play_mode(&self) -> PlayMode {
        self.doc.lock().play_mode
    }

    fn save_play_mode(&self, mode: PlayMode) {
        self.mutate(|doc| doc.play_mode = mode);
    }

    fn record_history(&self, owner: &str, locator: &Locator, display_name: &str, timestamp_ms: i64) {
        self.mutate(|doc| doc.record_history(owner, locator, display_name, timestamp_ms));
    }

    fn history(&self, owner: &str, limit: usize) -> Vec<HistoryRecord> {
        self.doc.lock().history(owner, limit)
    }

    fn clear_history(&self, owner: &str) {
        self.mutate(|doc| doc.history.retain(|r| r.owner != owner));
    }

    fn add_favorite(&self, owner: &str, locator: &Locator, display_name: &str) {
        self.mutate(|doc| doc.add_favorite(owner, locator, display_name));
    }

    fn remove_favorite(&self, owner: &str, locator: &Locator) {
        self.mutate(|doc| {
            doc.favorites
                .retain(|r| !(r.owner == owner && r.locator == *locator));
        });
    }

    fn favorites(&self, owner: &str) -> Vec<FavoriteRecord> {
        self.doc
            .lock()
            .favorites
            .iter()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect()
    }

    fn is_favorite(&self, owner: &str, locator: &Locator) -> bool {
        self.doc
            .lock()
            .favorites
            .iter()
            .any(|r| r.owner == owner && r.locator == *locator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator(s: &str) -> Locator {
        Locator::new(s)
    }

    #[test]
    fn history_is_idempotent_by_owner_and_locator() {
        let store = MemoryStore::new();
        store.record_history("kay", &locator("/m/a.mp3"), "a", 1000);
        store.record_history("kay", &locator("/m/a.mp3"), "a", 2000);

        let records = store.history("kay", 10);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp_ms, 2000);
    }

    #[test]
    fn history_is_scoped_per_owner_and_recent_first() {
        let store = MemoryStore::new();
        store.record_history("kay", &locator("/m/a.mp3"), "a", 1000);
        store.record_history("kay", &locator("/m/b.mp3"), "b", 3000);
        store.record_history("lin", &locator("/m/c.mp3"), "c", 2000);

        let records = store.history("kay", 10);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].display_name, "b");
        assert_eq!(records[1].display_name, "a");

        store.clear_history("kay");
        assert!(store.history("kay", 10).is_empty());
        assert_eq!(store.history("lin", 10).len(), 1);
    }

    #[test]
    fn history_respects_limit() {
        let store = MemoryStore::new();
        for i in 0..15 {
            store.record_history("kay", &locator(&format!("/m/{i}.mp3")), "t", i);
        }
        assert_eq!(store.history("kay", 10).len(), 10);
    }

    #[test]
    fn favorites_are_unique_per_owner_and_locator() {
        let store = MemoryStore::new();
        store.add_favorite("kay", &locator("/m/a.mp3"), "a");
        store.add_favorite("kay", &locator("file:///m/a.mp3"), "a");
        assert_eq!(store.favorites("kay").len(), 1);
        assert!(store.is_favorite("kay", &locator("/m/a.mp3")));

        store.remove_favorite("kay", &locator("/m/a.mp3"));
        assert!(!store.is_favorite("kay", &locator("/m/a.mp3")));
    }

    #[test]
    fn json_store_round_trips_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.json");

        {
            let store = JsonFileStore::open(&path);
            store.save_play_mode(PlayMode::Shuffle);
            store.record_history("kay", &locator("/m/a.mp3"), "a", 42);
            store.add_favorite("kay", &locator("/m/a.mp3"), "a");
        }

        let reopened = JsonFileStore::open(&path);
        assert_eq!(reopened.load_play_mode(), PlayMode::Shuffle);
        assert_eq!(reopened.history("kay", 10).len(), 1);
        assert!(reopened.is_favorite("kay", &locator("/m/a.mp3")));
    }

    #[test]
    fn corrupt_store_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.json");
        fs::write(&path, "not json {").unwrap();

        let store = JsonFileStore::open(&path);
        assert_eq!(store.load_play_mode(), PlayMode::Sequential);
        assert!(store.history("kay", 10).is_empty());
    }
}

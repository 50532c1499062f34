// Track and locator value types
//
// A locator is the identity of a playable resource. Play counts and history
// records key on the normalized form, so two spellings of the same resource
// (with or without a `file://` prefix, stray whitespace) collapse to one key.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// What kind of resource a locator points at, derived from its scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorKind {
    /// Direct filesystem path (no scheme, or a stripped `file://`)
    File,
    /// Media-catalog reference (`catalog://`)
    Catalog,
    /// Document-tree reference (`tree://`)
    Tree,
    /// Any other scheme
    Other,
}

/// Opaque, normalized reference to a playable resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(String);

impl Locator {
    pub fn new(raw: impl AsRef<str>) -> Self {
        let trimmed = raw.as_ref().trim();
        let normalized = trimmed.strip_prefix("file://").unwrap_or(trimmed);
        Locator(normalized.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> LocatorKind {
        if let Some(rest) = self.0.split_once("://") {
            match rest.0 {
                "catalog" => LocatorKind::Catalog,
                "tree" => LocatorKind::Tree,
                _ => LocatorKind::Other,
            }
        } else {
            LocatorKind::File
        }
    }

    /// Filesystem path for `File` locators, `None` otherwise.
    pub fn to_path(&self) -> Option<PathBuf> {
        match self.kind() {
            LocatorKind::File => Some(PathBuf::from(&self.0)),
            _ => None,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Path> for Locator {
    fn from(path: &Path) -> Self {
        Locator::new(path.to_string_lossy())
    }
}

impl From<PathBuf> for Locator {
    fn from(path: PathBuf) -> Self {
        Locator::from(path.as_path())
    }
}

/// A playable entry in a playlist. Identity is the locator; the name is the
/// display name used for history records and companion lyric lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub name: String,
    pub locator: Locator,
}

impl Track {
    pub fn new(name: impl Into<String>, locator: Locator) -> Self {
        Track {
            name: name.into(),
            locator,
        }
    }
}

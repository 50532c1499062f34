// Locator resolution collaborator
//
// The core only ever needs two capabilities from whatever owns the media:
// open a locator for streaming read, and list the resources that share its
// logical container. How that happens (plain filesystem, content catalog,
// document tree) is the collaborator's business.

use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

use crate::track::{Locator, LocatorKind};

/// Access to the store of media resources behind locators.
pub trait MediaCatalog: Send + Sync {
    /// Open a locator for streaming read.
    fn open(&self, locator: &Locator) -> io::Result<Box<dyn Read + Send>>;

    /// Resolve a locator to a concrete filesystem path, when one exists.
    fn resolve_path(&self, locator: &Locator) -> Option<PathBuf>;

    /// List the resources in the same logical container as `locator`,
    /// as (display name, locator) pairs. Unknown containers yield nothing.
    fn siblings(&self, locator: &Locator) -> Vec<(String, Locator)>;
}

/// Filesystem-backed catalog. Handles `File` locators directly and treats
/// `tree://` references as rooted paths.
#[derive(Debug, Default)]
pub struct FsCatalog;

impl FsCatalog {
    pub fn new() -> Self {
        FsCatalog
    }

    fn path_for(&self, locator: &Locator) -> Option<PathBuf> {
        match locator.kind() {
            LocatorKind::File => locator.to_path(),
            LocatorKind::Tree => locator
                .as_str()
                .strip_prefix("tree://")
                .map(|rest| PathBuf::from("/").join(rest)),
            _ => None,
        }
    }
}

impl MediaCatalog for FsCatalog {
    fn open(&self, locator: &Locator) -> io::Result<Box<dyn Read + Send>> {
        let path = self.path_for(locator).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::Unsupported,
                format!("not a filesystem locator: {}", locator),
            )
        })?;
        let file = File::open(path)?;
        Ok(Box::new(file))
    }

    fn resolve_path(&self, locator: &Locator) -> Option<PathBuf> {
        let path = self.path_for(locator)?;
        path.exists().then_some(path)
    }

    fn siblings(&self, locator: &Locator) -> Vec<(String, Locator)> {
        let Some(path) = self.path_for(locator) else {
            return Vec::new();
        };
        let Some(parent) = path.parent() else {
            return Vec::new();
        };
        let Ok(entries) = std::fs::read_dir(parent) else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter(|entry| entry.path().is_file())
            .map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                (name, Locator::from(entry.path()))
            })
            .collect()
    }
}

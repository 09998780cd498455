// Local music folder scanned into a searchable track list

use super::TrackResolver;
use crate::decoder::read_media_info;
use crate::error::{PlayerError, Result};
use crate::track::TrackLocator;
use crate::worker::WorkerControls;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "m4a", "aac", "ogg", "opus"];

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryEntry {
    pub path: PathBuf,
    /// Path relative to the library root, `/`-separated
    pub relative: String,
    /// File stem
    pub title: String,
}

impl LibraryEntry {
    /// Locator for this entry, with the duration read from the file header
    pub fn locator(&self) -> TrackLocator {
        let duration = read_media_info(&self.path)
            .ok()
            .and_then(|info| info.duration_seconds)
            .unwrap_or(0);
        TrackLocator::new(
            self.relative.clone(),
            self.path.to_string_lossy(),
            self.title.clone(),
            duration,
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct Library {
    root: PathBuf,
    entries: Vec<LibraryEntry>,
}

impl Library {
    /// Recursively collect audio files under `root`, sorted by path.
    /// A missing folder yields an empty library.
    pub fn scan(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            log::warn!("Music folder {} not found, library is empty", root.display());
            return Ok(Self {
                root: root.to_path_buf(),
                entries: Vec::new(),
            });
        }

        let root = root.canonicalize()?;
        let mut entries: Vec<LibraryEntry> = WalkDir::new(&root)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::warn!("Skipping unreadable library entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && is_audio_file(entry.path()))
            .filter_map(|entry| {
                let path = entry.into_path();
                let relative = path
                    .strip_prefix(&root)
                    .ok()?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                let title = path.file_stem()?.to_string_lossy().into_owned();
                Some(LibraryEntry { path, relative, title })
            })
            .collect();

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        log::info!("Scanned {} tracks in {}", entries.len(), root.display());

        Ok(Self { root, entries })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LibraryEntry] {
        &self.entries
    }

    /// Entries whose title contains `query`, case-insensitively, in path order
    pub fn search(&self, query: &str, limit: usize) -> Vec<&LibraryEntry> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.entries
            .iter()
            .filter(|entry| entry.title.to_lowercase().contains(&needle))
            .take(limit)
            .collect()
    }

    /// Entry at `index`, wrapping in both directions for next/previous navigation
    pub fn track(&self, index: i64) -> Option<&LibraryEntry> {
        if self.entries.is_empty() {
            return None;
        }
        let wrapped = index.rem_euclid(self.entries.len() as i64) as usize;
        self.entries.get(wrapped)
    }
}

/// Resolves queries against the local library
pub struct LibraryResolver {
    library: RwLock<Library>,
    max_results: usize,
}

impl LibraryResolver {
    pub fn new(library: Library) -> Self {
        Self {
            library: RwLock::new(library),
            max_results: 12,
        }
    }

    pub fn scan(root: &Path) -> Result<Self> {
        Ok(Self::new(Library::scan(root)?))
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    /// Re-read the folder, picking up added or removed files
    pub fn rescan(&self) -> Result<usize> {
        let root = self.library.read().root().to_path_buf();
        let library = Library::scan(&root)?;
        let count = library.len();
        *self.library.write() = library;
        Ok(count)
    }

    /// Search results for a picker UI
    pub fn search(&self, query: &str) -> Vec<LibraryEntry> {
        self.library
            .read()
            .search(query, self.max_results)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn track(&self, index: i64) -> Option<TrackLocator> {
        self.library.read().track(index).map(LibraryEntry::locator)
    }
}

impl TrackResolver for LibraryResolver {
    fn name(&self) -> &'static str {
        "library"
    }

    /// In-memory lookup; cancellation is not checked
    fn resolve(&self, query: &str, _controls: &WorkerControls) -> Result<TrackLocator> {
        let library = self.library.read();
        let matches = library.search(query, usize::MAX);
        let needle = query.trim().to_lowercase();

        // Prefer an exact title over a partial one
        let entry = matches
            .iter()
            .find(|entry| entry.title.to_lowercase() == needle)
            .or_else(|| matches.first())
            .ok_or_else(|| PlayerError::ResolutionFailed(format!("'{}' not in library", query)))?;

        Ok(entry.locator())
    }
}

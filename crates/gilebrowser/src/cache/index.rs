//! The search-index cache: a gzip-compressed JSON listing of every file
//! under every root, consumed by the client-side fuzzy search.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::cache::size::SAFETY_TTL;
use crate::roots::Roots;

const MAX_WALK_DEPTH: usize = 256;

/// One file in the search index. Directories are excluded to keep the index
/// small; hidden files are included - visibility is the administrator's
/// choice of served paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexEntry {
    pub name: String,
    /// URL path, e.g. `/pub/subdir/file.txt`.
    pub path: String,
    pub size: i64,
}

/// The serialized wire shape: `{"files": [...]}`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FileIndex {
    pub files: Vec<IndexEntry>,
}

#[derive(Debug, Default)]
struct IndexState {
    /// gzip-compressed JSON; `None` until the first build.
    gz_json: Option<Bytes>,
    /// `None` means expired (the next read refreshes).
    expires: Option<Instant>,
    refreshing: bool,
}

/// Cache holding the index pre-serialized as gzip(JSON).
///
/// The structured `FileIndex` is discarded right after serialization, so the
/// steady-state footprint is just the compressed blob - typically 5-10x
/// smaller than the JSON it encodes.
#[derive(Debug, Default)]
pub struct IndexCache {
    state: Mutex<IndexState>,
}

impl IndexCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the compressed index, rebuilding in the background when stale.
    ///
    /// The first call builds synchronously so callers never see an empty
    /// cache; later calls with an expired deadline return the current bytes
    /// immediately and schedule a single refresh.
    pub fn index_bytes(self: &Arc<Self>, roots: &Roots) -> Bytes {
        let (data, expired, refreshing) = {
            let state = self.state.lock().expect("index cache poisoned");
            let expired = state.expires.map_or(true, |e| Instant::now() > e);
            (state.gz_json.clone(), expired, state.refreshing)
        };

        let Some(data) = data else {
            let fresh = serialize_index(&build_index(roots));
            let mut state = self.state.lock().expect("index cache poisoned");
            // Another first-caller may have raced us here; last write wins,
            // both blobs describe the same instant within walk jitter.
            state.gz_json = Some(fresh.clone());
            state.expires = Some(Instant::now() + SAFETY_TTL);
            return fresh;
        };

        if expired && !refreshing {
            {
                let mut state = self.state.lock().expect("index cache poisoned");
                state.refreshing = true;
            }

            let cache = Arc::clone(self);
            let roots = roots.clone();
            std::thread::Builder::new()
                .name("index-refresh".into())
                .spawn(move || cache.refresh(&roots))
                .expect("spawning index refresh thread");
        }

        data
    }

    /// Rebuilds the blob, containing any panic so the `refreshing` flag is
    /// always cleared and a future request can retry.
    fn refresh(&self, roots: &Roots) {
        let result = catch_unwind(AssertUnwindSafe(|| serialize_index(&build_index(roots))));

        let mut state = self.state.lock().expect("index cache poisoned");
        match result {
            Ok(fresh) => {
                state.gz_json = Some(fresh);
                state.expires = Some(Instant::now() + SAFETY_TTL);
            }
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic".into());
                tracing::error!("cache: index refresh panic: {msg}");
            }
        }
        state.refreshing = false;
    }

    /// Installs a pre-built blob (warmer fast path).
    pub fn install(&self, blob: Bytes) {
        let mut state = self.state.lock().expect("index cache poisoned");
        state.gz_json = Some(blob);
        state.expires = Some(Instant::now() + SAFETY_TTL);
    }

    /// Marks the index expired so the next read triggers a background
    /// rebuild. An in-flight refresh is left to complete.
    pub fn invalidate(&self) {
        let mut state = self.state.lock().expect("index cache poisoned");
        state.expires = None;
    }
}

/// Walks every root and builds the flat file index.
pub fn build_index(roots: &Roots) -> FileIndex {
    let mut index = FileIndex::default();
    for (label, fs_root) in roots.iter() {
        let mut visited = HashSet::new();
        if let Ok(canonical) = fs::canonicalize(fs_root) {
            visited.insert(canonical);
        }
        walk_files(
            fs_root,
            &format!("/{label}"),
            &mut visited,
            &mut index.files,
            0,
        );
    }
    index
}

fn walk_files(
    dir: &Path,
    url_dir: &str,
    visited: &mut HashSet<PathBuf>,
    out: &mut Vec<IndexEntry>,
    depth: usize,
) {
    if depth > MAX_WALK_DEPTH {
        return;
    }
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => continue, // non-UTF-8 names can't become URL paths
        };
        let path = entry.path();
        let url_path = format!("{url_dir}/{name}");

        // Follows symlinks, same policy as the size walker.
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(_) => continue,
        };

        if meta.is_dir() {
            let guard = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
            if visited.insert(guard) {
                walk_files(&path, &url_path, visited, out, depth + 1);
            }
        } else {
            out.push(IndexEntry {
                name,
                path: url_path,
                size: meta.len() as i64,
            });
        }
    }
}

/// JSON-encodes and gzip-compresses an index at the fast compression level.
///
/// Degradation path: a JSON failure serializes an empty index instead; a
/// compression failure returns the raw JSON so callers never receive nothing.
pub fn serialize_index(index: &FileIndex) -> Bytes {
    let raw = serde_json::to_vec(index).unwrap_or_else(|_| b"{\"files\":[]}".to_vec());
    match gzip_fast(&raw) {
        Ok(gz) => Bytes::from(gz),
        Err(_) => Bytes::from(raw),
    }
}

fn gzip_fast(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(data.len() / 4 + 64),
        Compression::fast(),
    );
    encoder.write_all(data)?;
    encoder.finish()
}

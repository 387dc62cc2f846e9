//! Filesystem watcher: turns kernel change notifications into targeted cache
//! invalidations so listings stay live without polling.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};

use crate::cache::{IndexCache, SizeCache};
use crate::roots::Roots;

enum Msg {
    Fs(notify::Result<Event>),
    Shutdown,
}

/// Handle to the running watcher. Dropping it (or calling [`stop`]) ends the
/// event loop and releases every kernel watch.
///
/// [`stop`]: WatcherHandle::stop
pub struct WatcherHandle {
    tx: mpsc::Sender<Msg>,
}

impl WatcherHandle {
    pub fn stop(&self) {
        let _ = self.tx.send(Msg::Shutdown);
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(Msg::Shutdown);
    }
}

/// Starts recursive watches over every root and spawns the event loop.
///
/// Returns immediately; event processing runs on a dedicated thread that owns
/// the watcher (new directories need watches added from inside the loop).
pub fn start(
    roots: Roots,
    sizes: Arc<SizeCache>,
    index: Arc<IndexCache>,
) -> notify::Result<WatcherHandle> {
    let (tx, rx) = mpsc::channel();

    let event_tx = tx.clone();
    let watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            let _ = event_tx.send(Msg::Fs(res));
        },
        notify::Config::default(),
    )?;

    let mut state = WatcherState {
        watcher,
        roots,
        sizes,
        index,
        limit_reached: false,
    };

    let root_paths: Vec<PathBuf> = state.roots.iter().map(|(_, p)| p.to_path_buf()).collect();
    for fs_root in &root_paths {
        state.watch_tree(fs_root);
    }

    std::thread::Builder::new()
        .name("fs-watcher".into())
        .spawn(move || {
            for msg in rx {
                match msg {
                    Msg::Fs(Ok(event)) => state.handle_event(event),
                    Msg::Fs(Err(e)) => tracing::warn!("watcher: {e}"),
                    Msg::Shutdown => break,
                }
            }
        })
        .expect("spawning watcher thread");

    Ok(WatcherHandle { tx })
}

struct WatcherState {
    watcher: RecommendedWatcher,
    roots: Roots,
    sizes: Arc<SizeCache>,
    index: Arc<IndexCache>,
    /// The kernel watch limit was hit; logged once, after which unwatched
    /// subtrees fall back to the cache safety TTL.
    limit_reached: bool,
}

impl WatcherState {
    /// Adds a watch for `dir` and every directory beneath it. Symlinked
    /// directories are not descended - their targets may be outside every
    /// root, and the safety TTL covers them.
    fn watch_tree(&mut self, dir: &Path) {
        if self.limit_reached {
            return;
        }
        if !self.watch_one(dir) {
            return;
        }

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("watcher: skipping {}: {e}", dir.display());
                return;
            }
        };
        for entry in entries.flatten() {
            if self.limit_reached {
                return;
            }
            let is_real_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_real_dir {
                self.watch_tree(&entry.path());
            }
        }
    }

    /// Adds a single non-recursive watch. Returns false when the directory
    /// should not be descended (failed add or watch limit).
    fn watch_one(&mut self, dir: &Path) -> bool {
        match self.watcher.watch(dir, RecursiveMode::NonRecursive) {
            Ok(()) => true,
            Err(e) if is_watch_limit(&e) => {
                self.limit_reached = true;
                tracing::warn!(
                    "watcher: inotify watch limit reached (stopped at {}).\n  \
                     Directories beyond this point will not receive instant cache invalidation;\n  \
                     the cache safety TTL will still correct any stale entries.\n  \
                     To enable full coverage, raise the kernel limit:\n    \
                     echo fs.inotify.max_user_watches=524288 | sudo tee -a /etc/sysctl.conf\n    \
                     sudo sysctl -p",
                    dir.display()
                );
                false
            }
            Err(e) => {
                tracing::warn!("watcher: could not add watch for {}: {e}", dir.display());
                false
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        // Reads and metadata-only accesses never change sizes or the index.
        if matches!(event.kind, EventKind::Access(_)) {
            return;
        }

        let created = matches!(event.kind, EventKind::Create(_));
        let removed = matches!(event.kind, EventKind::Remove(_))
            || matches!(event.kind, EventKind::Modify(ModifyKind::Name(_)));

        for path in &event.paths {
            // A new directory needs watches before changes inside it go
            // unseen.
            if created {
                if let Ok(meta) = std::fs::metadata(path) {
                    if meta.is_dir() {
                        self.watch_tree(path);
                    }
                }
            }

            // A removed or renamed path has nothing left to recompute; drop
            // the entry rather than leaving it to rot.
            if removed {
                self.sizes.evict(path);
            }

            // Directory totals are cumulative: a change at any depth alters
            // every ancestor up to the managed root.
            if let Some(parent) = path.parent() {
                invalidate_chain(&self.roots, &self.sizes, parent);
            }
        }

        // Structural changes alter the set of files; plain writes to an
        // existing file do not.
        if created || removed {
            self.index.invalidate();
        }
    }
}

/// Marks `start` and every ancestor up to (and including) its managed root
/// stale in the size cache.
fn invalidate_chain(roots: &Roots, sizes: &SizeCache, start: &Path) {
    let mut current: PathBuf = start.to_path_buf();
    loop {
        sizes.invalidate(&current);

        if roots.is_root_path(&current) {
            break;
        }
        match current.parent() {
            // Reached the filesystem root without hitting a managed root;
            // guard against looping forever on an escaped path.
            None => break,
            Some(parent) if parent == current => break,
            Some(parent) => current = parent.to_path_buf(),
        }
    }
}

fn is_watch_limit(err: &notify::Error) -> bool {
    match &err.kind {
        notify::ErrorKind::MaxFilesWatch => true,
        notify::ErrorKind::Io(io) => io.raw_os_error() == Some(28), // ENOSPC
        _ => false,
    }
}

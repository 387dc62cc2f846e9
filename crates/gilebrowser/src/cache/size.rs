//! The directory-size cache: recursive byte totals with
//! stale-while-revalidate semantics.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::cache::walk::dir_size;

/// Backstop expiry applied to every entry. The watcher invalidates entries
/// long before this fires; it exists only for the case where a kernel watch
/// event is missed (watch-limit exhaustion, network filesystem edge cases).
pub const SAFETY_TTL: Duration = Duration::from_secs(20 * 60);

/// How often the GC pass removes entries for paths that no longer exist.
const GC_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug)]
struct SizeEntry {
    size: i64,
    /// Safety-net deadline; reset whenever a fresh value lands.
    expires: Instant,
    /// A walk for this path is in flight.
    computing: bool,
    /// Invalidated; `size` still holds the last known value.
    stale: bool,
    /// False only between first-miss registration and the first result, the
    /// one window in which a reader has nothing to show and must wait.
    has_value: bool,
}

/// Cache of recursive directory sizes keyed by absolute filesystem path.
///
/// Readers never block once a path has a value: a stale hit returns the last
/// known size immediately while one background thread recomputes. Only the
/// very first request for an unknown path walks synchronously, and concurrent
/// first requests collapse onto a single walk via the condvar.
#[derive(Debug, Default)]
pub struct SizeCache {
    entries: Mutex<HashMap<PathBuf, SizeEntry>>,
    cond: Condvar,
}

impl SizeCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the cached recursive byte count for `path`, per the policy
    /// above. Blocking; callers on the async runtime go through
    /// `spawn_blocking`.
    pub fn size_of(self: &Arc<Self>, path: &Path) -> i64 {
        enum Plan {
            /// Serve this value as-is.
            Hit(i64),
            /// Serve this value and recompute in the background.
            StaleKick(i64),
            /// Someone else's first-miss walk is running; park on the condvar.
            Wait,
            /// Nobody has ever asked: walk synchronously.
            MissWalk,
        }

        let mut entries = self.entries.lock().expect("size cache poisoned");
        loop {
            let plan = match entries.get_mut(path) {
                Some(e) if e.has_value && !e.computing && !e.stale && Instant::now() < e.expires => {
                    Plan::Hit(e.size)
                }
                // Stale or TTL-expired with no walk in flight: claim the
                // recompute slot before releasing the lock.
                Some(e) if e.has_value && !e.computing => {
                    e.computing = true;
                    e.stale = false;
                    Plan::StaleKick(e.size)
                }
                // A recompute is in flight; the previous value is fine.
                Some(e) if e.has_value => Plan::Hit(e.size),
                Some(_) => Plan::Wait,
                None => {
                    entries.insert(
                        path.to_path_buf(),
                        SizeEntry {
                            size: 0,
                            expires: Instant::now(),
                            computing: true,
                            stale: false,
                            has_value: false,
                        },
                    );
                    Plan::MissWalk
                }
            };

            match plan {
                Plan::Hit(size) => return size,
                Plan::StaleKick(size) => {
                    drop(entries);
                    let cache = Arc::clone(self);
                    let path = path.to_path_buf();
                    std::thread::spawn(move || {
                        let fresh = dir_size(&path);
                        cache.install(&path, fresh);
                    });
                    return size;
                }
                Plan::Wait => {
                    // Re-examine afterwards: the walker may have finished, or
                    // the entry may have been evicted underneath us.
                    entries = self.cond.wait(entries).expect("size cache poisoned");
                }
                Plan::MissWalk => {
                    drop(entries);
                    let size = dir_size(path);
                    self.install(path, size);
                    return size;
                }
            }
        }
    }

    /// Stores a freshly computed value and wakes first-miss waiters.
    fn install(&self, path: &Path, size: i64) {
        let mut entries = self.entries.lock().expect("size cache poisoned");
        if let Some(e) = entries.get_mut(path) {
            e.size = size;
            e.expires = Instant::now() + SAFETY_TTL;
            e.computing = false;
            e.has_value = true;
        }
        self.cond.notify_all();
    }

    /// Marks `path` stale. The last known size stays readable; the next read
    /// schedules a background recompute. No-op for unknown paths.
    pub fn invalidate(&self, path: &Path) {
        let mut entries = self.entries.lock().expect("size cache poisoned");
        if let Some(e) = entries.get_mut(path) {
            e.stale = true;
        }
    }

    /// Removes `path` entirely. Used when the path is known deleted so the
    /// entry does not linger.
    pub fn evict(&self, path: &Path) {
        let mut entries = self.entries.lock().expect("size cache poisoned");
        entries.remove(path);
        // A waiter parked on a first-miss walk for this path must re-check
        // rather than sleep forever on a vanished entry.
        self.cond.notify_all();
    }

    /// Installs a precomputed map of sizes under a single lock acquisition.
    /// Used by the warmer, which bypasses the per-path read path entirely.
    pub fn bulk_insert(&self, sizes: HashMap<PathBuf, i64>) {
        let expires = Instant::now() + SAFETY_TTL;
        let mut entries = self.entries.lock().expect("size cache poisoned");
        for (path, size) in sizes {
            entries.insert(
                path,
                SizeEntry {
                    size,
                    expires,
                    computing: false,
                    stale: false,
                    has_value: true,
                },
            );
        }
    }

    /// Number of live entries, for logs and tests.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("size cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawns the periodic GC thread. The thread holds only a weak reference
    /// and exits once the cache is dropped.
    pub fn spawn_gc(self: &Arc<Self>) {
        let weak: Weak<SizeCache> = Arc::downgrade(self);
        std::thread::Builder::new()
            .name("size-cache-gc".into())
            .spawn(move || loop {
                std::thread::sleep(GC_INTERVAL);
                let Some(cache) = weak.upgrade() else { return };
                cache.gc_pass();
            })
            .expect("spawning size-cache GC thread");
    }

    /// Removes entries whose path no longer exists on disk. Keys are
    /// snapshotted under the lock, stat'ed without it, then the dead ones
    /// are dropped in one batch.
    pub fn gc_pass(&self) {
        let keys: Vec<PathBuf> = {
            let entries = self.entries.lock().expect("size cache poisoned");
            entries.keys().cloned().collect()
        };

        let dead: Vec<PathBuf> = keys
            .into_iter()
            .filter(|k| {
                matches!(
                    std::fs::symlink_metadata(k),
                    Err(ref e) if e.kind() == std::io::ErrorKind::NotFound
                )
            })
            .collect();

        if !dead.is_empty() {
            let mut entries = self.entries.lock().expect("size cache poisoned");
            for k in &dead {
                entries.remove(k);
            }
            drop(entries);
            self.cond.notify_all();
            tracing::info!("cache: size GC removed {} stale entries", dead.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn dir_with_file(len: usize) -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("f.bin"), vec![0u8; len]).unwrap();
        tmp
    }

    #[test]
    fn first_miss_walks_synchronously() {
        let tmp = dir_with_file(42);
        let cache = SizeCache::new();
        assert_eq!(cache.size_of(tmp.path()), 42);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn empty_directory_caches_zero() {
        let tmp = TempDir::new().unwrap();
        let cache = SizeCache::new();
        assert_eq!(cache.size_of(tmp.path()), 0);
        // Cached: still zero, still present.
        assert_eq!(cache.size_of(tmp.path()), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn stale_read_returns_last_value_then_converges() {
        let tmp = dir_with_file(1000);
        let cache = SizeCache::new();
        assert_eq!(cache.size_of(tmp.path()), 1000);

        fs::write(tmp.path().join("f.bin"), vec![0u8; 5]).unwrap();
        cache.invalidate(tmp.path());

        // The stale read serves the old value without blocking.
        let first = cache.size_of(tmp.path());
        assert_eq!(first, 1000);

        // The background recompute lands shortly after.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if cache.size_of(tmp.path()) == 5 {
                break;
            }
            assert!(Instant::now() < deadline, "recompute never converged");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn invalidate_unknown_path_is_a_noop() {
        let cache = SizeCache::new();
        cache.invalidate(Path::new("/nowhere"));
        assert!(cache.is_empty());
    }

    #[test]
    fn evict_removes_the_entry() {
        let tmp = dir_with_file(10);
        let cache = SizeCache::new();
        cache.size_of(tmp.path());
        cache.evict(tmp.path());
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_misses_collapse_onto_one_entry() {
        let tmp = dir_with_file(321);
        let cache = SizeCache::new();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let path = tmp.path().to_path_buf();
            handles.push(std::thread::spawn(move || cache.size_of(&path)));
        }

        // Whichever thread registered the entry walked; the rest either
        // waited on the condvar or read the finished value. All agree.
        for h in handles {
            assert_eq!(h.join().unwrap(), 321);
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn waiter_survives_eviction_during_first_miss() {
        // A reader parked on someone else's first-miss walk must wake and
        // retry when the entry is evicted out from under it instead of
        // sleeping forever.
        let tmp = dir_with_file(64);
        let cache = SizeCache::new();

        let waiter = {
            let cache = Arc::clone(&cache);
            let path = tmp.path().to_path_buf();
            std::thread::spawn(move || cache.size_of(&path))
        };
        let racer = {
            let cache = Arc::clone(&cache);
            let path = tmp.path().to_path_buf();
            std::thread::spawn(move || {
                cache.evict(&path);
                cache.size_of(&path)
            })
        };

        assert_eq!(waiter.join().unwrap(), 64);
        assert_eq!(racer.join().unwrap(), 64);
    }

    #[test]
    fn bulk_insert_primes_fresh_entries() {
        let cache = SizeCache::new();
        let mut sizes = HashMap::new();
        sizes.insert(PathBuf::from("/warm/a"), 10);
        sizes.insert(PathBuf::from("/warm/b"), 20);
        cache.bulk_insert(sizes);

        // Reads hit without touching the filesystem (the paths don't exist).
        assert_eq!(cache.size_of(Path::new("/warm/a")), 10);
        assert_eq!(cache.size_of(Path::new("/warm/b")), 20);
    }

    #[test]
    fn gc_removes_entries_for_deleted_paths() {
        let cache = SizeCache::new();
        let tmp = dir_with_file(1);
        cache.size_of(tmp.path());

        let mut sizes = HashMap::new();
        sizes.insert(PathBuf::from("/gone/forever"), 99);
        cache.bulk_insert(sizes);
        assert_eq!(cache.len(), 2);

        cache.gc_pass();
        assert_eq!(cache.len(), 1);
    }
}

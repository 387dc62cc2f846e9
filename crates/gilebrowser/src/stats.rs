//! Download statistics, persisted as a small JSON file.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

const STATS_FILE: &str = "gile.json";

/// On-disk counter shape.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct PersistedStats {
    total_downloads: i64,
    total_bytes: i64,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_downloads: i64,
    pub total_bytes: i64,
}

/// Download counters with write-behind persistence.
///
/// Every recorded download bumps both counters and schedules an atomic
/// rewrite of the stats file; responses are never delayed by disk I/O.
#[derive(Debug)]
pub struct DownloadStats {
    inner: Mutex<PersistedStats>,
    path: PathBuf,
}

impl DownloadStats {
    /// Loads existing counters from `<stats_dir>/gile.json`, creating the
    /// file with zeros when absent so that permission problems surface at
    /// startup rather than on the first download.
    pub fn load(stats_dir: &Path) -> Self {
        let path = stats_dir.join(STATS_FILE);
        let data = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!("stats: could not parse {}: {e} - starting from zero", path.display());
                    PersistedStats::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let zero = PersistedStats::default();
                if let Err(e) = persist(&path, zero) {
                    tracing::warn!("stats: could not create {}: {e}", path.display());
                }
                zero
            }
            Err(e) => {
                tracing::warn!("stats: could not open {}: {e}", path.display());
                PersistedStats::default()
            }
        };

        Self {
            inner: Mutex::new(data),
            path,
        }
    }

    /// Records one download of `bytes` bytes and persists asynchronously.
    pub fn record(&self, bytes: i64) {
        let snapshot = {
            let mut data = self.inner.lock().expect("stats mutex poisoned");
            data.total_downloads += 1;
            data.total_bytes += bytes;
            *data
        };

        let path = self.path.clone();
        std::thread::spawn(move || {
            if let Err(e) = persist(&path, snapshot) {
                tracing::warn!("stats: {e}");
            }
        });
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let data = self.inner.lock().expect("stats mutex poisoned");
        StatsSnapshot {
            total_downloads: data.total_downloads,
            total_bytes: data.total_bytes,
        }
    }
}

/// Atomic write: temp file in the same directory, then rename over the target.
fn persist(path: &Path, data: PersistedStats) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".gilebrowser-stats-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    serde_json::to_writer(&mut tmp, &data)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn creates_file_with_zeros_on_first_load() {
        let dir = TempDir::new().unwrap();
        let stats = DownloadStats::load(dir.path());
        assert_eq!(stats.snapshot().total_downloads, 0);
        let raw = std::fs::read_to_string(dir.path().join(STATS_FILE)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["total_downloads"], 0);
        assert_eq!(parsed["total_bytes"], 0);
    }

    #[test]
    fn counters_accumulate() {
        let dir = TempDir::new().unwrap();
        let stats = DownloadStats::load(dir.path());
        stats.record(1000);
        stats.record(24);
        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                total_downloads: 2,
                total_bytes: 1024
            }
        );
    }

    #[test]
    fn a_recorded_download_reaches_disk_and_reloads() {
        let dir = TempDir::new().unwrap();
        let stats = DownloadStats::load(dir.path());
        stats.record(1000);

        // Persistence is write-behind; wait for the single writer to land.
        let path = dir.path().join(STATS_FILE);
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            let reloaded = DownloadStats::load(dir.path());
            if reloaded.snapshot().total_bytes == 1000 {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "stats never persisted to {}",
                path.display()
            );
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
    }

    #[test]
    fn corrupt_file_starts_from_zero() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(STATS_FILE), b"{not json").unwrap();
        let stats = DownloadStats::load(dir.path());
        assert_eq!(stats.snapshot().total_downloads, 0);
    }
}

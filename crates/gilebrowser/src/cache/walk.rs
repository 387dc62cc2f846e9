//! Filesystem walkers shared by the size cache and the cache warmer.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Hard stop for pathological nesting; combined with the visited set this
/// bounds the walk even on filesystems where canonicalization misbehaves.
const MAX_WALK_DEPTH: usize = 256;

/// Returns the total size in bytes of all files under `root`.
///
/// Symlinks are followed wherever they point, including outside the root;
/// the visited set of canonical directory paths keeps link cycles finite.
/// Unreadable entries are silently skipped.
pub fn dir_size(root: &Path) -> i64 {
    // Resolve the root through its own symlink chain before walking.
    let resolved = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let mut visited = HashSet::new();
    visited.insert(resolved.clone());
    let mut total = 0i64;
    walk_size(&resolved, &mut visited, &mut total, 0);
    total
}

fn walk_size(dir: &Path, visited: &mut HashSet<PathBuf>, total: &mut i64, depth: usize) {
    if depth > MAX_WALK_DEPTH {
        return;
    }
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(_) => continue,
        };
        let path = entry.path();

        if file_type.is_dir() {
            // `dir` is canonical and this entry is not a link, so the child
            // path is canonical too - no extra syscall needed.
            if visited.insert(path.clone()) {
                walk_size(&path, visited, total, depth + 1);
            }
        } else if file_type.is_symlink() {
            let meta = match fs::metadata(&path) {
                Ok(meta) => meta,
                Err(_) => continue, // broken link
            };
            if meta.is_dir() {
                let target = match fs::canonicalize(&path) {
                    Ok(target) => target,
                    Err(_) => continue,
                };
                if visited.insert(target.clone()) {
                    walk_size(&target, visited, total, depth + 1);
                }
            } else {
                *total += meta.len() as i64;
            }
        } else if let Ok(meta) = entry.metadata() {
            *total += meta.len() as i64;
        }
    }
}

/// Computes the recursive byte total of every directory under `root` in one
/// bottom-up sweep.
///
/// Calling [`dir_size`] per directory re-walks each subtree once per
/// ancestor, which is quadratic over deep trees. This walker touches every
/// filesystem entry exactly once:
///
/// 1. Walk pass: each regular file adds its size to its immediate parent's
///    subtotal. A symlink to a directory is priced via `dir_size` on its
///    target, recorded under the symlink's own path (so lookups on that path
///    hit), added to the parent, and marked terminal.
/// 2. Propagation pass: directory paths sorted by descending length put every
///    child before its parent, so a single sweep rolls subtotals upward.
///    Terminal entries are skipped - their contribution already landed in
///    pass 1.
pub fn build_size_index(root: &Path) -> HashMap<PathBuf, i64> {
    let mut sizes: HashMap<PathBuf, i64> = HashMap::new();
    let mut terminal: HashSet<PathBuf> = HashSet::new();

    // Seed the root so it is present even when empty.
    sizes.insert(root.to_path_buf(), 0);
    walk_index(root, &mut sizes, &mut terminal, 0);

    let mut dirs: Vec<PathBuf> = sizes.keys().cloned().collect();
    dirs.sort_by(|a, b| b.as_os_str().len().cmp(&a.as_os_str().len()));

    for dir in dirs {
        if terminal.contains(&dir) || dir == root {
            continue;
        }
        let subtotal = sizes[&dir];
        if let Some(parent) = dir.parent() {
            if let Some(parent_total) = sizes.get_mut(parent) {
                *parent_total += subtotal;
            }
        }
    }

    sizes
}

fn walk_index(
    dir: &Path,
    sizes: &mut HashMap<PathBuf, i64>,
    terminal: &mut HashSet<PathBuf>,
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
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(_) => continue,
        };
        let path = entry.path();

        if file_type.is_dir() {
            sizes.entry(path.clone()).or_insert(0);
            walk_index(&path, sizes, terminal, depth + 1);
        } else if file_type.is_symlink() {
            let meta = match fs::metadata(&path) {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            if meta.is_dir() {
                let size = dir_size(&path);
                sizes.insert(path.clone(), size);
                terminal.insert(path);
                *sizes.get_mut(dir).expect("parent dir seeded before descent") += size;
            } else {
                *sizes.get_mut(dir).expect("parent dir seeded before descent") +=
                    meta.len() as i64;
            }
        } else if let Ok(meta) = entry.metadata() {
            *sizes.get_mut(dir).expect("parent dir seeded before descent") += meta.len() as i64;
        }
    }
}

//! The root set: configured directories addressed by URL-safe labels, and the
//! resolver that maps URL paths back onto the filesystem.

use std::path::{Component, Path, PathBuf};

use crate::error::ServeError;

/// Ordered mapping of URL label to served directory.
///
/// Insertion order is preserved for display; lookups go by label. Labels are
/// unique - a second directory whose basename collides gets a numeric suffix
/// rather than silently shadowing the first.
#[derive(Debug, Clone, Default)]
pub struct Roots {
    entries: Vec<(String, PathBuf)>,
}

impl Roots {
    /// Builds the root set from the configured directory list.
    pub fn from_dirs<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut roots = Roots::default();
        for dir in dirs {
            let dir = dir.into();
            let base = root_label(&dir);
            let mut label = base.clone();
            let mut n = 2;
            while roots.get(&label).is_some() {
                label = format!("{base}-{n}");
                n += 1;
            }
            roots.entries.push((label, dir));
        }
        roots
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Label → filesystem path lookup.
    pub fn get(&self, label: &str) -> Option<&Path> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, p)| p.as_path())
    }

    /// Iterates `(label, path)` pairs in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.entries.iter().map(|(l, p)| (l.as_str(), p.as_path()))
    }

    /// True when `path` is one of the configured root directories.
    pub fn is_root_path(&self, path: &Path) -> bool {
        self.entries.iter().any(|(_, p)| p == path)
    }

    /// Translates a URL path into an absolute filesystem path.
    ///
    /// The leading segment selects a root by label; the remainder is joined
    /// onto that root and lexically normalized. The result must stay at or
    /// under the root, otherwise the request is a traversal attempt. Symlinks
    /// are deliberately not resolved here - following them is the walkers'
    /// business, and resolving here would reject links that point outside the
    /// root, which the product allows.
    pub fn resolve(&self, url_path: &str) -> Result<PathBuf, ServeError> {
        let trimmed = url_path.strip_prefix('/').ok_or(ServeError::NotFound)?;
        let (label, rest) = match trimmed.split_once('/') {
            Some((label, rest)) => (label, rest),
            None => (trimmed, ""),
        };

        let root = self.get(label).ok_or(ServeError::NotFound)?;
        let resolved = normalize_join(root, rest);

        if resolved == root || resolved.starts_with(root) {
            Ok(resolved)
        } else {
            Err(ServeError::Traversal)
        }
    }
}

/// Derives a URL-safe label from a directory path: basename, lowercased,
/// spaces replaced by hyphens.
pub fn root_label(dir: &Path) -> String {
    let base = clean_path(dir);
    let base = base
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("root");
    base.to_lowercase().replace(' ', "-")
}

/// Lexically cleans a path: drops `.` components and applies `..` without
/// touching the filesystem.
fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Joins a slash-separated URL tail onto `root`, normalizing `.` and `..`
/// components as they are applied so the check against the root sees the
/// final shape of the path.
fn normalize_join(root: &Path, rel: &str) -> PathBuf {
    let mut out = root.to_path_buf();
    for comp in rel.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            name => out.push(name),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roots() -> Roots {
        Roots::from_dirs(["/srv/My Files", "/data/pub"])
    }

    #[test]
    fn labels_are_lowercased_and_hyphenated() {
        let r = roots();
        assert_eq!(r.get("my-files"), Some(Path::new("/srv/My Files")));
        assert_eq!(r.get("pub"), Some(Path::new("/data/pub")));
    }

    #[test]
    fn duplicate_basenames_get_suffixes() {
        let r = Roots::from_dirs(["/a/share", "/b/share", "/c/share"]);
        assert_eq!(r.get("share"), Some(Path::new("/a/share")));
        assert_eq!(r.get("share-2"), Some(Path::new("/b/share")));
        assert_eq!(r.get("share-3"), Some(Path::new("/c/share")));
    }

    #[test]
    fn resolves_paths_under_a_root() {
        let r = roots();
        assert_eq!(
            r.resolve("/pub/sub/file.txt").unwrap(),
            PathBuf::from("/data/pub/sub/file.txt")
        );
        assert_eq!(r.resolve("/pub").unwrap(), PathBuf::from("/data/pub"));
        assert_eq!(r.resolve("/pub/").unwrap(), PathBuf::from("/data/pub"));
    }

    #[test]
    fn unknown_root_is_not_found() {
        assert!(matches!(
            roots().resolve("/nope/file"),
            Err(ServeError::NotFound)
        ));
    }

    #[test]
    fn traversal_is_rejected() {
        let r = roots();
        assert!(matches!(
            r.resolve("/pub/../../etc/passwd"),
            Err(ServeError::Traversal)
        ));
        assert!(matches!(
            r.resolve("/pub/a/../../../etc/passwd"),
            Err(ServeError::Traversal)
        ));
        // `..` that stays inside the root is fine.
        assert_eq!(
            r.resolve("/pub/a/../b").unwrap(),
            PathBuf::from("/data/pub/b")
        );
    }

    #[test]
    fn dot_segments_are_dropped() {
        let r = roots();
        assert_eq!(
            r.resolve("/pub/./a//b").unwrap(),
            PathBuf::from("/data/pub/a/b")
        );
    }

    #[test]
    fn sneaking_back_under_the_root_by_name_is_still_traversal() {
        let r = Roots::from_dirs(["/data/pub"]);
        // /data/public is a sibling that shares the /data/pub prefix bytes but
        // not the path component.
        assert!(matches!(
            r.resolve("/pub/../public/x"),
            Err(ServeError::Traversal)
        ));
    }

    #[test]
    fn insertion_order_is_preserved() {
        let r = Roots::from_dirs(["/z/zeta", "/a/alpha"]);
        let labels: Vec<_> = r.iter().map(|(l, _)| l.to_string()).collect();
        assert_eq!(labels, vec!["zeta", "alpha"]);
    }
}

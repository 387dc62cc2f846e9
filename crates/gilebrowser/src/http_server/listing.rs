//! Root and directory listing pages.

use std::fs;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use askama::Template;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::future::join_all;

use crate::cache::SizeCache;
use crate::error::ServeError;
use crate::http_server::{format_size, url_path_from_capture};
use crate::mime::{is_image, is_text, mime_for_path};
use crate::state::AppState;

/// One segment of the navigation bar.
#[derive(Debug, Clone)]
pub struct Breadcrumb {
    pub name: String,
    pub path: String,
}

/// One row of a listing page.
#[derive(Debug, Clone)]
pub struct EntryView {
    pub name: String,
    pub url_path: String,
    pub is_dir: bool,
    pub size: i64,
    pub size_display: String,
    pub modified: String,
    pub is_preview: bool,
}

#[derive(Template)]
#[template(path = "listing.html")]
struct ListingTemplate {
    site_name: String,
    theme: String,
    title: String,
    current_path: String,
    breadcrumbs: Vec<Breadcrumb>,
    entries: Vec<EntryView>,
    download_url: String,
    total_size_display: String,
    is_root: bool,
}

/// GET `/` - lists every configured root with its cached total size.
pub async fn root_listing(State(state): State<AppState>) -> Result<Response, ServeError> {
    let roots: Vec<(String, PathBuf)> = state
        .roots
        .iter()
        .map(|(label, path)| (label.to_string(), path.to_path_buf()))
        .collect();

    let sizes = join_all(
        roots
            .iter()
            .map(|(_, path)| cached_size(Arc::clone(&state.sizes), path.clone())),
    )
    .await;

    let mut total = 0i64;
    let mut entries = Vec::with_capacity(roots.len());
    for ((label, path), size) in roots.into_iter().zip(sizes) {
        total += size;
        entries.push(EntryView {
            url_path: format!("/{label}"),
            name: label,
            is_dir: true,
            size,
            size_display: format_size(size),
            modified: fs::metadata(&path).map(|m| format_mtime(&m)).unwrap_or_default(),
            is_preview: false,
        });
    }

    render_listing(ListingTemplate {
        site_name: state.ui.title.clone(),
        theme: state.ui.default_theme.to_string(),
        title: state.ui.title.clone(),
        current_path: "/".into(),
        breadcrumbs: build_breadcrumbs("/"),
        entries,
        download_url: "/zip/".into(),
        total_size_display: format_size(total),
        is_root: true,
    })
}

/// GET `/<root>/...` - lists one directory.
pub async fn directory_listing(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, ServeError> {
    let url_path = url_path_from_capture(&path);
    let fs_path = state.roots.resolve(&url_path)?;

    let meta = fs::metadata(&fs_path).map_err(|_| ServeError::NotFound)?;
    if !meta.is_dir() {
        return Err(ServeError::NotFound);
    }

    let entries = build_entries(&state, &url_path, &fs_path).await?;
    let total = cached_size(Arc::clone(&state.sizes), fs_path.clone()).await;

    let title = url_path.rsplit('/').next().unwrap_or("").to_string();
    render_listing(ListingTemplate {
        site_name: state.ui.title.clone(),
        theme: state.ui.default_theme.to_string(),
        title,
        current_path: url_path.clone(),
        breadcrumbs: build_breadcrumbs(&url_path),
        entries,
        download_url: format!("/zip{url_path}"),
        total_size_display: format_size(total),
        is_root: false,
    })
}

/// Reads a directory into sorted rows. Child directory sizes are filled
/// concurrently - one blocking task per child, each writing its own slot -
/// so a listing with many subdirectories never serializes tree walks.
async fn build_entries(
    state: &AppState,
    url_path: &str,
    fs_path: &FsPath,
) -> Result<Vec<EntryView>, ServeError> {
    let read = fs::read_dir(fs_path)
        .map_err(|e| ServeError::Internal(format!("reading {}: {e}", fs_path.display())))?;

    let mut entries = Vec::new();
    for dirent in read.flatten() {
        let Ok(name) = dirent.file_name().into_string() else {
            continue;
        };
        // Resolve through symlinks so a link to a directory lists as one;
        // broken links fall back to the link itself.
        let meta = match fs::metadata(dirent.path()) {
            Ok(meta) => meta,
            Err(_) => match fs::symlink_metadata(dirent.path()) {
                Ok(meta) => meta,
                Err(_) => continue,
            },
        };

        let is_dir = meta.is_dir();
        let size = if is_dir { 0 } else { meta.len() as i64 };
        let mime = if is_dir {
            ""
        } else {
            mime_for_path(&dirent.path())
        };

        entries.push(EntryView {
            url_path: join_url(url_path, &name),
            name,
            is_dir,
            size,
            size_display: String::new(),
            modified: format_mtime(&meta),
            is_preview: !is_dir && (is_image(mime) || is_text(mime)),
        });
    }

    let size_futures: Vec<_> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_dir)
        .map(|(i, e)| {
            let sizes = Arc::clone(&state.sizes);
            let path = fs_path.join(&e.name);
            async move { (i, cached_size(sizes, path).await) }
        })
        .collect();
    for (i, size) in join_all(size_futures).await {
        entries[i].size = size;
    }
    for entry in &mut entries {
        entry.size_display = format_size(entry.size);
    }

    // Directories first, then files; both groups case-insensitively sorted.
    entries.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });

    Ok(entries)
}

async fn cached_size(sizes: Arc<SizeCache>, path: PathBuf) -> i64 {
    tokio::task::spawn_blocking(move || sizes.size_of(&path))
        .await
        .unwrap_or(0)
}

pub(crate) fn build_breadcrumbs(url_path: &str) -> Vec<Breadcrumb> {
    let mut crumbs = vec![Breadcrumb {
        name: "root".into(),
        path: "/".into(),
    }];
    if url_path == "/" {
        return crumbs;
    }

    let mut current = String::new();
    for part in url_path.trim_matches('/').split('/') {
        if part.is_empty() {
            continue;
        }
        current.push('/');
        current.push_str(part);
        crumbs.push(Breadcrumb {
            name: part.to_string(),
            path: current.clone(),
        });
    }
    crumbs
}

fn join_url(base: &str, name: &str) -> String {
    if base == "/" {
        format!("/{name}")
    } else {
        format!("{base}/{name}")
    }
}

pub(crate) fn format_mtime(meta: &fs::Metadata) -> String {
    let Ok(modified) = meta.modified() else {
        return String::new();
    };
    let odt = time::OffsetDateTime::from(modified);
    odt.format(&time::macros::format_description!(
        "[year]-[month]-[day] [hour]:[minute]"
    ))
    .unwrap_or_default()
}

fn render_listing(template: ListingTemplate) -> Result<Response, ServeError> {
    match template.render() {
        Ok(html) => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            html,
        )
            .into_response()),
        Err(e) => Err(ServeError::Internal(format!("rendering listing: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breadcrumbs_accumulate_paths() {
        let crumbs = build_breadcrumbs("/pub/sub/deep");
        let pairs: Vec<_> = crumbs
            .iter()
            .map(|c| (c.name.as_str(), c.path.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("root", "/"),
                ("pub", "/pub"),
                ("sub", "/pub/sub"),
                ("deep", "/pub/sub/deep"),
            ]
        );
    }

    #[test]
    fn root_breadcrumb_is_alone_at_the_top() {
        let crumbs = build_breadcrumbs("/");
        assert_eq!(crumbs.len(), 1);
    }

    #[test]
    fn url_joining_handles_the_root() {
        assert_eq!(join_url("/", "a"), "/a");
        assert_eq!(join_url("/pub", "a"), "/pub/a");
    }
}

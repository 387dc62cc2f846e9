//! Preview pages: directories, images, text, rendered documents, and the
//! info card for everything else.

use std::fs;
use std::io::Read;

use askama::Template;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::error::ServeError;
use crate::http_server::listing::{build_breadcrumbs, format_mtime, Breadcrumb};
use crate::http_server::{format_size, url_path_from_capture};
use crate::mime::{is_image, is_renderable, is_text, mime_for_path};
use crate::state::AppState;

/// Text previews stop reading here so a stray multi-gigabyte log cannot pin
/// the server's memory.
const MAX_PREVIEW_BYTES: u64 = 2 * 1024 * 1024;

#[derive(Template)]
#[template(path = "preview.html")]
struct PreviewTemplate {
    site_name: String,
    theme: String,
    title: String,
    file_name: String,
    url_path: String,
    breadcrumbs: Vec<Breadcrumb>,

    is_dir: bool,
    is_image: bool,
    is_text: bool,
    is_binary: bool,
    is_rendered: bool,

    download_url: String,
    view_url: String,
    size_display: String,
    mime: String,
    modified: String,
    entry_count: usize,

    text_content: String,
    rendered_content: String,
}

/// GET `/preview/*` - an inline preview for any path. Every case renders a
/// page; nothing here redirects to a download.
pub async fn preview(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, ServeError> {
    let url_path = url_path_from_capture(&path);
    let fs_path = state.roots.resolve(&url_path)?;
    let meta = fs::metadata(&fs_path).map_err(|_| ServeError::NotFound)?;

    let file_name = fs_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file")
        .to_string();
    let parent = match url_path.rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
    };

    let mut page = PreviewTemplate {
        site_name: state.ui.title.clone(),
        theme: state.ui.default_theme.to_string(),
        title: file_name.clone(),
        file_name,
        url_path: url_path.clone(),
        breadcrumbs: build_breadcrumbs(&parent),
        is_dir: false,
        is_image: false,
        is_text: false,
        is_binary: false,
        is_rendered: false,
        download_url: String::new(),
        view_url: String::new(),
        size_display: format_size(meta.len() as i64),
        mime: String::new(),
        modified: format_mtime(&meta),
        entry_count: 0,
        text_content: String::new(),
        rendered_content: String::new(),
    };

    if meta.is_dir() {
        page.is_dir = true;
        page.download_url = format!("/zip{url_path}");
        page.entry_count = fs::read_dir(&fs_path).map(|rd| rd.count()).unwrap_or(0);

        let sizes = std::sync::Arc::clone(&state.sizes);
        let dir = fs_path.clone();
        let total = tokio::task::spawn_blocking(move || sizes.size_of(&dir))
            .await
            .unwrap_or(0);
        page.size_display = format_size(total);

        return render_preview(page);
    }

    let mime = mime_for_path(&fs_path);
    page.mime = mime.to_string();
    page.download_url = format!("/download{url_path}");
    page.view_url = format!("/view{url_path}");

    let previews = state.ui.preview;
    if is_image(mime) && previews.images {
        page.is_image = true;
    } else if is_text(mime) && previews.text {
        page.is_text = true;
        let content = read_text_file(&fs_path)
            .map_err(|e| ServeError::Internal(format!("reading {}: {e}", fs_path.display())))?;

        if is_renderable(mime) && previews.docs {
            page.rendered_content = if mime == "text/markdown" {
                markdown_to_html(&content)
            } else {
                // HTML documents render as themselves.
                content.clone()
            };
            page.is_rendered = true;
        }
        page.text_content = content;
    } else {
        page.is_binary = true;
    }

    render_preview(page)
}

/// Reads a file as text, capped at [`MAX_PREVIEW_BYTES`]. Invalid UTF-8 is
/// replaced rather than refused - half-binary logs still preview usefully.
fn read_text_file(path: &std::path::Path) -> std::io::Result<String> {
    let file = fs::File::open(path)?;
    let mut buf = Vec::new();
    file.take(MAX_PREVIEW_BYTES).read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Converts Markdown to an HTML fragment.
fn markdown_to_html(markdown: &str) -> String {
    use pulldown_cmark::{html, Options, Parser};

    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(markdown, options);
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

fn render_preview(template: PreviewTemplate) -> Result<Response, ServeError> {
    match template.render() {
        Ok(html) => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            html,
        )
            .into_response()),
        Err(e) => Err(ServeError::Internal(format!("rendering preview: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_renders_tables_and_emphasis() {
        let html = markdown_to_html("# Title\n\n| a | b |\n|---|---|\n| 1 | 2 |\n\n*em*");
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<table>"));
        assert!(html.contains("<em>em</em>"));
    }

    #[test]
    fn text_reads_are_capped() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("big.log");
        fs::write(&path, vec![b'a'; (MAX_PREVIEW_BYTES + 1000) as usize]).unwrap();
        let content = read_text_file(&path).unwrap();
        assert_eq!(content.len() as u64, MAX_PREVIEW_BYTES);
    }
}

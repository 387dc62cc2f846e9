//! Raw file serving: explicit downloads and inline views.

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderValue};
use axum::response::Response;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::error::ServeError;
use crate::http_server::{format_size, url_path_from_capture};
use crate::mime::mime_for_path;
use crate::net::client_ip;
use crate::state::AppState;

/// GET `/download/*` - serves the file as an attachment and records the
/// download in the statistics. Range requests are honored so download
/// managers can resume; the stats still count the full file size, as a
/// resumed download is one download, not several.
pub async fn download(
    State(state): State<AppState>,
    Path(path): Path<String>,
    req: Request,
) -> Result<Response, ServeError> {
    let url_path = url_path_from_capture(&path);
    let fs_path = state.roots.resolve(&url_path)?;

    let meta = std::fs::metadata(&fs_path).map_err(|_| ServeError::NotFound)?;
    if meta.is_dir() {
        return Err(ServeError::NotFound);
    }

    let ip = client_ip(&req, &state.trusted_proxy);
    tracing::info!(
        "file download   ip={ip:<15}  size={:<10}  file={url_path}",
        format_size(meta.len() as i64)
    );

    let mut response = serve_file(&fs_path, req).await?;
    let disposition = attachment_disposition(&fs_path);
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, disposition);

    state.stats.record(meta.len() as i64);
    Ok(response)
}

/// GET `/view/*` - serves the file inline: no attachment disposition and no
/// stats entry. Image previews embed these URLs, and a page render is not a
/// user-initiated download.
pub async fn view(
    State(state): State<AppState>,
    Path(path): Path<String>,
    req: Request,
) -> Result<Response, ServeError> {
    let url_path = url_path_from_capture(&path);
    let fs_path = state.roots.resolve(&url_path)?;

    let meta = std::fs::metadata(&fs_path).map_err(|_| ServeError::NotFound)?;
    if meta.is_dir() {
        return Err(ServeError::NotFound);
    }

    serve_file(&fs_path, req).await
}

/// Hands the request to the static-file service (which supplies
/// Content-Length, conditional requests, and byte ranges) and then pins the
/// Content-Type to our own table.
async fn serve_file(fs_path: &std::path::Path, req: Request) -> Result<Response, ServeError> {
    let response = ServeFile::new(fs_path)
        .oneshot(req)
        .await
        .map_err(|e| ServeError::Internal(format!("serving {}: {e}", fs_path.display())))?;

    let mut response = response.map(Body::new);
    if let Ok(value) = HeaderValue::from_str(mime_for_path(fs_path)) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}

/// Builds `attachment; filename="..."`, squashing characters that cannot
/// appear in a quoted header value.
fn attachment_disposition(fs_path: &std::path::Path) -> HeaderValue {
    let name = fs_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() || c == ' ' {
                if c == '"' || c == '\\' {
                    '_'
                } else {
                    c
                }
            } else {
                '_'
            }
        })
        .collect();

    HeaderValue::from_str(&format!("attachment; filename=\"{safe}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

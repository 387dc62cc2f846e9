//! ZIP download handlers.

use std::io::{self, Write};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::header;
use axum::response::Response;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::archive::{collect_entries, dry_run_size, write_archive, ZipEntry};
use crate::error::ServeError;
use crate::http_server::url_path_from_capture;
use crate::net::client_ip;
use crate::state::AppState;
use crate::stats::DownloadStats;

/// GET `/zip/<dir>` - streams one directory as a store-mode ZIP archive with
/// an exact Content-Length.
pub async fn zip_dir(
    State(state): State<AppState>,
    Path(path): Path<String>,
    req: Request,
) -> Result<Response, ServeError> {
    let url_path = url_path_from_capture(&path);
    let fs_path = state.roots.resolve(&url_path)?;

    let meta = std::fs::metadata(&fs_path).map_err(|_| ServeError::NotFound)?;
    if !meta.is_dir() {
        return Err(ServeError::BadRequest("Not a directory".into()));
    }

    let ip = client_ip(&req, &state.trusted_proxy);
    tracing::info!("zip  download   ip={ip:<15}  dir={url_path}");

    let dir_name = fs_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("archive")
        .to_string();

    let (entries, expected) = {
        let fs_path = fs_path.clone();
        let prefix = dir_name.clone();
        collect_and_measure(move || collect_entries(&fs_path, &prefix)).await?
    };

    Ok(stream_archive(
        &state, entries, expected, &dir_name, ip, url_path,
    ))
}

/// GET `/zip/` - bundles every configured root into one archive named after
/// the site, one top-level folder per root label.
pub async fn zip_all(State(state): State<AppState>, req: Request) -> Result<Response, ServeError> {
    let ip = client_ip(&req, &state.trusted_proxy);
    tracing::info!("zip  download   ip={ip:<15}  dir=/ (all roots)");

    let roots = (*state.roots).clone();
    let (entries, expected) = collect_and_measure(move || {
        let mut all = Vec::new();
        for (label, fs_path) in roots.iter() {
            all.extend(collect_entries(fs_path, label));
        }
        all
    })
    .await?;

    let name = state.ui.title.clone();
    Ok(stream_archive(
        &state,
        entries,
        expected,
        &name,
        ip,
        "/ (all roots)".to_string(),
    ))
}

/// Runs the collection walk and the dry-run sizing pass off the runtime.
async fn collect_and_measure(
    collect: impl FnOnce() -> Vec<ZipEntry> + Send + 'static,
) -> Result<(Vec<ZipEntry>, u64), ServeError> {
    tokio::task::spawn_blocking(move || {
        let entries = collect();
        let expected = dry_run_size(&entries)?;
        Ok::<_, io::Error>((entries, expected))
    })
    .await
    .map_err(|e| ServeError::Internal(format!("archive sizing task: {e}")))?
    .map_err(|e| ServeError::Internal(format!("measuring archive: {e}")))
}

/// Spawns the real archive pass on a blocking thread and bridges its output
/// into the response body. Stats are recorded when the archive completes;
/// a client that disconnects aborts the writer through the closed channel.
fn stream_archive(
    state: &AppState,
    entries: Vec<ZipEntry>,
    expected: u64,
    name: &str,
    ip: IpAddr,
    label: String,
) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(8);
    let stats: Arc<DownloadStats> = Arc::clone(&state.stats);
    let started = Instant::now();

    tokio::task::spawn_blocking(move || {
        let mut writer = ChannelWriter {
            tx,
            buf: Vec::with_capacity(CHANNEL_CHUNK),
        };
        match write_archive(&mut writer, &entries).and_then(|n| writer.flush().map(|()| n)) {
            Ok(written) => {
                stats.record(written as i64);
                if written != expected {
                    // A file changed between the sizing pass and this one;
                    // the client sees a truncated or overlong body.
                    tracing::error!(
                        "zip  size drift ip={ip:<15}  dir={label}  expected={expected} wrote={written}"
                    );
                }
                tracing::info!(
                    "zip  complete   ip={ip:<15}  duration={:?}  dir={label}",
                    started.elapsed()
                );
            }
            Err(e) => {
                tracing::warn!("zip  error      ip={ip:<15}  dir={label}  err={e}");
            }
        }
    });

    let safe_name: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && !matches!(c, '"' | '\\' | '/') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    Response::builder()
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{safe_name}.zip\""),
        )
        .header(header::CONTENT_LENGTH, expected)
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .expect("zip response headers are ASCII")
}

const CHANNEL_CHUNK: usize = 32 * 1024;

/// `io::Write` adapter that ships buffered chunks over the body channel.
/// A dropped receiver (client disconnect) surfaces as `BrokenPipe`, which
/// aborts the archive pass.
struct ChannelWriter {
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
    buf: Vec<u8>,
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= CHANNEL_CHUNK {
            self.flush()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::from(std::mem::take(&mut self.buf));
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))
    }
}

//! Integration tests for the HTTP surface.
//!
//! Each test builds the full router over a temporary directory tree and
//! drives it with in-process requests.

use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use gilebrowser::bandwidth::BandwidthManager;
use gilebrowser::cache::{IndexCache, SizeCache};
use gilebrowser::config::{PreviewOptions, Theme};
use gilebrowser::http_server;
use gilebrowser::net::TrustedProxy;
use gilebrowser::state::{AppState, UiSettings};
use gilebrowser::stats::DownloadStats;
use gilebrowser::Roots;

struct Fixture {
    app: Router,
    state: AppState,
    root_label: String,
    _serve_dir: TempDir,
    _stats_dir: TempDir,
}

/// Serves one temp root containing:
///   file.txt (1000 bytes), img.png (10), sub/inner.txt (20), notes.md
fn fixture() -> Fixture {
    fixture_with_bandwidth(0.0)
}

fn fixture_with_bandwidth(limit_bps: f64) -> Fixture {
    let serve_dir = TempDir::new().unwrap();
    let stats_dir = TempDir::new().unwrap();
    std::fs::write(serve_dir.path().join("file.txt"), vec![b'x'; 1000]).unwrap();
    std::fs::write(serve_dir.path().join("img.png"), vec![0u8; 10]).unwrap();
    std::fs::create_dir(serve_dir.path().join("sub")).unwrap();
    std::fs::write(serve_dir.path().join("sub/inner.txt"), vec![b'y'; 20]).unwrap();
    std::fs::write(serve_dir.path().join("notes.md"), "# Hello\n\nworld\n").unwrap();

    let roots = Roots::from_dirs([serve_dir.path().to_path_buf()]);
    let root_label = roots.iter().next().unwrap().0.to_string();

    let state = AppState {
        roots: Arc::new(roots),
        sizes: SizeCache::new(),
        index: IndexCache::new(),
        bandwidth: BandwidthManager::new(limit_bps),
        stats: Arc::new(DownloadStats::load(stats_dir.path())),
        ui: Arc::new(UiSettings {
            title: "GileBrowser".into(),
            default_theme: Theme::Dark,
            preview: PreviewOptions::default(),
            highlight_css: http_server::assets::highlight_css("catppuccin-mocha"),
            favicon: None,
        }),
        trusted_proxy: TrustedProxy::None,
    };

    Fixture {
        app: http_server::router(state.clone()),
        state,
        root_label,
        _serve_dir: serve_dir,
        _stats_dir: stats_dir,
    }
}

fn get(uri: &str) -> Request<Body> {
    let mut req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    req.extensions_mut()
        .insert(ConnectInfo::<SocketAddr>("10.1.2.3:55000".parse().unwrap()));
    req
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

#[tokio::test]
async fn root_listing_names_every_root() {
    let fx = fixture();
    let response = fx.app.oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let html = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(html.contains(&fx.root_label));
    assert!(html.contains("Download All"));
}

#[tokio::test]
async fn directory_listing_shows_files_and_sizes() {
    let fx = fixture();
    let response = fx
        .app
        .oneshot(get(&format!("/{}", fx.root_label)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let html = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(html.contains("file.txt"));
    assert!(html.contains("1000 B"));
    // Subdirectory total appears (20 bytes in sub/inner.txt).
    assert!(html.contains("sub/"));
    assert!(html.contains("20 B"));
}

#[tokio::test]
async fn unknown_root_is_404() {
    let fx = fixture();
    let response = fx.app.oneshot(get("/nope")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn traversal_is_rejected_with_404() {
    let fx = fixture();
    let uri = format!("/{}/../../etc/passwd", fx.root_label);
    let response = fx.app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn download_sets_attachment_and_length() {
    let fx = fixture();
    let uri = format!("/download/{}/file.txt", fx.root_label);
    let response = fx.app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(disposition, "attachment; filename=\"file.txt\"");
    assert_eq!(
        response.headers().get(header::CONTENT_LENGTH).unwrap(),
        "1000"
    );

    let body = body_bytes(response).await;
    assert_eq!(body.len(), 1000);

    // The download landed in the stats.
    let snap = fx.state.stats.snapshot();
    assert_eq!(snap.total_downloads, 1);
    assert_eq!(snap.total_bytes, 1000);
}

#[tokio::test]
async fn download_supports_ranges() {
    let fx = fixture();
    let uri = format!("/download/{}/file.txt", fx.root_label);
    let mut req = get(&uri);
    req.headers_mut()
        .insert(header::RANGE, "bytes=0-99".parse().unwrap());

    let response = fx.app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(body_bytes(response).await.len(), 100);
}

#[tokio::test]
async fn view_serves_inline_without_stats() {
    let fx = fixture();
    let uri = format!("/view/{}/img.png", fx.root_label);
    let response = fx.app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::CONTENT_DISPOSITION).is_none());
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );

    assert_eq!(fx.state.stats.snapshot().total_downloads, 0);
}

#[tokio::test]
async fn download_of_a_directory_is_404() {
    let fx = fixture();
    let uri = format!("/download/{}/sub", fx.root_label);
    let response = fx.app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn zip_has_exact_content_length() {
    let fx = fixture();
    let uri = format!("/zip/{}", fx.root_label);
    let response = fx.app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/zip"
    );

    let advertised: usize = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();

    let body = body_bytes(response).await;
    assert_eq!(body.len(), advertised);
    assert_eq!(&body[..4], b"PK\x03\x04");
}

#[tokio::test]
async fn zip_of_a_file_is_bad_request() {
    let fx = fixture();
    let uri = format!("/zip/{}/file.txt", fx.root_label);
    let response = fx.app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn zip_all_roots_bundles_everything() {
    let fx = fixture();
    let response = fx.app.oneshot(get("/zip/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains("GileBrowser.zip"));

    let advertised: usize = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    let body = body_bytes(response).await;
    assert_eq!(body.len(), advertised);

    // Entries are rooted at the root's label.
    let needle = format!("{}/file.txt", fx.root_label);
    assert!(body
        .windows(needle.len())
        .any(|win| win == needle.as_bytes()));
}

#[tokio::test]
async fn search_index_is_gzipped_json_of_files_only() {
    let fx = fixture();
    let response = fx.app.oneshot(get("/api/index")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert_eq!(
        response.headers().get(header::CONTENT_ENCODING).unwrap(),
        "gzip"
    );

    let body = body_bytes(response).await;
    let mut json = String::new();
    flate2::read::GzDecoder::new(body.as_slice())
        .read_to_string(&mut json)
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

    let files = parsed["files"].as_array().unwrap();
    let paths: Vec<&str> = files.iter().map(|f| f["path"].as_str().unwrap()).collect();
    assert!(paths.contains(&format!("/{}/file.txt", fx.root_label).as_str()));
    assert!(paths.contains(&format!("/{}/sub/inner.txt", fx.root_label).as_str()));
    // Directories are not indexed.
    assert!(!paths.contains(&format!("/{}/sub", fx.root_label).as_str()));

    let file = files
        .iter()
        .find(|f| f["name"] == "file.txt")
        .expect("file.txt in index");
    assert_eq!(file["size"], 1000);
}

#[tokio::test]
async fn preview_renders_markdown() {
    let fx = fixture();
    let uri = format!("/preview/{}/notes.md", fx.root_label);
    let response = fx.app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let html = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(html.contains("<h1>Hello</h1>"));
}

#[tokio::test]
async fn preview_of_directory_shows_entry_count() {
    let fx = fixture();
    let uri = format!("/preview/{}/sub", fx.root_label);
    let response = fx.app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let html = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(html.contains("sub/"));
    assert!(html.contains("Download ZIP"));
}

#[tokio::test]
async fn static_assets_and_stylesheets_are_served() {
    let fx = fixture();
    for (uri, content_type) in [
        ("/static/styles.css", "text/css; charset=utf-8"),
        ("/static/app.js", "application/javascript; charset=utf-8"),
        ("/highlight.css", "text/css; charset=utf-8"),
        ("/favicon.ico", "image/svg+xml"),
    ] {
        let response = fx.app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            content_type,
            "{uri}"
        );
    }
}

#[tokio::test]
async fn throttled_download_still_delivers_every_byte() {
    // A generous cap keeps the test fast while exercising the full
    // join/wrap/leave path.
    let fx = fixture_with_bandwidth(10_000_000.0);
    let uri = format!("/download/{}/file.txt", fx.root_label);
    let response = fx.app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await.len(), 1000);
}

#[tokio::test]
async fn listing_converges_after_file_change() {
    let fx = fixture();
    let uri = format!("/{}", fx.root_label);

    let response = fx.app.clone().oneshot(get(&uri)).await.unwrap();
    let html = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(html.contains("1000 B"));

    // Shrink the file and invalidate the way the watcher would.
    std::fs::write(
        PathBuf::from(fx.state.roots.get(&fx.root_label).unwrap()).join("file.txt"),
        b"xxxxx",
    )
    .unwrap();
    fx.state
        .sizes
        .invalidate(fx.state.roots.get(&fx.root_label).unwrap());

    // The stale value may appear once; the next render converges.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let response = fx.app.clone().oneshot(get(&uri)).await.unwrap();
        let html = String::from_utf8(body_bytes(response).await).unwrap();
        if html.contains(">5 B<") {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "listing never showed the new size"
        );
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

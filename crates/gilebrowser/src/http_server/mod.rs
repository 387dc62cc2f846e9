//! The HTTP surface: routing and the request handlers behind it.

pub mod archive;
pub mod assets;
pub mod download;
pub mod listing;
pub mod preview;
pub mod search;

use axum::middleware;
use axum::routing::get;
use axum::Router;

use crate::bandwidth;
use crate::state::AppState;

/// Builds the complete router.
///
/// Body-heavy routes (`/zip`, `/download`, `/view`) pass through the
/// bandwidth throttle; everything else is response-sized pages and cached
/// blobs that are not worth metering.
pub fn router(state: AppState) -> Router {
    let throttled = Router::new()
        .route("/zip/", get(archive::zip_all))
        .route("/zip/*path", get(archive::zip_dir))
        .route("/download/*path", get(download::download))
        .route("/view/*path", get(download::view))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            bandwidth::throttle,
        ));

    Router::new()
        .route("/static/*path", get(assets::static_asset))
        .route("/favicon.ico", get(assets::favicon))
        .route("/highlight.css", get(assets::highlight_stylesheet))
        .route("/api/index", get(search::index))
        .route("/preview/*path", get(preview::preview))
        .merge(throttled)
        .route("/", get(listing::root_listing))
        .route("/*path", get(listing::directory_listing))
        .with_state(state)
}

/// Normalizes a wildcard capture into a leading-slash URL path.
pub(crate) fn url_path_from_capture(capture: &str) -> String {
    let trimmed = capture.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Formats a byte count for display.
pub(crate) fn format_size(bytes: i64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    const GIB: f64 = MIB * 1024.0;

    let b = bytes as f64;
    if b >= GIB {
        format!("{:.2} GB", b / GIB)
    } else if b >= MIB {
        format!("{:.2} MB", b / MIB)
    } else if b >= KIB {
        format!("{:.2} KB", b / KIB)
    } else {
        format!("{bytes} B")
    }
}

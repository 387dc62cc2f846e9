//! Embedded static assets, the favicon, and the highlight stylesheet.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

const STYLES_CSS: &str = include_str!("../../static/styles.css");
const APP_JS: &str = include_str!("../../static/app.js");
const FAVICON_SVG: &str = include_str!("../../static/favicon.svg");

/// GET `/static/*` - assets baked into the binary.
pub async fn static_asset(Path(path): Path<String>) -> Response {
    match path.trim_start_matches('/') {
        "styles.css" => asset("text/css; charset=utf-8", STYLES_CSS),
        "app.js" => asset("application/javascript; charset=utf-8", APP_JS),
        "favicon.svg" => asset("image/svg+xml", FAVICON_SVG),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

fn asset(content_type: &'static str, body: &'static str) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "max-age=3600"),
        ],
        body,
    )
        .into_response()
}

/// GET `/favicon.ico`.
///
/// A configured favicon file is read on every request so it can be swapped
/// without a restart; otherwise the embedded default is served.
pub async fn favicon(State(state): State<AppState>) -> Response {
    if let Some(path) = &state.ui.favicon {
        return match tokio::fs::read(path).await {
            Ok(bytes) => (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, favicon_content_type(path)),
                    (header::CACHE_CONTROL, "no-cache"),
                ],
                bytes,
            )
                .into_response(),
            Err(e) => {
                tracing::warn!("favicon: could not read {}: {e}", path.display());
                (StatusCode::NOT_FOUND, "favicon not found").into_response()
            }
        };
    }

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/svg+xml"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        FAVICON_SVG,
    )
        .into_response()
}

fn favicon_content_type(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => "image/x-icon",
    }
}

/// GET `/highlight.css` - generated once at startup, served from memory.
pub async fn highlight_stylesheet(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/css; charset=utf-8")],
        state.ui.highlight_css.clone(),
    )
        .into_response()
}

/// Builds the stylesheet for code previews from the configured theme name.
/// Any name containing "latte" (or "light") selects the light palette; the
/// default is the dark one.
pub fn highlight_css(theme: &str) -> String {
    let lower = theme.to_ascii_lowercase();
    let light = lower.contains("latte") || lower.contains("light");

    let (bg, fg, accent, dim) = if light {
        ("#eff1f5", "#4c4f69", "#8839ef", "#9ca0b0")
    } else {
        ("#1e1e2e", "#cdd6f4", "#cba6f7", "#6c7086")
    };

    format!(
        "/* generated for theme: {theme} */\n\
         .code-preview {{ background: {bg}; color: {fg}; padding: 1rem; \
         border-radius: 6px; overflow-x: auto; }}\n\
         .code-preview code {{ font-family: ui-monospace, SFMono-Regular, Menlo, \
         Consolas, monospace; font-size: 0.875rem; line-height: 1.5; }}\n\
         .code-preview .line-number {{ color: {dim}; user-select: none; \
         padding-right: 1rem; }}\n\
         .rendered-doc a {{ color: {accent}; }}\n\
         .rendered-doc pre {{ background: {bg}; color: {fg}; padding: 1rem; \
         border-radius: 6px; overflow-x: auto; }}\n"
    )
}

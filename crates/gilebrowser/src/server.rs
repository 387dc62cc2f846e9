//! Server bootstrap: state wiring, background tasks, and the accept loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::ConnectInfo;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::TcpListener;
use tower::Service;

use crate::bandwidth::format_bits;
use crate::cache::warm_caches;
use crate::config::Config;
use crate::http_server;
use crate::state::AppState;
use crate::watcher;

/// How long a client may take to finish sending request headers. This is the
/// Slowloris defence: trickling headers one byte at a time gets the
/// connection closed at the deadline. It also reclaims idle keep-alive
/// connections, which sit waiting for the next request's header.
const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(20);

/// Starts the HTTP server with the given configuration and serves until the
/// process is terminated.
///
/// No write timeout is configured anywhere on the path: file downloads and
/// ZIP streams legitimately run for hours, and the bandwidth governor
/// already keeps slow readers from holding unbounded resources.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let state = AppState::from_config(&config);
    state.sizes.spawn_gc();

    let app = http_server::router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    log_startup(&config, &state, addr);

    // Warm both caches in the background so the first page load is served
    // hot, and watch the roots so they stay that way.
    warm_caches(
        (*state.roots).clone(),
        Arc::clone(&state.sizes),
        Arc::clone(&state.index),
    );
    let _watcher = match watcher::start(
        (*state.roots).clone(),
        Arc::clone(&state.sizes),
        Arc::clone(&state.index),
    ) {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!("watcher: could not start filesystem watcher: {e}");
            None
        }
    };

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            // Transient failures (fd exhaustion, aborted handshakes) should
            // not take the whole server down.
            Err(e) => {
                tracing::warn!("accept: {e}");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        let tower_service = app.clone();
        tokio::spawn(async move {
            let hyper_service =
                hyper::service::service_fn(move |mut request: hyper::Request<Incoming>| {
                    request.extensions_mut().insert(ConnectInfo(peer));
                    tower_service.clone().call(request)
                });

            if let Err(err) = http1::Builder::new()
                .timer(TokioTimer::new())
                .header_read_timeout(HEADER_READ_TIMEOUT)
                .serve_connection(TokioIo::new(stream), hyper_service)
                .await
            {
                let msg = err.to_string().to_lowercase();
                // Disconnects mid-download are routine, not noteworthy.
                if !msg.contains("connection reset")
                    && !msg.contains("broken pipe")
                    && !msg.contains("shutting down")
                {
                    tracing::debug!("connection error from {peer}: {err}");
                }
            }
        });
    }
}

/// Prints a structured summary of the active configuration.
fn log_startup(config: &Config, state: &AppState, addr: SocketAddr) {
    let sep = "-------------------------------------------";
    tracing::info!("{sep}");
    tracing::info!("  {}", config.title);
    tracing::info!("{sep}");
    tracing::info!("  {:<18} http://{addr}", "Address:");
    tracing::info!("  {:<18} {}", "Port:", config.port);
    tracing::info!("  {:<18} {}", "Highlight theme:", config.highlight_theme);
    tracing::info!("  {:<18} {}", "Default UI theme:", config.default_theme);

    match &config.favicon {
        Some(path) => tracing::info!("  {:<18} {}", "Favicon:", path.display()),
        None => tracing::info!("  {:<18} (embedded default)", "Favicon:"),
    }

    if config.bandwidth_bps > 0.0 {
        tracing::info!(
            "  {:<18} {}/s",
            "Bandwidth limit:",
            format_bits(config.bandwidth_bps)
        );
    } else {
        tracing::info!("  {:<18} unlimited", "Bandwidth limit:");
    }

    tracing::info!(
        "  {:<18} images={}  text={}  docs={}",
        "Previews:",
        on_off(config.preview.images),
        on_off(config.preview.text),
        on_off(config.preview.docs),
    );

    tracing::info!(
        "  {:<18} {} {}",
        "Serving:",
        state.roots.len(),
        if state.roots.len() == 1 {
            "directory"
        } else {
            "directories"
        }
    );
    for (label, path) in state.roots.iter() {
        tracing::info!("    /{label:<16} {}", path.display());
    }
    tracing::info!("{sep}");
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

//! Shared application state handed to every request handler.

use std::path::PathBuf;
use std::sync::Arc;

use crate::bandwidth::BandwidthManager;
use crate::cache::{IndexCache, SizeCache};
use crate::config::{Config, PreviewOptions, Theme};
use crate::net::TrustedProxy;
use crate::roots::Roots;
use crate::stats::DownloadStats;

/// UI-facing settings resolved once at startup.
#[derive(Debug)]
pub struct UiSettings {
    pub title: String,
    pub default_theme: Theme,
    pub preview: PreviewOptions,
    /// Stylesheet served at /highlight.css, generated from the configured
    /// highlight theme.
    pub highlight_css: String,
    /// Custom favicon path; the embedded default is used when absent. Read
    /// per request so the file can be swapped without a restart.
    pub favicon: Option<PathBuf>,
}

/// Everything the handlers need, cloned cheaply per request.
///
/// The caches, governor, and stats record live for the whole process; only
/// this struct knows about all of them at once, so there are no hidden
/// globals to reason about.
#[derive(Clone)]
pub struct AppState {
    pub roots: Arc<Roots>,
    pub sizes: Arc<SizeCache>,
    pub index: Arc<IndexCache>,
    pub bandwidth: Arc<BandwidthManager>,
    pub stats: Arc<DownloadStats>,
    pub ui: Arc<UiSettings>,
    pub trusted_proxy: TrustedProxy,
}

impl AppState {
    pub fn from_config(config: &Config) -> Self {
        let roots = Roots::from_dirs(config.dirs.iter().cloned());
        Self {
            roots: Arc::new(roots),
            sizes: SizeCache::new(),
            index: IndexCache::new(),
            bandwidth: BandwidthManager::new(config.bandwidth_bps),
            stats: Arc::new(DownloadStats::load(&config.stats_dir)),
            ui: Arc::new(UiSettings {
                title: config.title.clone(),
                default_theme: config.default_theme,
                preview: config.preview,
                highlight_css: crate::http_server::assets::highlight_css(
                    &config.highlight_theme,
                ),
                favicon: config.favicon.clone(),
            }),
            trusted_proxy: config.trusted_proxy.clone(),
        }
    }
}

//! One-shot startup cache warming.

use std::sync::Arc;
use std::time::Instant;

use crate::cache::index::{build_index, serialize_index, IndexCache};
use crate::cache::size::SizeCache;
use crate::cache::walk::build_size_index;
use crate::roots::Roots;

/// Pre-populates the search index and the directory-size cache so the first
/// real page load is never a cold miss.
///
/// Runs on its own thread; server startup is never delayed. The index comes
/// first - it is the single most expensive walk - then each root gets one
/// bottom-up size sweep whose results are installed in bulk, bypassing the
/// per-path read path entirely.
pub fn warm_caches(roots: Roots, sizes: Arc<SizeCache>, index: Arc<IndexCache>) {
    std::thread::Builder::new()
        .name("cache-warmer".into())
        .spawn(move || {
            tracing::info!("cache: warming started");
            let started = Instant::now();

            index.install(serialize_index(&build_index(&roots)));

            for (_, fs_root) in roots.iter() {
                sizes.bulk_insert(build_size_index(fs_root));
            }

            tracing::info!(
                "cache: warming complete in {:?} ({} size entries)",
                started.elapsed(),
                sizes.len()
            );
        })
        .expect("spawning cache warmer thread");
}

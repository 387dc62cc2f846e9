//! The search-index endpoint.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::Response;

use crate::error::ServeError;
use crate::state::AppState;

/// GET `/api/index` - the flat file index for the client-side fuzzy search.
///
/// The cache stores the blob already gzip-compressed, so the response body is
/// the cached bytes verbatim with `Content-Encoding: gzip`; the browser
/// inflates it transparently.
pub async fn index(State(state): State<AppState>) -> Result<Response, ServeError> {
    let cache = Arc::clone(&state.index);
    let roots = (*state.roots).clone();
    let blob = tokio::task::spawn_blocking(move || cache.index_bytes(&roots))
        .await
        .map_err(|e| ServeError::Internal(format!("index build task: {e}")))?;

    Response::builder()
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "gzip")
        .body(Body::from(blob))
        .map_err(|e| ServeError::Internal(format!("building index response: {e}")))
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Error kinds a request handler can produce.
///
/// `NotFound` and `Traversal` are deliberately indistinguishable on the wire:
/// a probe for a path outside a root learns nothing beyond "no such page".
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    /// Unknown root label, nonexistent path, or a file where a directory was
    /// expected.
    #[error("not found")]
    NotFound,

    /// The resolved filesystem path escapes its configured root.
    #[error("path escapes its root")]
    Traversal,

    /// The request is well-formed HTTP but nonsensical for this server, e.g.
    /// asking for a ZIP of a regular file.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Read, template, or archive failure. Details are logged server-side;
    /// the client only sees a generic message.
    #[error("internal error: {0}")]
    Internal(String),

    /// The client went away mid-response. Nothing left to say to anyone.
    #[error("request cancelled")]
    Cancelled,
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        match self {
            ServeError::NotFound | ServeError::Traversal => {
                (StatusCode::NOT_FOUND, "Not found").into_response()
            }
            ServeError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ServeError::Internal(msg) => {
                tracing::error!("request failed: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
            ServeError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_is_indistinguishable_from_not_found() {
        let a = ServeError::NotFound.into_response();
        let b = ServeError::Traversal.into_response();
        assert_eq!(a.status(), StatusCode::NOT_FOUND);
        assert_eq!(b.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn bad_request_maps_to_400() {
        let resp = ServeError::BadRequest("not a directory".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}

use crate::{
    filenames::{content_type_for, secure_filename},
    server::SharedState,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::instrument;

#[instrument(skip(state))]
pub async fn uploaded_file(
    State(state): State<SharedState>,
    Path(filename): Path<String>,
) -> Response {
    let safe_name = secure_filename(&filename);
    if safe_name.is_empty() || safe_name != filename {
        return StatusCode::NOT_FOUND.into_response();
    }

    let path = state.uploads_dir.join(&safe_name);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Response::builder()
            .header(header::CONTENT_TYPE, content_type_for(&path))
            .body(Body::from(bytes))
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build response for {:?}: {}", path, e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!("Failed to read upload {:?}: {}", path, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

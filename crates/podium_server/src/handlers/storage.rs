use axum::{
    Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use std::sync::Arc;
use tracing::debug;

use crate::storage::{LocalDisk, content_type_for};

/// Shared state for serving the public storage directory
#[derive(Clone)]
pub struct StorageState {
    pub disk: Arc<LocalDisk>,
}

/// Create routes serving stored files
pub fn storage_routes(state: StorageState) -> Router {
    Router::new()
        .route("/{*path}", get(serve_file))
        .with_state(state)
}

/// GET /storage/{path} - Raw bytes of a stored file
async fn serve_file(State(state): State<StorageState>, Path(path): Path<String>) -> Response {
    match state.disk.read(&path).await {
        Ok(bytes) => (
            [(
                header::CONTENT_TYPE,
                content_type_for(&path).unwrap_or("application/octet-stream"),
            )],
            bytes,
        )
            .into_response(),
        Err(e) => {
            debug!("Stored file {} unavailable: {}", path, e);
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

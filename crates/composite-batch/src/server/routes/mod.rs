//! API routes for the compositing server

pub mod batches;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        // Submission - with larger body limit for image uploads
        .route(
            "/batches",
            post(batches::submit_batch).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        // Progress
        .route("/batches/:id", get(batches::get_batch_status))
        // Results
        .route("/batches/:id/download", get(batches::download_batch))
        // Info
        .route("/info", get(info))
}

/// API info endpoint
async fn info(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<serde_json::Value> {
    let config = state.config();
    axum::Json(serde_json::json!({
        "name": "composite-batch",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Batch compositing of foreground images onto a shared background",
        "endpoints": {
            "POST /api/batches": "Upload a background and foregrounds (multipart)",
            "GET /api/batches/:id": "Get batch progress",
            "GET /api/batches/:id/download": "Download composited outputs as zip"
        },
        "processing": {
            "chunk_size": config.processing.chunk_size,
            "worker_width": config.processing.worker_width,
            "pixel_budget": config.remote.pixel_budget(),
            "max_attempts": config.remote.max_attempts,
            "session_ttl_secs": config.sessions.ttl_secs
        }
    }))
}

//! Batch submission, status, and download endpoints

use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::path::{Path as FsPath, PathBuf};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::imaging::{read_dimensions_from_path, BackgroundSpec};
use crate::processing::{schedule_reclaim, BatchSubmission, FileTask, SessionView};
use crate::server::bundle::build_bundle;
use crate::server::state::AppState;

/// Response from batch submission
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBatchResponse {
    pub session_id: Uuid,
    pub accepted: usize,
    pub message: String,
}

/// Multipart fields collected before submission
#[derive(Default)]
struct SpooledBatch {
    foregrounds: Vec<FileTask>,
    background: Option<PathBuf>,
    background_width: Option<u32>,
    background_height: Option<u32>,
}

/// POST /api/batches - Upload a background and foregrounds for compositing
pub async fn submit_batch(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SubmitBatchResponse>> {
    let staging_dir = state
        .config()
        .storage
        .uploads_dir()
        .join(Uuid::new_v4().to_string());
    tokio::fs::create_dir_all(&staging_dir).await?;

    match spool_and_submit(&state, &staging_dir, multipart).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&staging_dir).await {
                tracing::warn!("Failed to remove {}: {}", staging_dir.display(), cleanup);
            }
            Err(e)
        }
    }
}

async fn spool_and_submit(
    state: &AppState,
    staging_dir: &FsPath,
    mut multipart: Multipart,
) -> Result<SubmitBatchResponse> {
    let mut batch = SpooledBatch::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::validation(format!("Failed to read multipart field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "background_width" | "background_height" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| Error::validation(format!("Failed to read {}: {}", name, e)))?;
                let value: u32 = text.trim().parse().map_err(|_| {
                    Error::validation(format!("{} must be a positive integer, got '{}'", name, text))
                })?;
                if name == "background_width" {
                    batch.background_width = Some(value);
                } else {
                    batch.background_height = Some(value);
                }
            }
            "background" | "foreground" | "foregrounds" => {
                let filename = field
                    .file_name()
                    .map(sanitize_filename)
                    .unwrap_or_else(|| format!("image_{}.png", Uuid::new_v4()));

                let data = field
                    .bytes()
                    .await
                    .map_err(|e| Error::validation(format!("Failed to read {}: {}", filename, e)))?;

                if name == "background" {
                    if batch.background.is_some() {
                        return Err(Error::validation("only one background image is allowed"));
                    }
                    let path = staging_dir.join(format!("background-{}", filename));
                    tokio::fs::write(&path, &data).await?;
                    tracing::info!("Received background: {} ({} bytes)", filename, data.len());
                    batch.background = Some(path);
                } else {
                    let index = batch.foregrounds.len();
                    let path = staging_dir.join(format!("{:04}-{}", index, filename));
                    tokio::fs::write(&path, &data).await?;
                    batch
                        .foregrounds
                        .push(FileTask::new(path, filename, data.len() as u64));
                }
            }
            other => {
                tracing::debug!("Ignoring unknown multipart field '{}'", other);
            }
        }
    }

    let background_path = batch
        .background
        .ok_or_else(|| Error::validation("a background image is required"))?;

    let (width, height) = match (batch.background_width, batch.background_height) {
        (Some(w), Some(h)) => (w, h),
        _ => {
            let path = background_path.clone();
            tokio::task::spawn_blocking(move || read_dimensions_from_path(&path))
                .await
                .map_err(|e| Error::internal(format!("dimension probe failed: {}", e)))?
                .map_err(|e| Error::validation(format!("unreadable background image: {}", e)))?
        }
    };

    tracing::info!(
        "Submitting batch: {} foreground(s), background {}x{}",
        batch.foregrounds.len(),
        width,
        height
    );

    let receipt = state
        .submitter()
        .submit(BatchSubmission {
            tasks: batch.foregrounds,
            background: BackgroundSpec::new(background_path, width, height),
            staging_dir: Some(staging_dir.to_path_buf()),
        })
        .await?;

    Ok(SubmitBatchResponse {
        session_id: receipt.session_id,
        accepted: receipt.accepted,
        message: format!(
            "{} image(s) queued for compositing. Poll /api/batches/{} for progress.",
            receipt.accepted, receipt.session_id
        ),
    })
}

/// GET /api/batches/:id - Session progress (default view if unknown)
pub async fn get_batch_status(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Json<SessionView> {
    Json(state.sessions().get(session_id))
}

/// GET /api/batches/:id/download - Zip of every composited output
pub async fn download_batch(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Response> {
    let sessions = state.sessions().clone();

    if sessions.get(session_id).is_processing {
        return Err(Error::validation(format!(
            "batch {} is still processing",
            session_id
        )));
    }

    let dir = sessions.output_dir(session_id);
    let bundle = tokio::task::spawn_blocking(move || build_bundle(&dir))
        .await
        .map_err(|e| Error::internal(format!("bundle task failed: {}", e)))??;

    tracing::info!(
        "Serving bundle for session {} ({} bytes)",
        session_id,
        bundle.len()
    );
    schedule_reclaim(sessions, session_id, state.config().sessions.reclaim_grace());

    let disposition = format!("attachment; filename=\"composited-{}.zip\"", session_id);
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(bundle),
    )
        .into_response())
}

/// Keep only the final path component of a client-supplied file name
fn sanitize_filename(raw: &str) -> String {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." {
        format!("image_{}.png", Uuid::new_v4())
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompositeConfig;
    use crate::remote::{Compositor, RemoteError};
    use crate::server::build_router;
    use async_trait::async_trait;
    use axum::http::{Request, StatusCode};
    use bytes::Bytes;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "composite-test-boundary";

    struct EchoCompositor;

    #[async_trait]
    impl Compositor for EchoCompositor {
        async fn composite(
            &self,
            foreground: Bytes,
            _background: Bytes,
        ) -> std::result::Result<Bytes, RemoteError> {
            Ok(foreground)
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn file_part(body: &mut Vec<u8>, field: &str, filename: &str, data: &[u8]) {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: image/png\r\n\r\n",
                BOUNDARY, field, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }

    fn multipart_request(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/batches")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn test_state(dir: &TempDir, api_key: Option<&str>) -> AppState {
        let mut config = CompositeConfig::default();
        config.storage.root = dir.path().to_path_buf();
        config.remote.api_key = api_key.map(str::to_string);
        config.remote.base_delay_ms = 1;
        AppState::with_compositor(config, Arc::new(EchoCompositor))
            .await
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("photo.png"), "photo.png");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\cat.jpg"), "cat.jpg");
        assert!(sanitize_filename("..").starts_with("image_"));
    }

    #[tokio::test]
    async fn test_unknown_session_returns_default_view() {
        let dir = TempDir::new().unwrap();
        let app = build_router(test_state(&dir, Some("key")).await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/batches/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["totalImages"], 0);
        assert_eq!(json["isProcessing"], false);
    }

    #[tokio::test]
    async fn test_download_unknown_session_is_not_found() {
        let dir = TempDir::new().unwrap();
        let app = build_router(test_state(&dir, Some("key")).await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/batches/{}/download", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_background_is_rejected() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, Some("key")).await;
        let app = build_router(state.clone());

        let mut body = Vec::new();
        file_part(&mut body, "foreground", "a.png", &png(4, 4));
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        let response = app.oneshot(multipart_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.sessions().is_empty());

        // the staging directory was removed again
        let staged = std::fs::read_dir(state.config().storage.uploads_dir())
            .unwrap()
            .count();
        assert_eq!(staged, 0);
    }

    #[tokio::test]
    async fn test_missing_api_key_is_config_error() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, None).await;
        let app = build_router(state.clone());

        let mut body = Vec::new();
        file_part(&mut body, "background", "bg.png", &png(8, 6));
        file_part(&mut body, "foreground", "a.png", &png(4, 4));
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        let response = app.oneshot(multipart_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = json_body(response).await;
        assert_eq!(json["error"]["type"], "config_error");
        assert!(state.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_submit_poll_and_download() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, Some("key")).await;

        let mut body = Vec::new();
        file_part(&mut body, "background", "bg.png", &png(8, 6));
        file_part(&mut body, "foreground", "cat.png", &png(4, 4));
        file_part(&mut body, "foreground", "cat.png", &png(4, 3));
        file_part(&mut body, "foreground", "dog.png", &png(3, 3));
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        let response = build_router(state.clone())
            .oneshot(multipart_request(body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["accepted"], 3);
        let session_id: Uuid = json["sessionId"].as_str().unwrap().parse().unwrap();

        let mut view = state.sessions().get(session_id);
        for _ in 0..200 {
            if !view.is_processing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            view = state.sessions().get(session_id);
        }
        assert!(!view.is_processing);
        assert_eq!(view.processed_images, 3);
        assert!(view.results.iter().all(|r| r.is_success()));

        let response = build_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri(format!("/api/batches/{}/download", session_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/zip"
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
        assert_eq!(archive.len(), 3);
        assert!(archive.by_name("cat (2)_composited.png").is_ok());
    }
}

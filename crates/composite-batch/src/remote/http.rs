//! HTTP client for the remote compositing service

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};
use serde::Deserialize;

use super::compositor::{Compositor, RemoteError, RemoteErrorKind};
use crate::config::RemoteConfig;
use crate::error::{Error, Result};

/// Calls the remote compositor over multipart HTTP
pub struct HttpCompositor {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

/// Error body shapes the remote is known to send
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<ErrorDetail>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl HttpCompositor {
    /// Build a client with the configured per-call timeout
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(5)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn image_part(data: Bytes, field: &str) -> std::result::Result<Part, RemoteError> {
        let (mime, file_name) = image_label(&data, field);
        let len = data.len() as u64;
        Part::stream_with_length(Body::from(data), len)
            .file_name(file_name)
            .mime_str(mime)
            .map_err(|e| RemoteError::new(RemoteErrorKind::Rejected, format!("bad part: {}", e)))
    }
}

#[async_trait]
impl Compositor for HttpCompositor {
    async fn composite(&self, foreground: Bytes, background: Bytes) -> std::result::Result<Bytes, RemoteError> {
        let form = Form::new()
            .part("foreground", Self::image_part(foreground, "foreground")?)
            .part("background", Self::image_part(background, "background")?);

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let data = response.bytes().await.map_err(|e| classify_transport(&e))?;
        if data.is_empty() {
            return Err(RemoteError::new(
                RemoteErrorKind::InvalidResponse,
                "empty response body",
            )
            .with_status(status.as_u16()));
        }

        Ok(data)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// MIME type and file name matching the encoding actually in `data`
///
/// Buffers under budget are passed through in their upload format, so the
/// label is sniffed from the bytes rather than assumed.
pub fn image_label(data: &[u8], field: &str) -> (&'static str, String) {
    match image::guess_format(data) {
        Ok(format) => {
            let ext = format.extensions_str().first().copied().unwrap_or("bin");
            (format.to_mime_type(), format!("{}.{}", field, ext))
        }
        Err(_) => ("application/octet-stream", field.to_string()),
    }
}

/// Classify a non-success HTTP response
///
/// An error code reported in the body takes precedence over the status line.
pub fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|b| b.error.as_ref())
        .and_then(|d| d.code.clone());
    let message = parsed
        .as_ref()
        .and_then(|b| {
            b.error
                .as_ref()
                .and_then(|d| d.message.clone())
                .or_else(|| b.message.clone())
        })
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("HTTP {}", status)
            } else {
                format!("HTTP {} - {}", status, trimmed)
            }
        });

    let by_code = code.as_deref().and_then(|code| match code {
        "rate_limit_exceeded" | "rate_limited" | "too_many_requests" => {
            Some(RemoteErrorKind::RateLimited)
        }
        "server_error" | "internal_error" | "overloaded" | "service_unavailable" => {
            Some(RemoteErrorKind::ServerFault)
        }
        _ => None,
    });

    let kind = by_code.unwrap_or(match status {
        StatusCode::TOO_MANY_REQUESTS => RemoteErrorKind::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteErrorKind::Unauthorized,
        s if s.is_server_error() => RemoteErrorKind::ServerFault,
        _ => RemoteErrorKind::Rejected,
    });

    RemoteError::new(kind, message).with_status(status.as_u16())
}

/// Classify a failure that happened before a full response arrived
fn classify_transport(err: &reqwest::Error) -> RemoteError {
    let kind = if err.is_timeout() {
        RemoteErrorKind::Timeout
    } else if err.is_decode() {
        RemoteErrorKind::InvalidResponse
    } else {
        RemoteErrorKind::Network
    };

    let error = RemoteError::new(kind, err.to_string());
    match err.status() {
        Some(status) => error.with_status(status.as_u16()),
        None => error,
    }
}

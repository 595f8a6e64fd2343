//! Remote compositor abstraction and failure classification

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::fmt;

/// What went wrong on a remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// Connection refused, reset, or DNS failure
    Network,
    /// Call exceeded its wall-clock timeout
    Timeout,
    /// Remote asked us to slow down
    RateLimited,
    /// Remote failed internally (5xx)
    ServerFault,
    /// Credential rejected
    Unauthorized,
    /// Request rejected as invalid (4xx other than rate limiting)
    Rejected,
    /// Success status but unusable body
    InvalidResponse,
}

impl RemoteErrorKind {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            RemoteErrorKind::Network
                | RemoteErrorKind::Timeout
                | RemoteErrorKind::RateLimited
                | RemoteErrorKind::ServerFault
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RemoteErrorKind::Network => "network",
            RemoteErrorKind::Timeout => "timeout",
            RemoteErrorKind::RateLimited => "rate_limited",
            RemoteErrorKind::ServerFault => "server_fault",
            RemoteErrorKind::Unauthorized => "unauthorized",
            RemoteErrorKind::Rejected => "rejected",
            RemoteErrorKind::InvalidResponse => "invalid_response",
        }
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified remote failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
    /// HTTP status, when the remote answered at all
    pub status: Option<u16>,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// A service that merges a foreground onto a background
///
/// Both inputs are already fitted to the pixel budget. The result is an
/// encoded PNG.
#[async_trait]
pub trait Compositor: Send + Sync {
    /// Composite one foreground onto the shared background
    async fn composite(&self, foreground: Bytes, background: Bytes) -> Result<Bytes, RemoteError>;

    /// Name for logs
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(RemoteErrorKind::Network.is_retryable());
        assert!(RemoteErrorKind::Timeout.is_retryable());
        assert!(RemoteErrorKind::RateLimited.is_retryable());
        assert!(RemoteErrorKind::ServerFault.is_retryable());

        assert!(!RemoteErrorKind::Unauthorized.is_retryable());
        assert!(!RemoteErrorKind::Rejected.is_retryable());
        assert!(!RemoteErrorKind::InvalidResponse.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = RemoteError::new(RemoteErrorKind::RateLimited, "quota exhausted").with_status(429);
        assert_eq!(err.to_string(), "rate_limited: quota exhausted");
        assert_eq!(err.status, Some(429));
    }
}

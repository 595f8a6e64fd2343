//! Application state for the compositing server

use parking_lot::RwLock;
use std::sync::Arc;

use crate::config::CompositeConfig;
use crate::error::Result;
use crate::imaging::ResizePool;
use crate::processing::{
    spawn_sweeper, BatchDispatcher, BatchSubmitter, DispatchOptions, FsOutputSink, SessionStore,
};
use crate::remote::{Compositor, HttpCompositor, RetryExecutor};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Configuration
    config: CompositeConfig,
    /// Session table shared with the dispatcher and sweeper
    sessions: Arc<SessionStore>,
    /// Entry point for new batches
    submitter: BatchSubmitter,
    /// Ready state
    ready: RwLock<bool>,
}

impl AppState {
    /// Create state backed by the HTTP compositor from the configuration
    pub async fn new(config: CompositeConfig) -> Result<Self> {
        let compositor = Arc::new(HttpCompositor::new(&config.remote)?);
        tracing::info!("Remote compositor: {}", config.remote.base_url);
        Self::with_compositor(config, compositor).await
    }

    /// Create state around any compositor implementation
    pub async fn with_compositor(
        config: CompositeConfig,
        compositor: Arc<dyn Compositor>,
    ) -> Result<Self> {
        tracing::info!(
            "Initializing compositing state (storage: {})...",
            config.storage.root.display()
        );

        tokio::fs::create_dir_all(config.storage.uploads_dir()).await?;
        tokio::fs::create_dir_all(config.storage.outputs_dir()).await?;

        let sessions = Arc::new(SessionStore::new(
            config.sessions.ttl(),
            config.storage.outputs_dir(),
        ));

        let dispatcher = Arc::new(BatchDispatcher::new(
            sessions.clone(),
            compositor,
            Arc::new(FsOutputSink::new(config.storage.outputs_dir())),
            RetryExecutor::from_config(&config.remote),
            ResizePool::new(config.processing.resize_workers()),
        ));

        let options = DispatchOptions {
            chunk_size: config.processing.chunk_size,
            worker_width: config.processing.worker_width,
            pixel_budget: config.remote.pixel_budget(),
        };

        let submitter = BatchSubmitter::new(
            sessions.clone(),
            dispatcher,
            config.remote.clone(),
            options,
        );

        spawn_sweeper(sessions.clone(), config.sessions.sweep_interval());
        tracing::info!(
            "Session sweep every {:?} (ttl {:?})",
            config.sessions.sweep_interval(),
            config.sessions.ttl()
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                sessions,
                submitter,
                ready: RwLock::new(true),
            }),
        })
    }

    /// Get configuration
    pub fn config(&self) -> &CompositeConfig {
        &self.inner.config
    }

    /// Get the session store
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.inner.sessions
    }

    /// Get the batch submitter
    pub fn submitter(&self) -> &BatchSubmitter {
        &self.inner.submitter
    }

    /// Check if the server is ready
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.read()
    }

    /// Set ready state
    pub fn set_ready(&self, ready: bool) {
        *self.inner.ready.write() = ready;
    }
}
